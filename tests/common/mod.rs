// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Shared fixtures for integration tests.
//!
//! The clock starts at 2025-06-01 04:00 UTC, which is 09:30 on 1 June at
//! +05:30 and falls in FY25.

#![allow(dead_code)]

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use laundry_settlement_rs::{
    AddressId, BookingRequest, Branch, BranchId, BrandingSnapshot, Collaborators, CustomerId,
    Directory, EngineConfig, InvoiceContent, InvoiceItem, ItemType, ManualClock, MemoryStore,
    Order, OrderId, OrderKind, OrderSource, OrderStatus, Paise, PaymentProvider, PaymentUpdate,
    Plan, PlanId, PurchaseRequest, ServiceType, SettlementEngine, Subscription, SubscriptionId,
    TextRenderer, TimeWindow,
};
use rust_decimal_macros::dec;
use std::sync::Arc;

pub const KORAMANGALA: BranchId = BranchId(1);
pub const INDIRANAGAR: BranchId = BranchId(2);
pub const KORAMANGALA_PIN: &str = "560034";
pub const INDIRANAGAR_PIN: &str = "560038";

/// 2 pickups, 12 kg, 30 days.
pub const MONTHLY_KG: PlanId = PlanId(1);
/// 4 pickups, 40 items, 30 days.
pub const ITEMS_40: PlanId = PlanId(2);
/// Single-use, 1 pickup, 7 days.
pub const TRIAL: PlanId = PlanId(3);

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 4, 0, 0).unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn plans() -> Vec<Plan> {
    vec![
        Plan {
            id: MONTHLY_KG,
            name: "Monthly 12kg".into(),
            price: 99_900,
            validity_days: 30,
            max_pickups: 2,
            kg_limit: Some(dec!(12)),
            items_limit: None,
            single_use: false,
        },
        Plan {
            id: ITEMS_40,
            name: "Dry Clean 40".into(),
            price: 149_900,
            validity_days: 30,
            max_pickups: 4,
            kg_limit: None,
            items_limit: Some(40),
            single_use: false,
        },
        Plan {
            id: TRIAL,
            name: "First Wash Trial".into(),
            price: 9_900,
            validity_days: 7,
            max_pickups: 1,
            kg_limit: None,
            items_limit: None,
            single_use: true,
        },
    ]
}

pub fn branding(name: &str) -> BrandingSnapshot {
    BrandingSnapshot {
        business_name: name.into(),
        address: "80 Feet Road, Bengaluru".into(),
        tax_id: Some("29ABCDE1234F1Z5".into()),
        phone: None,
        logo_url: None,
    }
}

/// Both branches, every plan and default branding.
pub fn directory() -> Arc<Directory> {
    let directory = Arc::new(Directory::new());
    directory.add_branch(Branch {
        id: KORAMANGALA,
        name: "Koramangala".into(),
        is_default: false,
        service_pincodes: vec![KORAMANGALA_PIN.into()],
    });
    directory.add_branch(Branch {
        id: INDIRANAGAR,
        name: "Indiranagar".into(),
        is_default: true,
        service_pincodes: vec![INDIRANAGAR_PIN.into()],
    });
    for plan in plans() {
        directory.add_plan(plan);
    }
    directory.set_branding(branding("Fresh Folds"));
    directory
}

pub fn collaborators(directory: Arc<Directory>, config: &EngineConfig) -> Collaborators {
    let renderer = Arc::new(TextRenderer::new(
        config.render_lines_per_page,
        config.document_base_url.clone(),
    ));
    Collaborators::from_directory(directory, renderer)
}

pub struct Harness {
    pub engine: SettlementEngine<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub directory: Arc<Directory>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::from_parts(directory(), config)
    }

    /// No branches at all, so every code uses the placeholder prefix.
    pub fn without_branches() -> Self {
        Self::branchless(EngineConfig::default())
    }

    pub fn branchless(config: EngineConfig) -> Self {
        let directory = Arc::new(Directory::new());
        for plan in plans() {
            directory.add_plan(plan);
        }
        Self::from_parts(directory, config)
    }

    fn from_parts(directory: Arc<Directory>, config: EngineConfig) -> Self {
        let clock = Arc::new(ManualClock::new(start()));
        let engine = SettlementEngine::new(
            MemoryStore::with_clock(clock.clone()),
            collaborators(directory.clone(), &config),
            clock.clone(),
            config,
        )
        .unwrap();
        Self {
            engine,
            clock,
            directory,
        }
    }

    /// Adds a non-default branch with no service area.
    pub fn open_branch(&self, id: BranchId, name: &str) {
        self.directory.add_branch(Branch {
            id,
            name: name.into(),
            is_default: false,
            service_pincodes: Vec::new(),
        });
    }

    /// Books at `branch` explicitly.
    pub fn book_at(&self, customer: u64, branch: BranchId) -> Order {
        self.engine
            .book_order(BookingRequest {
                branch_id: Some(branch),
                ..booking(customer, KORAMANGALA_PIN)
            })
            .unwrap()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    pub fn book(&self, customer: u64) -> Order {
        self.engine.book_order(booking(customer, KORAMANGALA_PIN)).unwrap()
    }

    pub fn book_with_subscription(&self, customer: u64, subscription: SubscriptionId) -> Order {
        self.engine
            .book_order(subscription_booking(customer, subscription))
            .unwrap()
    }

    pub fn move_to(&self, order: OrderId, status: OrderStatus) -> Order {
        self.engine.update_status(order, status, None).unwrap()
    }

    pub fn picked_up(&self, customer: u64) -> Order {
        let order = self.book(customer);
        self.move_to(order.id, OrderStatus::PickedUp)
    }

    pub fn delivered(&self, customer: u64) -> Order {
        let order = self.picked_up(customer);
        self.move_to(order.id, OrderStatus::Delivered)
    }

    /// Buys `plan` outright with a captured cash payment.
    pub fn purchase(&self, customer: u64, plan: PlanId) -> Subscription {
        let price = plans().into_iter().find(|p| p.id == plan).unwrap().price;
        self.engine
            .purchase_subscription(PurchaseRequest {
                customer_id: CustomerId(customer),
                plan_id: plan,
                quantity: 1,
                valid_from: date(2025, 6, 1),
                address_id: Some(AddressId(customer)),
                branch_id: Some(KORAMANGALA),
                payment: PaymentUpdate::captured(PaymentProvider::Cash, price),
            })
            .unwrap()
            .subscription
    }
}

pub fn window() -> TimeWindow {
    TimeWindow {
        start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        end: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
    }
}

pub fn booking(customer: u64, pincode: &str) -> BookingRequest {
    BookingRequest {
        customer_id: CustomerId(customer),
        kind: OrderKind::Individual,
        services: vec![ServiceType::WashAndFold],
        address_id: AddressId(customer),
        pincode: pincode.into(),
        pickup_date: date(2025, 6, 2),
        pickup_window: window(),
        requested_weight_kg: Some(dec!(4.5)),
        subscription_id: None,
        branch_id: None,
        source: OrderSource::Online,
    }
}

pub fn subscription_booking(customer: u64, subscription: SubscriptionId) -> BookingRequest {
    BookingRequest {
        kind: OrderKind::Subscription,
        subscription_id: Some(subscription),
        ..booking(customer, KORAMANGALA_PIN)
    }
}

/// One service line, no tax or discount.
pub fn content(amount: Paise) -> InvoiceContent {
    InvoiceContent {
        items: vec![InvoiceItem {
            item_type: ItemType::Service,
            name: "Wash & Fold".into(),
            quantity: dec!(4.5),
            unit_price: amount,
            amount,
        }],
        subtotal: amount,
        tax: 0,
        discount: 0,
        total: amount,
        ..InvoiceContent::default()
    }
}
