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

//! # Laundry Settlement
//!
//! Settlement engine for a laundry service: the rules that move an order
//! through fulfillment, meter prepaid subscriptions without double-charging,
//! run the two-stage invoice lifecycle with branch-scoped document numbers,
//! and reconcile captured payments with subscriptions sold on an invoice.
//!
//! ## Core Components
//!
//! - [`SettlementEngine`]: Entry point; every use case is one unit of work
//! - [`LedgerStore`] / [`UnitOfWork`]: Storage ports, one repository per entity
//! - [`MemoryStore`]: In-memory store enforcing every uniqueness constraint
//! - [`SettlementError`]: Closed error set with one kind-to-status table
//! - [`CivilCalendar`]: Fixed-offset civil days and April-March fiscal years
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
//! use laundry_settlement_rs::{
//!     AddressId, BookingRequest, Collaborators, CustomerId, Directory, EngineConfig,
//!     ManualClock, MemoryStore, OrderKind, OrderSource, OrderStatus, ServiceType,
//!     SettlementEngine, TextRenderer, TimeWindow,
//! };
//!
//! let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 6, 1, 4, 0, 0).unwrap()));
//! let collaborators = Collaborators::from_directory(
//!     Arc::new(Directory::new()),
//!     Arc::new(TextRenderer::new(40, "memory://invoices")),
//! );
//! let engine = SettlementEngine::new(
//!     MemoryStore::new(),
//!     collaborators,
//!     clock,
//!     EngineConfig::default(),
//! )
//! .unwrap();
//!
//! let order = engine
//!     .book_order(BookingRequest {
//!         customer_id: CustomerId(1),
//!         kind: OrderKind::Individual,
//!         services: vec![ServiceType::WashAndFold],
//!         address_id: AddressId(1),
//!         pincode: "560034".into(),
//!         pickup_date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
//!         pickup_window: TimeWindow {
//!             start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
//!             end: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
//!         },
//!         requested_weight_kg: None,
//!         subscription_id: None,
//!         branch_id: None,
//!         source: OrderSource::Online,
//!     })
//!     .unwrap();
//! assert_eq!(order.code, "GEN010620250001ON");
//!
//! let order = engine.update_status(order.id, OrderStatus::PickedUp, None).unwrap();
//! assert!(order.eligible_for_acknowledgement());
//! ```

mod base;
pub mod clock;
pub mod collaborators;
pub mod config;
mod engine;
pub mod error;
pub mod fulfillment;
pub mod invoice;
pub mod journal;
pub mod memory;
pub mod numbering;
pub mod order;
pub mod payment;
pub mod repository;
pub mod revenue;
pub mod subscription;

pub use base::{
    AddressId, BranchId, CustomerId, InvoiceId, OrderId, Paise, PaymentId, PlanId,
    SubscriptionId, UsageId,
};
pub use clock::{CivilCalendar, Clock, ManualClock, SystemClock};
pub use collaborators::{
    Branch, BranchDirectory, BrandingProvider, BrandingSnapshot, Directory, DocumentRenderer,
    PlanCatalog, RenderedDocument, TextRenderer,
};
pub use config::{EngineConfig, TransitionPolicy};
pub use engine::{CaptureOutcome, Collaborators, Purchase, PurchaseRequest, SettlementEngine};
pub use error::{ErrorKind, SettlementError, StoreError};
pub use fulfillment::FulfillmentOutcome;
pub use invoice::{
    Invoice, InvoiceContent, InvoiceItem, InvoicePaymentStatus, InvoiceStatus, InvoiceSubject,
    InvoiceType, ItemType, NewSubscriptionSnapshot, OrderMode, SubscriptionOffer, UsageSnapshot,
};
pub use journal::{CommitJournal, CommitRecord};
pub use memory::MemoryStore;
pub use order::{
    BookingRequest, Order, OrderKind, OrderSource, OrderStatus, ServiceType, TimeWindow,
};
pub use payment::{Payment, PaymentProvider, PaymentStatus, PaymentSubject, PaymentUpdate};
pub use repository::{LedgerStore, UnitOfWork};
pub use revenue::{Breakdown, RevenuePeriod, RevenueRange};
pub use subscription::{
    Deduction, ExtendTerms, Plan, Subscription, SubscriptionUsage, UsableSubscription, UsageTotals,
};
