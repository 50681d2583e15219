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

//! Storage ports.
//!
//! One narrow trait per entity, bundled into a [`UnitOfWork`] that a
//! [`LedgerStore`] hands to a callback. Use cases only ever see these traits,
//! so any backend that can honour the uniqueness constraints in
//! [`constraint`] and run a callback atomically can host the engine.
//!
//! # Implementing a store
//!
//! - `transaction` must apply every write made through the unit if the
//!   callback returns `Ok`, and none of them otherwise.
//! - Reads inside a unit must observe the unit's own earlier writes.
//! - Inserts that break a constraint return
//!   [`StoreError::UniqueViolation`] with the matching [`constraint`] name.
//! - `allocate_id` may leave gaps; ids are never reused.

use crate::base::{CustomerId, InvoiceId, OrderId, PaymentId, PlanId, SubscriptionId, UsageId};
use crate::error::{SettlementError, StoreError};
use crate::invoice::{Invoice, InvoiceType};
use crate::order::Order;
use crate::payment::{Payment, PaymentSubject};
use crate::subscription::{Subscription, SubscriptionUsage};

/// Names of the uniqueness constraints a store enforces.
pub mod constraint {
    /// `orders.code`
    pub const ORDER_CODE: &str = "orders_code_key";
    /// `invoices.code`
    pub const INVOICE_CODE: &str = "invoices_code_key";
    /// `(invoices.order_id, invoices.type)`
    pub const INVOICE_ORDER_TYPE: &str = "invoices_order_type_key";
    /// `(usages.order_id, usages.subscription_id)`
    pub const USAGE_ORDER_SUBSCRIPTION: &str = "usages_order_subscription_key";
    /// `(usages.invoice_id, usages.subscription_id)`
    pub const USAGE_INVOICE_SUBSCRIPTION: &str = "usages_invoice_subscription_key";
}

pub type StoreResult<T> = Result<T, StoreError>;

pub trait OrderRepository {
    fn allocate_id(&mut self) -> OrderId;
    fn get(&self, id: OrderId) -> StoreResult<Option<Order>>;
    fn find_by_code(&self, code: &str) -> StoreResult<Option<Order>>;
    fn insert(&mut self, order: Order) -> StoreResult<()>;
    fn update(&mut self, order: &Order) -> StoreResult<()>;
    /// Orders whose code starts with `stem`.
    fn count_with_code_stem(&self, stem: &str) -> StoreResult<u32>;
    fn list_by_customer(&self, customer: CustomerId) -> StoreResult<Vec<Order>>;
    fn list_by_subscription(&self, subscription: SubscriptionId) -> StoreResult<Vec<Order>>;
}

pub trait SubscriptionRepository {
    fn allocate_id(&mut self) -> SubscriptionId;
    fn get(&self, id: SubscriptionId) -> StoreResult<Option<Subscription>>;
    fn insert(&mut self, subscription: Subscription) -> StoreResult<()>;
    fn update(&mut self, subscription: &Subscription) -> StoreResult<()>;
    fn list_by_customer(&self, customer: CustomerId) -> StoreResult<Vec<Subscription>>;
    /// The customer's active subscription on `plan`, lowest id first.
    fn find_active_by_plan(
        &self,
        customer: CustomerId,
        plan: PlanId,
    ) -> StoreResult<Option<Subscription>>;
    /// Whether the customer ever held `plan`, in any state.
    fn exists_for_plan(&self, customer: CustomerId, plan: PlanId) -> StoreResult<bool>;
}

pub trait InvoiceRepository {
    fn allocate_id(&mut self) -> InvoiceId;
    fn get(&self, id: InvoiceId) -> StoreResult<Option<Invoice>>;
    fn insert(&mut self, invoice: Invoice) -> StoreResult<()>;
    fn update(&mut self, invoice: &Invoice) -> StoreResult<()>;
    fn find_by_order_and_type(
        &self,
        order: OrderId,
        invoice_type: InvoiceType,
    ) -> StoreResult<Option<Invoice>>;
    /// Invoices whose code starts with `stem`, void ones included.
    fn count_with_code_stem(&self, stem: &str) -> StoreResult<u32>;
    fn list_by_order(&self, order: OrderId) -> StoreResult<Vec<Invoice>>;
}

pub trait UsageRepository {
    fn allocate_id(&mut self) -> UsageId;
    fn insert(&mut self, usage: SubscriptionUsage) -> StoreResult<()>;
    fn find_by_order_and_subscription(
        &self,
        order: OrderId,
        subscription: SubscriptionId,
    ) -> StoreResult<Option<SubscriptionUsage>>;
    fn list_by_subscription(
        &self,
        subscription: SubscriptionId,
    ) -> StoreResult<Vec<SubscriptionUsage>>;
    fn list_by_order(&self, order: OrderId) -> StoreResult<Vec<SubscriptionUsage>>;
}

pub trait PaymentRepository {
    fn allocate_id(&mut self) -> PaymentId;
    fn find(&self, subject: PaymentSubject) -> StoreResult<Option<Payment>>;
    /// Replaces the row owned by `payment.subject`, or inserts it.
    fn upsert(&mut self, payment: Payment) -> StoreResult<()>;
}

/// Repository handles scoped to one atomic unit.
pub trait UnitOfWork {
    fn orders(&mut self) -> &mut dyn OrderRepository;
    fn subscriptions(&mut self) -> &mut dyn SubscriptionRepository;
    fn invoices(&mut self) -> &mut dyn InvoiceRepository;
    fn usages(&mut self) -> &mut dyn UsageRepository;
    fn payments(&mut self) -> &mut dyn PaymentRepository;
}

/// Runs callbacks as all-or-nothing units of work.
pub trait LedgerStore: Send + Sync {
    /// Runs `work` in a fresh unit. `label` names the unit in logs and the
    /// commit journal.
    ///
    /// # Errors
    ///
    /// Returns the callback's error, after discarding its writes, or a
    /// [`SettlementError::Storage`] if the commit itself fails.
    fn transaction<T, F>(&self, label: &'static str, work: F) -> Result<T, SettlementError>
    where
        F: FnOnce(&mut dyn UnitOfWork) -> Result<T, SettlementError>;
}
