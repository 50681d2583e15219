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

//! In-memory [`LedgerStore`].
//!
//! Units of work are serialized behind one mutex. Each unit works on a
//! copy-on-write view of the tables, and the view replaces the committed
//! state only when the callback succeeds. Every constraint in [`constraint`] is enforced on
//! insert and update.

use crate::base::{CustomerId, InvoiceId, OrderId, PaymentId, PlanId, SubscriptionId, UsageId};
use crate::clock::{Clock, SystemClock};
use crate::error::{SettlementError, StoreError};
use crate::invoice::{Invoice, InvoiceSubject, InvoiceType};
use crate::journal::CommitJournal;
use crate::order::Order;
use crate::payment::{Payment, PaymentSubject};
use crate::repository::{
    InvoiceRepository, LedgerStore, OrderRepository, PaymentRepository, StoreResult,
    SubscriptionRepository, UnitOfWork, UsageRepository, constraint,
};
use crate::subscription::{Subscription, SubscriptionUsage};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

fn count(n: usize) -> StoreResult<u32> {
    u32::try_from(n).map_err(|_| StoreError::Backend("row count overflows u32".into()))
}

#[derive(Debug, Clone, Default)]
struct OrderTable {
    rows: BTreeMap<OrderId, Order>,
    next_id: u64,
    dirty: bool,
}

impl OrderTable {
    fn code_taken(&self, code: &str, except: OrderId) -> bool {
        self.rows.values().any(|o| o.id != except && o.code == code)
    }
}

impl OrderRepository for Arc<OrderTable> {
    fn allocate_id(&mut self) -> OrderId {
        let table = Arc::make_mut(self);
        table.next_id += 1;
        OrderId(table.next_id)
    }

    fn get(&self, id: OrderId) -> StoreResult<Option<Order>> {
        Ok(self.rows.get(&id).cloned())
    }

    fn find_by_code(&self, code: &str) -> StoreResult<Option<Order>> {
        Ok(self.rows.values().find(|o| o.code == code).cloned())
    }

    fn insert(&mut self, order: Order) -> StoreResult<()> {
        if self.rows.contains_key(&order.id) {
            return Err(StoreError::Backend(format!("order {} already exists", order.id)));
        }
        if self.code_taken(&order.code, order.id) {
            return Err(StoreError::UniqueViolation(constraint::ORDER_CODE));
        }
        let table = Arc::make_mut(self);
        table.rows.insert(order.id, order);
        table.dirty = true;
        Ok(())
    }

    fn update(&mut self, order: &Order) -> StoreResult<()> {
        if !self.rows.contains_key(&order.id) {
            return Err(StoreError::MissingRow("orders"));
        }
        if self.code_taken(&order.code, order.id) {
            return Err(StoreError::UniqueViolation(constraint::ORDER_CODE));
        }
        let table = Arc::make_mut(self);
        table.rows.insert(order.id, order.clone());
        table.dirty = true;
        Ok(())
    }

    fn count_with_code_stem(&self, stem: &str) -> StoreResult<u32> {
        count(self.rows.values().filter(|o| o.code.starts_with(stem)).count())
    }

    fn list_by_customer(&self, customer: CustomerId) -> StoreResult<Vec<Order>> {
        Ok(self
            .rows
            .values()
            .filter(|o| o.customer_id == customer)
            .cloned()
            .collect())
    }

    fn list_by_subscription(&self, subscription: SubscriptionId) -> StoreResult<Vec<Order>> {
        Ok(self
            .rows
            .values()
            .filter(|o| o.subscription_id == Some(subscription))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, Default)]
struct SubscriptionTable {
    rows: BTreeMap<SubscriptionId, Subscription>,
    next_id: u64,
    dirty: bool,
}

impl SubscriptionRepository for Arc<SubscriptionTable> {
    fn allocate_id(&mut self) -> SubscriptionId {
        let table = Arc::make_mut(self);
        table.next_id += 1;
        SubscriptionId(table.next_id)
    }

    fn get(&self, id: SubscriptionId) -> StoreResult<Option<Subscription>> {
        Ok(self.rows.get(&id).cloned())
    }

    fn insert(&mut self, subscription: Subscription) -> StoreResult<()> {
        if self.rows.contains_key(&subscription.id) {
            return Err(StoreError::Backend(format!(
                "subscription {} already exists",
                subscription.id
            )));
        }
        let table = Arc::make_mut(self);
        table.rows.insert(subscription.id, subscription);
        table.dirty = true;
        Ok(())
    }

    fn update(&mut self, subscription: &Subscription) -> StoreResult<()> {
        if !self.rows.contains_key(&subscription.id) {
            return Err(StoreError::MissingRow("subscriptions"));
        }
        let table = Arc::make_mut(self);
        table.rows.insert(subscription.id, subscription.clone());
        table.dirty = true;
        Ok(())
    }

    fn list_by_customer(&self, customer: CustomerId) -> StoreResult<Vec<Subscription>> {
        Ok(self
            .rows
            .values()
            .filter(|s| s.customer_id == customer)
            .cloned()
            .collect())
    }

    fn find_active_by_plan(
        &self,
        customer: CustomerId,
        plan: PlanId,
    ) -> StoreResult<Option<Subscription>> {
        Ok(self
            .rows
            .values()
            .find(|s| s.customer_id == customer && s.plan_id == plan && s.active)
            .cloned())
    }

    fn exists_for_plan(&self, customer: CustomerId, plan: PlanId) -> StoreResult<bool> {
        Ok(self
            .rows
            .values()
            .any(|s| s.customer_id == customer && s.plan_id == plan))
    }
}

#[derive(Debug, Clone, Default)]
struct InvoiceTable {
    rows: BTreeMap<InvoiceId, Invoice>,
    next_id: u64,
    dirty: bool,
}

impl InvoiceTable {
    fn check_unique(&self, invoice: &Invoice) -> StoreResult<()> {
        for other in self.rows.values().filter(|i| i.id != invoice.id) {
            if let (InvoiceSubject::Order(a), InvoiceSubject::Order(b)) = (other.subject, invoice.subject) {
                if a == b && other.invoice_type == invoice.invoice_type {
                    return Err(StoreError::UniqueViolation(constraint::INVOICE_ORDER_TYPE));
                }
            }
            if invoice.code.is_some() && other.code == invoice.code {
                return Err(StoreError::UniqueViolation(constraint::INVOICE_CODE));
            }
        }
        Ok(())
    }
}

impl InvoiceRepository for Arc<InvoiceTable> {
    fn allocate_id(&mut self) -> InvoiceId {
        let table = Arc::make_mut(self);
        table.next_id += 1;
        InvoiceId(table.next_id)
    }

    fn get(&self, id: InvoiceId) -> StoreResult<Option<Invoice>> {
        Ok(self.rows.get(&id).cloned())
    }

    fn insert(&mut self, invoice: Invoice) -> StoreResult<()> {
        if self.rows.contains_key(&invoice.id) {
            return Err(StoreError::Backend(format!("invoice {} already exists", invoice.id)));
        }
        self.check_unique(&invoice)?;
        let table = Arc::make_mut(self);
        table.rows.insert(invoice.id, invoice);
        table.dirty = true;
        Ok(())
    }

    fn update(&mut self, invoice: &Invoice) -> StoreResult<()> {
        if !self.rows.contains_key(&invoice.id) {
            return Err(StoreError::MissingRow("invoices"));
        }
        self.check_unique(invoice)?;
        let table = Arc::make_mut(self);
        table.rows.insert(invoice.id, invoice.clone());
        table.dirty = true;
        Ok(())
    }

    fn find_by_order_and_type(
        &self,
        order: OrderId,
        invoice_type: InvoiceType,
    ) -> StoreResult<Option<Invoice>> {
        Ok(self
            .rows
            .values()
            .find(|i| i.subject == InvoiceSubject::Order(order) && i.invoice_type == invoice_type)
            .cloned())
    }

    fn count_with_code_stem(&self, stem: &str) -> StoreResult<u32> {
        count(
            self.rows
                .values()
                .filter(|i| i.code.as_deref().is_some_and(|code| code.starts_with(stem)))
                .count(),
        )
    }

    fn list_by_order(&self, order: OrderId) -> StoreResult<Vec<Invoice>> {
        Ok(self
            .rows
            .values()
            .filter(|i| i.subject == InvoiceSubject::Order(order))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, Default)]
struct UsageTable {
    rows: BTreeMap<UsageId, SubscriptionUsage>,
    next_id: u64,
    dirty: bool,
}

impl UsageRepository for Arc<UsageTable> {
    fn allocate_id(&mut self) -> UsageId {
        let table = Arc::make_mut(self);
        table.next_id += 1;
        UsageId(table.next_id)
    }

    fn insert(&mut self, usage: SubscriptionUsage) -> StoreResult<()> {
        for other in self.rows.values() {
            if other.subscription_id != usage.subscription_id {
                continue;
            }
            if other.order_id == usage.order_id {
                return Err(StoreError::UniqueViolation(constraint::USAGE_ORDER_SUBSCRIPTION));
            }
            if usage.invoice_id.is_some() && other.invoice_id == usage.invoice_id {
                return Err(StoreError::UniqueViolation(constraint::USAGE_INVOICE_SUBSCRIPTION));
            }
        }
        let table = Arc::make_mut(self);
        table.rows.insert(usage.id, usage);
        table.dirty = true;
        Ok(())
    }

    fn find_by_order_and_subscription(
        &self,
        order: OrderId,
        subscription: SubscriptionId,
    ) -> StoreResult<Option<SubscriptionUsage>> {
        Ok(self
            .rows
            .values()
            .find(|u| u.order_id == order && u.subscription_id == subscription)
            .cloned())
    }

    fn list_by_subscription(
        &self,
        subscription: SubscriptionId,
    ) -> StoreResult<Vec<SubscriptionUsage>> {
        Ok(self
            .rows
            .values()
            .filter(|u| u.subscription_id == subscription)
            .cloned()
            .collect())
    }

    fn list_by_order(&self, order: OrderId) -> StoreResult<Vec<SubscriptionUsage>> {
        Ok(self
            .rows
            .values()
            .filter(|u| u.order_id == order)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, Default)]
struct PaymentTable {
    rows: HashMap<PaymentSubject, Payment>,
    next_id: u64,
    dirty: bool,
}

impl PaymentRepository for Arc<PaymentTable> {
    fn allocate_id(&mut self) -> PaymentId {
        let table = Arc::make_mut(self);
        table.next_id += 1;
        PaymentId(table.next_id)
    }

    fn find(&self, subject: PaymentSubject) -> StoreResult<Option<Payment>> {
        Ok(self.rows.get(&subject).cloned())
    }

    fn upsert(&mut self, payment: Payment) -> StoreResult<()> {
        let table = Arc::make_mut(self);
        table.rows.insert(payment.subject, payment);
        table.dirty = true;
        Ok(())
    }
}

/// Committed state, also used as the working copy of a unit.
///
/// Tables are shared with the committed state until a unit first writes to
/// one, so read-only units copy nothing.
#[derive(Debug, Clone, Default)]
struct Tables {
    orders: Arc<OrderTable>,
    subscriptions: Arc<SubscriptionTable>,
    invoices: Arc<InvoiceTable>,
    usages: Arc<UsageTable>,
    payments: Arc<PaymentTable>,
}

impl Tables {
    fn is_dirty(&self) -> bool {
        self.orders.dirty
            || self.subscriptions.dirty
            || self.invoices.dirty
            || self.usages.dirty
            || self.payments.dirty
    }

    /// Only written tables are dirty, and those are already unshared.
    fn clear_dirty(&mut self) {
        if self.orders.dirty {
            Arc::make_mut(&mut self.orders).dirty = false;
        }
        if self.subscriptions.dirty {
            Arc::make_mut(&mut self.subscriptions).dirty = false;
        }
        if self.invoices.dirty {
            Arc::make_mut(&mut self.invoices).dirty = false;
        }
        if self.usages.dirty {
            Arc::make_mut(&mut self.usages).dirty = false;
        }
        if self.payments.dirty {
            Arc::make_mut(&mut self.payments).dirty = false;
        }
    }
}

impl UnitOfWork for Tables {
    fn orders(&mut self) -> &mut dyn OrderRepository {
        &mut self.orders
    }

    fn subscriptions(&mut self) -> &mut dyn SubscriptionRepository {
        &mut self.subscriptions
    }

    fn invoices(&mut self) -> &mut dyn InvoiceRepository {
        &mut self.invoices
    }

    fn usages(&mut self) -> &mut dyn UsageRepository {
        &mut self.usages
    }

    fn payments(&mut self) -> &mut dyn PaymentRepository {
        &mut self.payments
    }
}

/// Serializing in-memory store with a commit journal.
pub struct MemoryStore {
    tables: Mutex<Tables>,
    journal: CommitJournal,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Journal timestamps come from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            journal: CommitJournal::new(),
            clock,
        }
    }

    pub fn journal(&self) -> &CommitJournal {
        &self.journal
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerStore for MemoryStore {
    fn transaction<T, F>(&self, label: &'static str, work: F) -> Result<T, SettlementError>
    where
        F: FnOnce(&mut dyn UnitOfWork) -> Result<T, SettlementError>,
    {
        let mut committed = self.tables.lock();
        let mut working = committed.clone();
        match work(&mut working) {
            Ok(value) => {
                if working.is_dirty() {
                    working.clear_dirty();
                    *committed = working;
                    let sequence = self.journal.append(label, self.clock.now());
                    tracing::trace!(unit = label, sequence, "unit committed");
                }
                Ok(value)
            }
            Err(err) => {
                tracing::debug!(unit = label, error = %err, code = err.code(), "unit rolled back");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    fn usage(id: u64, order: u64, invoice: Option<u64>) -> SubscriptionUsage {
        SubscriptionUsage {
            id: UsageId(id),
            order_id: OrderId(order),
            subscription_id: SubscriptionId(1),
            invoice_id: invoice.map(InvoiceId),
            deducted_pickups: 1,
            deducted_kg: Decimal::ZERO,
            deducted_items: 0,
            created_at: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn usage_pairs_are_unique() {
        let mut table = Arc::new(UsageTable::default());
        table.insert(usage(1, 10, Some(5))).unwrap();
        assert_eq!(
            table.insert(usage(2, 10, None)),
            Err(StoreError::UniqueViolation(constraint::USAGE_ORDER_SUBSCRIPTION))
        );
        assert_eq!(
            table.insert(usage(3, 11, Some(5))),
            Err(StoreError::UniqueViolation(constraint::USAGE_INVOICE_SUBSCRIPTION))
        );
        table.insert(usage(4, 12, None)).unwrap();
        table.insert(usage(5, 13, None)).unwrap();
    }

    #[test]
    fn failed_unit_leaves_no_writes() {
        let store = MemoryStore::new();
        let result: Result<(), _> = store.transaction("test", |uow| {
            uow.usages().insert(usage(1, 10, None))?;
            Err(SettlementError::SubscriptionBusy)
        });
        assert_eq!(result, Err(SettlementError::SubscriptionBusy));
        let rows = store
            .transaction("read", |uow| Ok(uow.usages().list_by_order(OrderId(10))?))
            .unwrap();
        assert!(rows.is_empty());
        assert!(store.journal().is_empty());
    }

    #[test]
    fn read_only_units_copy_nothing() {
        let store = MemoryStore::new();
        store
            .transaction("insert", |uow| Ok(uow.usages().insert(usage(1, 10, None))?))
            .unwrap();
        let committed = Arc::clone(&store.tables.lock().usages);

        store
            .transaction("read", |uow| Ok(uow.usages().list_by_order(OrderId(10))?))
            .unwrap();
        assert!(Arc::ptr_eq(&committed, &store.tables.lock().usages));

        store
            .transaction("insert", |uow| Ok(uow.usages().insert(usage(2, 11, None))?))
            .unwrap();
        let after = Arc::clone(&store.tables.lock().usages);
        assert!(!Arc::ptr_eq(&committed, &after));
        assert_eq!(committed.rows.len(), 1);
        assert_eq!(after.rows.len(), 2);
        assert!(!after.dirty);
    }

    #[test]
    fn only_writing_units_are_journaled() {
        let store = MemoryStore::new();
        store
            .transaction("insert", |uow| Ok(uow.usages().insert(usage(1, 10, None))?))
            .unwrap();
        store
            .transaction("read", |uow| Ok(uow.usages().list_by_order(OrderId(10))?))
            .unwrap();
        let records = store.journal().drain();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].label, "insert");
    }
}
