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

//! Prepaid subscriptions and the usage ledger.
//!
//! A subscription is metered on pickups plus at most one of kilograms or
//! item count. Every deduction is one [`SubscriptionUsage`] row; the store
//! refuses a second row for the same (order, subscription) or
//! (invoice, subscription) pair, which is what stops a retried charge from
//! deducting twice.
//!
//! ```text
//!  active ──charge──► active (less allowance) ──exhausted/expired──► inactive
//!    │
//!    └──extend (renewal while active)──► active (ceilings and expiry pushed out)
//! ```

use crate::base::{
    AddressId, BranchId, CustomerId, InvoiceId, OrderId, Paise, PlanId, SubscriptionId, UsageId,
};
use crate::error::SettlementError;
use crate::order::Order;
use crate::repository::UnitOfWork;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Catalog plan. Owned by the plan catalog, read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub name: String,
    pub price: Paise,
    pub validity_days: u32,
    pub max_pickups: u32,
    pub kg_limit: Option<Decimal>,
    pub items_limit: Option<u32>,
    /// May only ever be held once per customer.
    pub single_use: bool,
}

/// The single dimension a plan meters besides pickups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metering {
    PickupsOnly,
    Kilograms(Decimal),
    Items(u32),
}

impl Plan {
    /// # Errors
    ///
    /// Returns [`SettlementError::InvalidInput`] if both ceilings are set.
    pub fn metering(&self) -> Result<Metering, SettlementError> {
        match (self.kg_limit, self.items_limit) {
            (None, None) => Ok(Metering::PickupsOnly),
            (Some(kg), None) => Ok(Metering::Kilograms(kg)),
            (None, Some(items)) => Ok(Metering::Items(items)),
            (Some(_), Some(_)) => Err(SettlementError::InvalidInput(format!(
                "plan {} meters both kilograms and items",
                self.id
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub customer_id: CustomerId,
    pub plan_id: PlanId,
    pub address_id: Option<AddressId>,
    pub branch_id: Option<BranchId>,
    pub valid_from: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
    pub remaining_pickups: u32,
    pub used_kg: Decimal,
    pub used_items: u32,
    pub active: bool,
    /// Ceilings tracked on the row; grow past the plan defaults on renewal.
    pub total_pickups: u32,
    pub total_kg_limit: Option<Decimal>,
    pub total_items_limit: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// # Errors
    ///
    /// - [`SettlementError::SubscriptionInactive`] - Deactivated.
    /// - [`SettlementError::SubscriptionExpired`] - Past expiry.
    /// - [`SettlementError::InsufficientAllowance`] - No pickups left or the
    ///   metered ceiling is reached.
    pub fn ensure_usable(&self, now: DateTime<Utc>) -> Result<(), SettlementError> {
        if !self.active {
            return Err(SettlementError::SubscriptionInactive);
        }
        if self.expiry <= now {
            return Err(SettlementError::SubscriptionExpired);
        }
        if self.remaining_pickups == 0 {
            return Err(SettlementError::InsufficientAllowance("no pickups left".into()));
        }
        if self.metered_ceiling_reached() {
            return Err(SettlementError::InsufficientAllowance(
                "metered ceiling reached".into(),
            ));
        }
        Ok(())
    }

    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.ensure_usable(now).is_ok()
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining_pickups == 0 || self.metered_ceiling_reached()
    }

    fn metered_ceiling_reached(&self) -> bool {
        if let Some(limit) = self.total_kg_limit {
            return self.used_kg >= limit;
        }
        if let Some(limit) = self.total_items_limit {
            return self.used_items >= limit;
        }
        false
    }
}

/// A usable subscription as offered to a booking customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsableSubscription {
    pub subscription: Subscription,
    /// Already funds an in-flight order; one at a time.
    pub has_active_order: bool,
}

/// Amount consumed by one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deduction {
    pub pickups: u32,
    pub kg: Decimal,
    pub items: u32,
}

impl Default for Deduction {
    fn default() -> Self {
        Self {
            pickups: 1,
            kg: Decimal::ZERO,
            items: 0,
        }
    }
}

/// Absolute totals written by [`update_usage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageTotals {
    pub remaining_pickups: u32,
    pub used_kg: Decimal,
    pub used_items: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionUsage {
    pub id: UsageId,
    pub order_id: OrderId,
    pub subscription_id: SubscriptionId,
    pub invoice_id: Option<InvoiceId>,
    pub deducted_pickups: u32,
    pub deducted_kg: Decimal,
    pub deducted_items: u32,
    pub created_at: DateTime<Utc>,
}

/// Plan figures and multiplier applied by [`extend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtendTerms {
    pub quantity_months: u32,
    pub plan_max_pickups: u32,
    pub plan_validity_days: u32,
    pub plan_kg_limit: Option<Decimal>,
    pub plan_items_limit: Option<u32>,
}

impl ExtendTerms {
    pub fn from_plan(plan: &Plan, quantity_months: u32) -> Self {
        Self {
            quantity_months,
            plan_max_pickups: plan.max_pickups,
            plan_validity_days: plan.validity_days,
            plan_kg_limit: plan.kg_limit,
            plan_items_limit: plan.items_limit,
        }
    }
}

/// Inputs for a brand-new subscription row.
#[derive(Debug, Clone)]
pub struct NewSubscription<'a> {
    pub customer_id: CustomerId,
    pub plan: &'a Plan,
    pub quantity: u32,
    pub valid_from: DateTime<Utc>,
    pub address_id: Option<AddressId>,
    pub branch_id: Option<BranchId>,
}

fn scaled(value: u32, quantity: u32, what: &str) -> Result<u32, SettlementError> {
    value
        .checked_mul(quantity)
        .ok_or_else(|| SettlementError::InvalidInput(format!("{what} overflows")))
}

fn validity(days: u32, quantity: u32) -> Result<Duration, SettlementError> {
    Ok(Duration::days(i64::from(scaled(days, quantity, "validity")?)))
}

fn load(uow: &mut dyn UnitOfWork, id: SubscriptionId) -> Result<Subscription, SettlementError> {
    uow.subscriptions()
        .get(id)?
        .ok_or(SettlementError::SubscriptionNotFound(id))
}

/// Loads a subscription that `customer` owns.
///
/// # Errors
///
/// - [`SettlementError::SubscriptionNotFound`] - No such subscription.
/// - [`SettlementError::OwnershipMismatch`] - It belongs to another customer.
pub fn load_owned(
    uow: &mut dyn UnitOfWork,
    customer: CustomerId,
    id: SubscriptionId,
) -> Result<Subscription, SettlementError> {
    let subscription = load(uow, id)?;
    if subscription.customer_id != customer {
        tracing::warn!(subscription_id = %id, customer_id = %customer, "subscription owned by another customer");
        return Err(SettlementError::OwnershipMismatch);
    }
    Ok(subscription)
}

/// The subscription, checked against the customer of `order_id`.
fn load_for_order(
    uow: &mut dyn UnitOfWork,
    order_id: OrderId,
    subscription_id: SubscriptionId,
) -> Result<Subscription, SettlementError> {
    let order = uow
        .orders()
        .get(order_id)?
        .ok_or(SettlementError::OrderNotFound(order_id))?;
    load_owned(uow, order.customer_id, subscription_id)
}

/// Active, unexpired, not exhausted subscriptions of a customer.
///
/// # Errors
///
/// Propagates store failures.
pub fn list_usable(
    uow: &mut dyn UnitOfWork,
    customer_id: CustomerId,
    now: DateTime<Utc>,
) -> Result<Vec<UsableSubscription>, SettlementError> {
    let subscriptions = uow.subscriptions().list_by_customer(customer_id)?;
    let mut usable = Vec::new();
    for subscription in subscriptions.into_iter().filter(|s| s.is_usable(now)) {
        let has_active_order = uow
            .orders()
            .list_by_subscription(subscription.id)?
            .iter()
            .any(Order::is_in_flight);
        usable.push(UsableSubscription {
            subscription,
            has_active_order,
        });
    }
    Ok(usable)
}

/// Inserts exactly one usage row.
///
/// # Errors
///
/// - [`SettlementError::DuplicateUsage`] - Row already exists for this
///   (order, subscription) or (invoice, subscription).
/// - [`SettlementError::InvalidInput`] - Negative kilograms.
/// - [`SettlementError::OwnershipMismatch`] - The order's customer does not
///   own the subscription.
pub fn record_usage(
    uow: &mut dyn UnitOfWork,
    order_id: OrderId,
    subscription_id: SubscriptionId,
    deduction: Deduction,
    invoice_id: Option<InvoiceId>,
    now: DateTime<Utc>,
) -> Result<SubscriptionUsage, SettlementError> {
    if deduction.kg < Decimal::ZERO {
        return Err(SettlementError::InvalidInput(
            "deducted kilograms must not be negative".into(),
        ));
    }
    load_for_order(uow, order_id, subscription_id)?;

    let usage = SubscriptionUsage {
        id: uow.usages().allocate_id(),
        order_id,
        subscription_id,
        invoice_id,
        deducted_pickups: deduction.pickups,
        deducted_kg: deduction.kg,
        deducted_items: deduction.items,
        created_at: now,
    };
    uow.usages().insert(usage.clone())?;
    Ok(usage)
}

/// Writes absolute totals. Callers compute them.
///
/// # Errors
///
/// Returns [`SettlementError::InvalidInput`] if used kilograms or items
/// would decrease.
pub fn update_usage(
    uow: &mut dyn UnitOfWork,
    subscription_id: SubscriptionId,
    totals: UsageTotals,
    now: DateTime<Utc>,
) -> Result<Subscription, SettlementError> {
    let mut subscription = load(uow, subscription_id)?;
    if totals.used_kg < subscription.used_kg || totals.used_items < subscription.used_items {
        return Err(SettlementError::InvalidInput(
            "used kilograms and items never decrease".into(),
        ));
    }
    subscription.remaining_pickups = totals.remaining_pickups;
    subscription.used_kg = totals.used_kg;
    subscription.used_items = totals.used_items;
    subscription.updated_at = now;
    uow.subscriptions().update(&subscription)?;
    Ok(subscription)
}

/// Checks the allowance, records the usage row and writes the new totals,
/// all inside the caller's unit of work. Exhausted subscriptions are
/// deactivated in the same unit.
///
/// # Errors
///
/// - [`SettlementError::SubscriptionInactive`] / [`SettlementError::SubscriptionExpired`]
/// - [`SettlementError::InsufficientAllowance`] - Deduction exceeds what is left.
/// - [`SettlementError::DuplicateUsage`] - Already charged for this order or invoice.
/// - [`SettlementError::OwnershipMismatch`] - The order's customer does not
///   own the subscription.
pub fn charge(
    uow: &mut dyn UnitOfWork,
    order_id: OrderId,
    subscription_id: SubscriptionId,
    deduction: Deduction,
    invoice_id: Option<InvoiceId>,
    now: DateTime<Utc>,
) -> Result<SubscriptionUsage, SettlementError> {
    let subscription = load_for_order(uow, order_id, subscription_id)?;
    if !subscription.active {
        return Err(SettlementError::SubscriptionInactive);
    }
    if subscription.expiry <= now {
        return Err(SettlementError::SubscriptionExpired);
    }

    let remaining_pickups = subscription
        .remaining_pickups
        .checked_sub(deduction.pickups)
        .ok_or_else(|| SettlementError::InsufficientAllowance("not enough pickups".into()))?;
    let used_kg = subscription.used_kg + deduction.kg;
    if subscription.total_kg_limit.is_some_and(|limit| used_kg > limit) {
        return Err(SettlementError::InsufficientAllowance(
            "kilogram ceiling exceeded".into(),
        ));
    }
    let used_items = subscription
        .used_items
        .checked_add(deduction.items)
        .filter(|used| subscription.total_items_limit.is_none_or(|limit| *used <= limit))
        .ok_or_else(|| SettlementError::InsufficientAllowance("item ceiling exceeded".into()))?;

    let usage = record_usage(uow, order_id, subscription_id, deduction, invoice_id, now)?;
    let mut updated = update_usage(
        uow,
        subscription_id,
        UsageTotals {
            remaining_pickups,
            used_kg,
            used_items,
        },
        now,
    )?;
    if updated.is_exhausted() {
        updated.active = false;
        uow.subscriptions().update(&updated)?;
        tracing::info!(subscription_id = %subscription_id, "subscription exhausted, deactivated");
    }
    Ok(usage)
}

/// Renews an active subscription in place.
///
/// Pickups, expiry and whichever ceiling the plan defines all grow by the
/// plan figure times the quantity, on top of what the row already holds.
///
/// # Errors
///
/// - [`SettlementError::SubscriptionInactive`] - Only active rows are extended.
/// - [`SettlementError::InvalidInput`] - Zero quantity or arithmetic overflow.
pub fn extend(
    uow: &mut dyn UnitOfWork,
    subscription_id: SubscriptionId,
    terms: ExtendTerms,
    now: DateTime<Utc>,
) -> Result<Subscription, SettlementError> {
    if terms.quantity_months == 0 {
        return Err(SettlementError::InvalidInput("quantity must be at least 1".into()));
    }
    let mut subscription = load(uow, subscription_id)?;
    if !subscription.active {
        return Err(SettlementError::SubscriptionInactive);
    }

    let q = terms.quantity_months;
    let pickups = scaled(terms.plan_max_pickups, q, "pickups")?;
    subscription.remaining_pickups = subscription
        .remaining_pickups
        .checked_add(pickups)
        .ok_or_else(|| SettlementError::InvalidInput("pickups overflow".into()))?;
    subscription.total_pickups = subscription
        .total_pickups
        .checked_add(pickups)
        .ok_or_else(|| SettlementError::InvalidInput("pickups overflow".into()))?;
    subscription.expiry += validity(terms.plan_validity_days, q)?;
    if let Some(kg) = terms.plan_kg_limit {
        let current = subscription.total_kg_limit.unwrap_or(Decimal::ZERO);
        subscription.total_kg_limit = Some(current + kg * Decimal::from(q));
    }
    if let Some(items) = terms.plan_items_limit {
        let current = subscription.total_items_limit.unwrap_or(0);
        subscription.total_items_limit = Some(
            current
                .checked_add(scaled(items, q, "items")?)
                .ok_or_else(|| SettlementError::InvalidInput("items overflow".into()))?,
        );
    }
    subscription.updated_at = now;
    uow.subscriptions().update(&subscription)?;
    tracing::info!(
        subscription_id = %subscription_id,
        remaining_pickups = subscription.remaining_pickups,
        expiry = %subscription.expiry,
        "subscription extended"
    );
    Ok(subscription)
}

/// Creates a subscription with ceilings and validity scaled by quantity.
///
/// # Errors
///
/// Returns [`SettlementError::InvalidInput`] for zero quantity, a plan
/// metering both dimensions, or arithmetic overflow.
pub fn activate(
    uow: &mut dyn UnitOfWork,
    new: NewSubscription<'_>,
    now: DateTime<Utc>,
) -> Result<Subscription, SettlementError> {
    if new.quantity == 0 {
        return Err(SettlementError::InvalidInput("quantity must be at least 1".into()));
    }
    new.plan.metering()?;
    let q = new.quantity;
    let pickups = scaled(new.plan.max_pickups, q, "pickups")?;
    let subscription = Subscription {
        id: uow.subscriptions().allocate_id(),
        customer_id: new.customer_id,
        plan_id: new.plan.id,
        address_id: new.address_id,
        branch_id: new.branch_id,
        valid_from: new.valid_from,
        expiry: new.valid_from + validity(new.plan.validity_days, q)?,
        remaining_pickups: pickups,
        used_kg: Decimal::ZERO,
        used_items: 0,
        active: true,
        total_pickups: pickups,
        total_kg_limit: new.plan.kg_limit.map(|kg| kg * Decimal::from(q)),
        total_items_limit: new
            .plan
            .items_limit
            .map(|items| scaled(items, q, "items"))
            .transpose()?,
        created_at: now,
        updated_at: now,
    };
    uow.subscriptions().insert(subscription.clone())?;
    tracing::info!(
        subscription_id = %subscription.id,
        customer_id = %subscription.customer_id,
        plan_id = %subscription.plan_id,
        "subscription activated"
    );
    Ok(subscription)
}

/// Flips `active` off on a customer's expired or exhausted subscriptions.
/// Rows are kept.
///
/// # Errors
///
/// Propagates store failures.
pub fn deactivate_unusable(
    uow: &mut dyn UnitOfWork,
    customer_id: CustomerId,
    now: DateTime<Utc>,
) -> Result<Vec<SubscriptionId>, SettlementError> {
    let mut deactivated = Vec::new();
    for mut subscription in uow.subscriptions().list_by_customer(customer_id)? {
        if subscription.active && (subscription.expiry <= now || subscription.is_exhausted()) {
            subscription.active = false;
            subscription.updated_at = now;
            uow.subscriptions().update(&subscription)?;
            deactivated.push(subscription.id);
        }
    }
    Ok(deactivated)
}
