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

//! Activation of subscriptions sold as lines on an acknowledgement invoice.
//!
//! The invoice's `new_subscription_fulfilled_at` marker is the only
//! re-entrancy guard. It is read before anything is touched and written
//! after every offer has been processed, so a failure partway through
//! leaves it unset and the whole step can be run again.

use crate::base::{AddressId, BranchId, CustomerId, OrderId, Paise, SubscriptionId};
use crate::clock::CivilCalendar;
use crate::collaborators::PlanCatalog;
use crate::error::SettlementError;
use crate::invoice::{InvoiceStatus, InvoiceType};
use crate::payment::{self, PaymentProvider, PaymentUpdate};
use crate::repository::UnitOfWork;
use crate::subscription::{self, ExtendTerms, NewSubscription, Plan, Subscription};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FulfillmentOutcome {
    /// No acknowledgement invoice, or it sells no subscription.
    NotApplicable,
    /// The marker was already set.
    AlreadyFulfilled,
    /// Subscriptions activated or extended, in offer order, each listed once.
    Fulfilled { activated: Vec<SubscriptionId> },
}

/// # Errors
///
/// Returns [`SettlementError::PlanAlreadyRedeemed`] when a single-use plan
/// was ever held by the customer, in any state.
pub fn ensure_redeemable(
    uow: &mut dyn UnitOfWork,
    customer_id: CustomerId,
    plan: &Plan,
) -> Result<(), SettlementError> {
    if plan.single_use && uow.subscriptions().exists_for_plan(customer_id, plan.id)? {
        return Err(SettlementError::PlanAlreadyRedeemed(plan.id));
    }
    Ok(())
}

/// Where a granted allowance lands.
#[derive(Debug, Clone, Copy)]
pub struct Grant<'a> {
    pub customer_id: CustomerId,
    pub plan: &'a Plan,
    pub quantity: u32,
    pub valid_from: DateTime<Utc>,
    pub address_id: Option<AddressId>,
    pub branch_id: Option<BranchId>,
}

/// Extends the customer's active subscription on the plan, or creates one.
///
/// # Errors
///
/// Propagates errors from [`subscription::extend`] and [`subscription::activate`].
pub fn grant(
    uow: &mut dyn UnitOfWork,
    grant: Grant<'_>,
    now: DateTime<Utc>,
) -> Result<Subscription, SettlementError> {
    match uow
        .subscriptions()
        .find_active_by_plan(grant.customer_id, grant.plan.id)?
    {
        Some(active) => subscription::extend(
            uow,
            active.id,
            ExtendTerms::from_plan(grant.plan, grant.quantity),
            now,
        ),
        None => subscription::activate(
            uow,
            NewSubscription {
                customer_id: grant.customer_id,
                plan: grant.plan,
                quantity: grant.quantity,
                valid_from: grant.valid_from,
                address_id: grant.address_id,
                branch_id: grant.branch_id,
            },
            now,
        ),
    }
}

/// Converts the acknowledgement invoice's new-subscription snapshot into
/// real subscriptions, each with a captured payment for its offer price.
///
/// Every plan is resolved and the single-use rule checked for every offer
/// before any subscription is written. The first subscription granted is
/// linked onto the order.
///
/// # Errors
///
/// - [`SettlementError::PlanNotFound`] - An offer names an unknown plan.
/// - [`SettlementError::PlanAlreadyRedeemed`] - Single-use plan already held.
/// - Anything raised while granting; the marker stays unset.
pub fn fulfill(
    uow: &mut dyn UnitOfWork,
    order_id: OrderId,
    plans: &dyn PlanCatalog,
    calendar: &CivilCalendar,
    provider: PaymentProvider,
    now: DateTime<Utc>,
) -> Result<FulfillmentOutcome, SettlementError> {
    let Some(mut invoice) = uow
        .invoices()
        .find_by_order_and_type(order_id, InvoiceType::Acknowledgement)?
    else {
        return Ok(FulfillmentOutcome::NotApplicable);
    };
    if invoice.new_subscription_fulfilled_at.is_some() {
        tracing::debug!(order_id = %order_id, invoice_id = %invoice.id, "new subscriptions already fulfilled");
        return Ok(FulfillmentOutcome::AlreadyFulfilled);
    }
    let offers = match &invoice.content.new_subscription {
        Some(snapshot) if invoice.status != InvoiceStatus::Void => snapshot.offers.clone(),
        _ => return Ok(FulfillmentOutcome::NotApplicable),
    };
    let mut order = uow
        .orders()
        .get(order_id)?
        .ok_or(SettlementError::OrderNotFound(order_id))?;

    let mut resolved = Vec::with_capacity(offers.len());
    let mut single_use_seen = HashSet::new();
    for offer in &offers {
        let plan = plans
            .plan(offer.plan_id)
            .ok_or(SettlementError::PlanNotFound(offer.plan_id))?;
        ensure_redeemable(uow, order.customer_id, &plan)?;
        if plan.single_use && !single_use_seen.insert(plan.id) {
            return Err(SettlementError::PlanAlreadyRedeemed(plan.id));
        }
        resolved.push((offer, plan));
    }

    // One payment row per subscription: offers landing on the same row are summed.
    let mut paid: Vec<(SubscriptionId, Paise)> = Vec::with_capacity(resolved.len());
    for (offer, plan) in &resolved {
        let subscription = grant(
            uow,
            Grant {
                customer_id: order.customer_id,
                plan,
                quantity: offer.quantity,
                valid_from: calendar.midnight(offer.valid_from),
                address_id: Some(order.address_id),
                branch_id: order.branch_id,
            },
            now,
        )?;
        match paid.iter_mut().find(|(id, _)| *id == subscription.id) {
            Some((_, amount)) => {
                *amount = amount.checked_add(offer.price).ok_or_else(|| {
                    SettlementError::InvalidInput("offer prices overflow".into())
                })?;
            }
            None => paid.push((subscription.id, offer.price)),
        }
    }
    for (subscription_id, amount) in &paid {
        payment::upsert_for_subscription(
            uow,
            *subscription_id,
            PaymentUpdate::captured(provider, *amount),
            now,
        )?;
    }
    let activated: Vec<SubscriptionId> = paid.into_iter().map(|(id, _)| id).collect();

    if let Some(first) = activated.first() {
        order.subscription_id = Some(*first);
        order.updated_at = now;
        uow.orders().update(&order)?;
    }

    invoice.new_subscription_fulfilled_at = Some(now);
    invoice.updated_at = now;
    uow.invoices().update(&invoice)?;
    tracing::info!(
        order_id = %order_id,
        invoice_id = %invoice.id,
        count = activated.len(),
        "new subscriptions fulfilled"
    );
    Ok(FulfillmentOutcome::Fulfilled { activated })
}
