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

//! Payment reconciliation.
//!
//! A payment belongs to exactly one order or exactly one subscription, and
//! each of those owns at most one payment row. Updates are upserts keyed by
//! the owner, so a provider callback delivered twice rewrites the same row.

use crate::base::{OrderId, Paise, PaymentId, SubscriptionId};
use crate::error::SettlementError;
use crate::repository::UnitOfWork;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Captured,
    Failed,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Captured => "captured",
            Self::Failed => "failed",
        })
    }
}

impl FromStr for PaymentStatus {
    type Err = SettlementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "captured" => Ok(Self::Captured),
            "failed" => Ok(Self::Failed),
            other => Err(SettlementError::InvalidInput(format!(
                "unknown payment status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentProvider {
    Cash,
    Upi,
    Card,
    Gateway,
}

impl FromStr for PaymentProvider {
    type Err = SettlementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cash" => Ok(Self::Cash),
            "upi" => Ok(Self::Upi),
            "card" => Ok(Self::Card),
            "gateway" => Ok(Self::Gateway),
            other => Err(SettlementError::InvalidInput(format!(
                "unknown payment provider: {other}"
            ))),
        }
    }
}

/// The owner of a payment row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentSubject {
    Order(OrderId),
    Subscription(SubscriptionId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub subject: PaymentSubject,
    pub provider: PaymentProvider,
    pub status: PaymentStatus,
    pub amount: Paise,
    pub provider_order_ref: Option<String>,
    pub provider_payment_ref: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A provider's report on a payment attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentUpdate {
    pub provider: PaymentProvider,
    pub status: PaymentStatus,
    pub amount: Paise,
    pub provider_order_ref: Option<String>,
    pub provider_payment_ref: Option<String>,
    pub failure_reason: Option<String>,
}

impl PaymentUpdate {
    pub fn captured(provider: PaymentProvider, amount: Paise) -> Self {
        Self {
            provider,
            status: PaymentStatus::Captured,
            amount,
            provider_order_ref: None,
            provider_payment_ref: None,
            failure_reason: None,
        }
    }
}

/// Inserts or rewrites the payment row for `subject`. Creation time and id
/// survive a rewrite.
fn upsert(
    uow: &mut dyn UnitOfWork,
    subject: PaymentSubject,
    update: PaymentUpdate,
    now: DateTime<Utc>,
) -> Result<Payment, SettlementError> {
    if update.amount < 0 {
        return Err(SettlementError::NegativeAmount);
    }
    let existing = uow.payments().find(subject)?;
    let payment = Payment {
        id: match &existing {
            Some(p) => p.id,
            None => uow.payments().allocate_id(),
        },
        subject,
        provider: update.provider,
        status: update.status,
        amount: update.amount,
        provider_order_ref: update.provider_order_ref,
        provider_payment_ref: update.provider_payment_ref,
        failure_reason: update.failure_reason,
        created_at: existing.as_ref().map_or(now, |p| p.created_at),
        updated_at: now,
    };
    uow.payments().upsert(payment.clone())?;
    Ok(payment)
}

/// Upserts the order's payment and mirrors its status onto the order.
///
/// # Errors
///
/// - [`SettlementError::NegativeAmount`] - Amount below zero.
/// - [`SettlementError::OrderNotFound`] - Unknown order.
pub fn update_payment_status(
    uow: &mut dyn UnitOfWork,
    order_id: OrderId,
    update: PaymentUpdate,
    now: DateTime<Utc>,
) -> Result<Payment, SettlementError> {
    if update.amount < 0 {
        return Err(SettlementError::NegativeAmount);
    }
    let mut order = uow
        .orders()
        .get(order_id)?
        .ok_or(SettlementError::OrderNotFound(order_id))?;
    let payment = upsert(uow, PaymentSubject::Order(order_id), update, now)?;
    order.payment_status = Some(payment.status);
    order.updated_at = now;
    uow.orders().update(&order)?;
    tracing::info!(
        order_id = %order_id,
        status = %payment.status,
        amount = payment.amount,
        "order payment recorded"
    );
    Ok(payment)
}

/// Upserts the payment row owned by a subscription.
///
/// # Errors
///
/// - [`SettlementError::NegativeAmount`] - Amount below zero.
/// - [`SettlementError::SubscriptionNotFound`] - Unknown subscription.
pub fn upsert_for_subscription(
    uow: &mut dyn UnitOfWork,
    subscription_id: SubscriptionId,
    update: PaymentUpdate,
    now: DateTime<Utc>,
) -> Result<Payment, SettlementError> {
    if uow.subscriptions().get(subscription_id)?.is_none() {
        return Err(SettlementError::SubscriptionNotFound(subscription_id));
    }
    upsert(uow, PaymentSubject::Subscription(subscription_id), update, now)
}
