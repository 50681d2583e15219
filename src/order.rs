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

//! Orders and the fulfillment state machine.
//!
//! ```text
//!  BOOKING_CONFIRMED ─► PICKUP_SCHEDULED ─► PICKED_UP ─► IN_PROCESSING ─► READY ─► OUT_FOR_DELIVERY ─► DELIVERED
//!         │                   │                 │              │            │              │
//!         └───────────────────┴─────────────────┴──────────────┴────────────┴──────────────┴──► CANCELLED
//! ```
//!
//! The machine is a recorder: under [`TransitionPolicy::Permissive`] any
//! status may follow any non-terminal status. Once an order is `DELIVERED`
//! or `CANCELLED` no further status or timestamp is written.

use crate::base::{AddressId, BranchId, CustomerId, OrderId, SubscriptionId};
use crate::clock::CivilCalendar;
use crate::config::TransitionPolicy;
use crate::error::SettlementError;
use crate::numbering;
use crate::payment::PaymentStatus;
use crate::repository::UnitOfWork;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    BookingConfirmed,
    PickupScheduled,
    PickedUp,
    InProcessing,
    Ready,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    /// Position along the fulfillment chain. `None` for `Cancelled`.
    fn stage(self) -> Option<u8> {
        match self {
            Self::BookingConfirmed => Some(0),
            Self::PickupScheduled => Some(1),
            Self::PickedUp => Some(2),
            Self::InProcessing => Some(3),
            Self::Ready => Some(4),
            Self::OutForDelivery => Some(5),
            Self::Delivered => Some(6),
            Self::Cancelled => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BookingConfirmed => "BOOKING_CONFIRMED",
            Self::PickupScheduled => "PICKUP_SCHEDULED",
            Self::PickedUp => "PICKED_UP",
            Self::InProcessing => "IN_PROCESSING",
            Self::Ready => "READY",
            Self::OutForDelivery => "OUT_FOR_DELIVERY",
            Self::Delivered => "DELIVERED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = SettlementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s.trim().to_ascii_uppercase().as_str() {
            "BOOKING_CONFIRMED" => Self::BookingConfirmed,
            "PICKUP_SCHEDULED" => Self::PickupScheduled,
            "PICKED_UP" => Self::PickedUp,
            "IN_PROCESSING" => Self::InProcessing,
            "READY" => Self::Ready,
            "OUT_FOR_DELIVERY" => Self::OutForDelivery,
            "DELIVERED" => Self::Delivered,
            "CANCELLED" => Self::Cancelled,
            other => {
                return Err(SettlementError::InvalidInput(format!(
                    "unknown order status: {other}"
                )));
            }
        };
        Ok(status)
    }
}

/// How an order is paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Individual,
    Subscription,
    Mixed,
}

impl OrderKind {
    pub fn uses_subscription(self) -> bool {
        !matches!(self, Self::Individual)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSource {
    Online,
    WalkIn,
}

impl OrderSource {
    /// Two-letter suffix used in order codes.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Online => "ON",
            Self::WalkIn => "WI",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    WashAndFold,
    WashAndIron,
    DryClean,
    SteamIron,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// One slot per status that carries a timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTimestamps {
    pub confirmed_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub in_progress_at: Option<DateTime<Utc>>,
    pub ready_at: Option<DateTime<Utc>>,
    pub out_for_delivery_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl StatusTimestamps {
    fn slot_mut(&mut self, status: OrderStatus) -> Option<&mut Option<DateTime<Utc>>> {
        match status {
            OrderStatus::BookingConfirmed => Some(&mut self.confirmed_at),
            OrderStatus::PickedUp => Some(&mut self.picked_up_at),
            OrderStatus::InProcessing => Some(&mut self.in_progress_at),
            OrderStatus::Ready => Some(&mut self.ready_at),
            OrderStatus::OutForDelivery => Some(&mut self.out_for_delivery_at),
            OrderStatus::Delivered => Some(&mut self.delivered_at),
            OrderStatus::PickupScheduled | OrderStatus::Cancelled => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    /// `BBBDDMMYYYYNNNNSS`, see [`numbering::order_code`].
    pub code: String,
    pub customer_id: CustomerId,
    pub kind: OrderKind,
    pub services: Vec<ServiceType>,
    pub address_id: AddressId,
    pub pincode: String,
    pub pickup_date: NaiveDate,
    pub pickup_window: TimeWindow,
    pub requested_weight_kg: Option<Decimal>,
    pub actual_weight_kg: Option<Decimal>,
    pub status: OrderStatus,
    pub subscription_id: Option<SubscriptionId>,
    pub branch_id: Option<BranchId>,
    pub payment_status: Option<PaymentStatus>,
    pub timestamps: StatusTimestamps,
    pub cancellation: Option<Cancellation>,
    pub source: OrderSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Not yet delivered or cancelled.
    pub fn is_in_flight(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Picked up (or any later stage was ever stamped) and not cancelled.
    pub fn eligible_for_acknowledgement(&self) -> bool {
        let t = &self.timestamps;
        self.status != OrderStatus::Cancelled
            && (t.picked_up_at.is_some()
                || t.in_progress_at.is_some()
                || t.ready_at.is_some()
                || t.out_for_delivery_at.is_some()
                || t.delivered_at.is_some())
    }

    pub fn eligible_for_final(&self) -> bool {
        self.status == OrderStatus::Delivered && self.timestamps.delivered_at.is_some()
    }

    /// Applies a status change. Returns `false` when nothing was written.
    ///
    /// # Errors
    ///
    /// Under [`TransitionPolicy::Strict`], returns
    /// [`SettlementError::InvalidTransition`] for anything but a forward
    /// move or a cancellation of a non-terminal order.
    pub fn apply_status(
        &mut self,
        new_status: OrderStatus,
        cancellation_reason: Option<String>,
        now: DateTime<Utc>,
        policy: TransitionPolicy,
    ) -> Result<bool, SettlementError> {
        let current = self.status;
        if current.is_terminal() {
            return match policy {
                TransitionPolicy::Permissive => Ok(false),
                TransitionPolicy::Strict => Err(invalid_transition(current, new_status)),
            };
        }
        if policy == TransitionPolicy::Strict {
            match (current.stage(), new_status.stage()) {
                _ if current == new_status => return Ok(false),
                (_, None) => {}
                (Some(from), Some(to)) if to > from => {}
                _ => return Err(invalid_transition(current, new_status)),
            }
        }

        self.status = new_status;
        if let Some(slot) = self.timestamps.slot_mut(new_status) {
            *slot = Some(now);
        }
        if new_status == OrderStatus::Cancelled {
            self.cancellation = Some(Cancellation {
                reason: cancellation_reason,
                at: now,
            });
        }
        self.updated_at = now;
        Ok(true)
    }
}

fn invalid_transition(from: OrderStatus, to: OrderStatus) -> SettlementError {
    SettlementError::InvalidTransition {
        from: from.to_string(),
        to: to.to_string(),
    }
}

/// Everything a booking action supplies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub customer_id: CustomerId,
    pub kind: OrderKind,
    pub services: Vec<ServiceType>,
    pub address_id: AddressId,
    pub pincode: String,
    pub pickup_date: NaiveDate,
    pub pickup_window: TimeWindow,
    pub requested_weight_kg: Option<Decimal>,
    pub subscription_id: Option<SubscriptionId>,
    /// Explicit branch; otherwise resolved from the pincode or the default branch.
    pub branch_id: Option<BranchId>,
    pub source: OrderSource,
}

impl BookingRequest {
    fn validate(&self) -> Result<(), SettlementError> {
        if self.services.is_empty() {
            return Err(SettlementError::InvalidInput(
                "at least one service type is required".into(),
            ));
        }
        if self.pickup_window.start >= self.pickup_window.end {
            return Err(SettlementError::InvalidInput(
                "pickup window must end after it starts".into(),
            ));
        }
        if self.requested_weight_kg.is_some_and(|kg| kg < Decimal::ZERO) {
            return Err(SettlementError::InvalidInput(
                "requested weight must not be negative".into(),
            ));
        }
        match (self.kind.uses_subscription(), self.subscription_id) {
            (true, None) => Err(SettlementError::InvalidInput(
                "subscription-funded order needs a subscription".into(),
            )),
            (false, Some(_)) => Err(SettlementError::InvalidInput(
                "individual order cannot reference a subscription".into(),
            )),
            _ => Ok(()),
        }
    }
}

/// Creates an order, numbering it inside the caller's unit of work.
///
/// The daily sequence of the code stem is read and the row inserted in the same unit,
/// so a store that serializes units (or rejects the duplicate code) never
/// hands out the same code twice.
///
/// # Errors
///
/// - [`SettlementError::InvalidInput`] - Malformed request.
/// - [`SettlementError::SubscriptionNotFound`] / [`SettlementError::OwnershipMismatch`] -
///   Referenced subscription is missing or belongs to someone else.
/// - [`SettlementError::SubscriptionBusy`] - It already funds an in-flight order.
/// - [`SettlementError::Conflict`] - Code collision; retryable.
pub fn book(
    uow: &mut dyn UnitOfWork,
    request: BookingRequest,
    branch: Option<(BranchId, &str)>,
    placeholder_branch_code: &str,
    calendar: &CivilCalendar,
    now: DateTime<Utc>,
) -> Result<Order, SettlementError> {
    request.validate()?;

    if let Some(subscription_id) = request.subscription_id {
        let subscription = uow
            .subscriptions()
            .get(subscription_id)?
            .ok_or(SettlementError::SubscriptionNotFound(subscription_id))?;
        if subscription.customer_id != request.customer_id {
            return Err(SettlementError::OwnershipMismatch);
        }
        subscription.ensure_usable(now)?;
        let busy = uow
            .orders()
            .list_by_subscription(subscription_id)?
            .iter()
            .any(Order::is_in_flight);
        if busy {
            return Err(SettlementError::SubscriptionBusy);
        }
    }

    let branch_id = branch.map(|(id, _)| id);
    let prefix = numbering::branch_prefix(branch.map(|(_, name)| name), placeholder_branch_code);
    let date = calendar.civil_date(now);
    let sequence = uow
        .orders()
        .count_with_code_stem(&numbering::order_code_stem(&prefix, date))?
        + 1;

    let order = Order {
        id: uow.orders().allocate_id(),
        code: numbering::order_code(&prefix, date, sequence, request.source),
        customer_id: request.customer_id,
        kind: request.kind,
        services: request.services,
        address_id: request.address_id,
        pincode: request.pincode,
        pickup_date: request.pickup_date,
        pickup_window: request.pickup_window,
        requested_weight_kg: request.requested_weight_kg,
        actual_weight_kg: None,
        status: OrderStatus::BookingConfirmed,
        subscription_id: request.subscription_id,
        branch_id,
        payment_status: None,
        timestamps: StatusTimestamps {
            confirmed_at: Some(now),
            ..StatusTimestamps::default()
        },
        cancellation: None,
        source: request.source,
        created_at: now,
        updated_at: now,
    };
    uow.orders().insert(order.clone())?;
    Ok(order)
}

/// Looks up the order, writes the new status and stamps its slot.
///
/// # Errors
///
/// - [`SettlementError::OrderNotFound`] - No such order.
/// - [`SettlementError::InvalidTransition`] - Rejected under the strict policy.
pub fn update_status(
    uow: &mut dyn UnitOfWork,
    order_id: OrderId,
    new_status: OrderStatus,
    cancellation_reason: Option<String>,
    now: DateTime<Utc>,
    policy: TransitionPolicy,
) -> Result<Order, SettlementError> {
    let mut order = uow
        .orders()
        .get(order_id)?
        .ok_or(SettlementError::OrderNotFound(order_id))?;
    if order.apply_status(new_status, cancellation_reason, now, policy)? {
        uow.orders().update(&order)?;
    } else {
        tracing::debug!(
            order_id = %order_id,
            status = %order.status,
            requested = %new_status,
            "status change not recorded"
        );
    }
    Ok(order)
}
