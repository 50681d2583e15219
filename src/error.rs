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

//! Error types for settlement processing.
//!
//! Every failure is one variant of [`SettlementError`]. Each variant belongs to
//! exactly one [`ErrorKind`], and [`ErrorKind::http_status`] is the only place
//! a kind is turned into a caller-visible status.

use crate::base::{InvoiceId, OrderId, PlanId, SubscriptionId};
use crate::repository::constraint;
use http::StatusCode;
use thiserror::Error;

/// Settlement processing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettlementError {
    /// Payment amount is negative
    #[error("invalid amount (must not be negative)")]
    NegativeAmount,

    /// Malformed or inverted date range
    #[error("invalid date range: {0}")]
    InvalidDateRange(String),

    /// Any other malformed input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Single-use plan already held by this customer at some point
    #[error("plan {0} has already been redeemed by this customer")]
    PlanAlreadyRedeemed(PlanId),

    #[error("subscription has expired")]
    SubscriptionExpired,

    #[error("subscription is not active")]
    SubscriptionInactive,

    /// Deduction would exceed a ceiling or drive remaining pickups below zero
    #[error("insufficient subscription allowance: {0}")]
    InsufficientAllowance(String),

    /// Subscription already funds an order that is still in flight
    #[error("subscription already funds an in-flight order")]
    SubscriptionBusy,

    #[error("invoice is not a draft")]
    InvoiceNotDraft,

    #[error("invoice is not issued")]
    InvoiceNotIssued,

    #[error("invoice is void")]
    InvoiceVoid,

    /// Order has not reached the state the operation requires
    #[error("order not eligible: {0}")]
    OrderNotEligible(String),

    /// Transition rejected under the strict transition policy
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Direct purchase attempted without a captured payment
    #[error("payment has not been captured")]
    PaymentNotCaptured,

    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("subscription {0} not found")]
    SubscriptionNotFound(SubscriptionId),

    #[error("invoice {0} not found")]
    InvoiceNotFound(InvoiceId),

    #[error("plan {0} not found")]
    PlanNotFound(PlanId),

    /// Caller's customer does not own the referenced entity
    #[error("resource belongs to another customer")]
    OwnershipMismatch,

    /// Usage already recorded for this (order, subscription) or (invoice, subscription)
    #[error("subscription usage already recorded")]
    DuplicateUsage,

    /// Any other uniqueness violation surfaced by the store
    #[error("conflicting record ({constraint})")]
    Conflict { constraint: &'static str },

    /// Unexpected persistence failure. The detail is for logs only.
    #[error("internal storage failure")]
    Storage(String),
}

/// Caller-visible classification of a [`SettlementError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    BusinessRule,
    NotFound,
    Forbidden,
    Conflict,
    Internal,
}

impl ErrorKind {
    /// The single kind-to-status table used at the API boundary.
    pub fn http_status(self) -> StatusCode {
        match self {
            Self::Validation => StatusCode::BAD_REQUEST,
            Self::BusinessRule => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Conflict => StatusCode::CONFLICT,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl SettlementError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NegativeAmount | Self::InvalidDateRange(_) | Self::InvalidInput(_) => {
                ErrorKind::Validation
            }
            Self::PlanAlreadyRedeemed(_)
            | Self::SubscriptionExpired
            | Self::SubscriptionInactive
            | Self::InsufficientAllowance(_)
            | Self::SubscriptionBusy
            | Self::InvoiceNotDraft
            | Self::InvoiceNotIssued
            | Self::InvoiceVoid
            | Self::OrderNotEligible(_)
            | Self::InvalidTransition { .. }
            | Self::PaymentNotCaptured => ErrorKind::BusinessRule,
            Self::OrderNotFound(_)
            | Self::SubscriptionNotFound(_)
            | Self::InvoiceNotFound(_)
            | Self::PlanNotFound(_) => ErrorKind::NotFound,
            Self::OwnershipMismatch => ErrorKind::Forbidden,
            Self::DuplicateUsage | Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Storage(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NegativeAmount => "NEGATIVE_AMOUNT",
            Self::InvalidDateRange(_) => "INVALID_DATE_RANGE",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::PlanAlreadyRedeemed(_) => "PLAN_ALREADY_REDEEMED",
            Self::SubscriptionExpired => "SUBSCRIPTION_EXPIRED",
            Self::SubscriptionInactive => "SUBSCRIPTION_INACTIVE",
            Self::InsufficientAllowance(_) => "INSUFFICIENT_ALLOWANCE",
            Self::SubscriptionBusy => "SUBSCRIPTION_BUSY",
            Self::InvoiceNotDraft => "INVOICE_NOT_DRAFT",
            Self::InvoiceNotIssued => "INVOICE_NOT_ISSUED",
            Self::InvoiceVoid => "INVOICE_VOID",
            Self::OrderNotEligible(_) => "ORDER_NOT_ELIGIBLE",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::PaymentNotCaptured => "PAYMENT_NOT_CAPTURED",
            Self::OrderNotFound(_) => "ORDER_NOT_FOUND",
            Self::SubscriptionNotFound(_) => "SUBSCRIPTION_NOT_FOUND",
            Self::InvoiceNotFound(_) => "INVOICE_NOT_FOUND",
            Self::PlanNotFound(_) => "PLAN_NOT_FOUND",
            Self::OwnershipMismatch => "OWNERSHIP_MISMATCH",
            Self::DuplicateUsage => "DUPLICATE_USAGE",
            Self::Conflict { .. } => "CONFLICT",
            Self::Storage(_) => "INTERNAL_ERROR",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        self.kind().http_status()
    }

    /// Numbering collisions are safe to retry in a fresh unit of work.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict {
                constraint: constraint::ORDER_CODE | constraint::INVOICE_CODE
            }
        )
    }
}

/// Errors raised by repository implementations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(&'static str),

    #[error("row missing from {0}")]
    MissingRow(&'static str),

    #[error("backend failure: {0}")]
    Backend(String),
}

impl From<StoreError> for SettlementError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation(
                constraint::USAGE_ORDER_SUBSCRIPTION | constraint::USAGE_INVOICE_SUBSCRIPTION,
            ) => SettlementError::DuplicateUsage,
            StoreError::UniqueViolation(constraint) => SettlementError::Conflict { constraint },
            other => SettlementError::Storage(other.to_string()),
        }
    }
}
