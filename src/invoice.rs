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

//! Invoice lifecycle.
//!
//! ```text
//!  DRAFT ──issue──► ISSUED ──void──► VOID
//! ```
//!
//! An order has at most one acknowledgement (issued at pickup) and one final
//! invoice (issued at delivery). Subscription-purchase invoices skip the
//! draft stage. The document code is assigned at issue and never changes.

use crate::base::{BranchId, CustomerId, InvoiceId, OrderId, Paise, PlanId, SubscriptionId};
use crate::clock::CivilCalendar;
use crate::collaborators::{BranchDirectory, BrandingProvider, BrandingSnapshot};
use crate::error::SettlementError;
use crate::numbering;
use crate::order::Order;
use crate::repository::{UnitOfWork, constraint};
use crate::subscription::{self, Deduction, Subscription};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceType {
    Acknowledgement,
    Final,
    SubscriptionPurchase,
}

impl InvoiceType {
    pub fn code(self) -> &'static str {
        match self {
            Self::Acknowledgement => "ACK",
            Self::Final => "FIN",
            Self::SubscriptionPurchase => "SUB",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Issued,
    Void,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoicePaymentStatus {
    #[default]
    Due,
    Paid,
    Failed,
}

/// What funds the billed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderMode {
    #[default]
    Individual,
    SubscriptionOnly,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Service,
    Fee,
    AddOn,
    DryCleanItem,
    Discount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub item_type: ItemType,
    pub name: String,
    /// Kilograms or pieces.
    pub quantity: Decimal,
    pub unit_price: Paise,
    /// Signed; negative for discounts.
    pub amount: Paise,
}

/// The one entity an invoice bills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceSubject {
    Order(OrderId),
    Subscription(SubscriptionId),
}

/// Subscription allowance consumed by the billed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub subscription_id: SubscriptionId,
    pub pickups: u32,
    pub kg: Decimal,
    pub items: u32,
}

impl UsageSnapshot {
    pub fn deduction(&self) -> Deduction {
        Deduction {
            pickups: self.pickups,
            kg: self.kg,
            items: self.items,
        }
    }
}

/// One subscription sold as a line on an acknowledgement invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionOffer {
    pub plan_id: PlanId,
    pub quantity: u32,
    pub price: Paise,
    /// Civil date the allowance starts.
    pub valid_from: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSubscriptionSnapshot {
    pub offers: Vec<SubscriptionOffer>,
}

/// Everything a draft update replaces wholesale.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceContent {
    pub items: Vec<InvoiceItem>,
    pub subtotal: Paise,
    pub tax: Paise,
    pub discount: Paise,
    pub total: Paise,
    pub order_mode: OrderMode,
    pub subscription_usage: Option<UsageSnapshot>,
    pub comments: Option<String>,
    pub new_subscription: Option<NewSubscriptionSnapshot>,
}

impl InvoiceContent {
    /// # Errors
    ///
    /// Returns [`SettlementError::InvalidInput`] when totals do not add up,
    /// a line carries the wrong sign, or a new-subscription snapshot appears
    /// on anything but an acknowledgement.
    pub fn validate(&self, invoice_type: InvoiceType) -> Result<(), SettlementError> {
        let invalid = |msg: &str| Err(SettlementError::InvalidInput(msg.to_string()));
        if self.subtotal < 0 || self.tax < 0 || self.discount < 0 {
            return invalid("subtotal, tax and discount must not be negative");
        }
        let expected = self
            .subtotal
            .checked_add(self.tax)
            .and_then(|sum| sum.checked_sub(self.discount));
        match expected {
            None => return invalid("invoice amounts overflow"),
            Some(expected) if expected != self.total => {
                return invalid("total must equal subtotal + tax - discount");
            }
            Some(_) => {}
        }
        for item in &self.items {
            let wrong_sign = match item.item_type {
                ItemType::Discount => item.amount > 0,
                _ => item.amount < 0,
            };
            if wrong_sign {
                return Err(SettlementError::InvalidInput(format!(
                    "line '{}' has the wrong sign",
                    item.name
                )));
            }
            if item.quantity < Decimal::ZERO {
                return invalid("line quantity must not be negative");
            }
        }
        if let Some(usage) = &self.subscription_usage {
            if usage.kg < Decimal::ZERO {
                return invalid("usage kilograms must not be negative");
            }
        }
        if let Some(snapshot) = &self.new_subscription {
            if invoice_type != InvoiceType::Acknowledgement {
                return invalid("new subscriptions can only be sold on an acknowledgement");
            }
            if snapshot.offers.is_empty() {
                return invalid("new-subscription snapshot has no offers");
            }
            if snapshot.offers.iter().any(|o| o.quantity == 0 || o.price < 0) {
                return invalid("offers need quantity >= 1 and a non-negative price");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    /// Assigned at issue.
    pub code: Option<String>,
    pub invoice_type: InvoiceType,
    pub status: InvoiceStatus,
    pub subject: InvoiceSubject,
    pub customer_id: CustomerId,
    pub branch_id: Option<BranchId>,
    pub content: InvoiceContent,
    pub issued_at: Option<DateTime<Utc>>,
    pub voided_at: Option<DateTime<Utc>>,
    pub document_url: Option<String>,
    pub branding: Option<BrandingSnapshot>,
    /// Set once, after every offer in `content.new_subscription` is activated.
    pub new_subscription_fulfilled_at: Option<DateTime<Utc>>,
    pub payment_status: InvoicePaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    pub fn order_id(&self) -> Option<OrderId> {
        match self.subject {
            InvoiceSubject::Order(id) => Some(id),
            InvoiceSubject::Subscription(_) => None,
        }
    }
}

fn load(uow: &mut dyn UnitOfWork, id: InvoiceId) -> Result<Invoice, SettlementError> {
    uow.invoices()
        .get(id)?
        .ok_or(SettlementError::InvoiceNotFound(id))
}

fn load_order(uow: &mut dyn UnitOfWork, id: OrderId) -> Result<Order, SettlementError> {
    uow.orders().get(id)?.ok_or(SettlementError::OrderNotFound(id))
}

/// A usage snapshot may only name a subscription of the invoiced customer.
fn ensure_usage_owned(
    uow: &mut dyn UnitOfWork,
    customer: CustomerId,
    content: &InvoiceContent,
) -> Result<(), SettlementError> {
    if let Some(usage) = &content.subscription_usage {
        subscription::load_owned(uow, customer, usage.subscription_id)?;
    }
    Ok(())
}

fn ensure_eligible(order: &Order, invoice_type: InvoiceType) -> Result<(), SettlementError> {
    match invoice_type {
        InvoiceType::Acknowledgement if !order.eligible_for_acknowledgement() => Err(
            SettlementError::OrderNotEligible("acknowledgement needs a picked-up order".into()),
        ),
        InvoiceType::Final if !order.eligible_for_final() => Err(
            SettlementError::OrderNotEligible("final invoice needs a delivered order".into()),
        ),
        InvoiceType::SubscriptionPurchase => Err(SettlementError::InvalidInput(
            "subscription-purchase invoices are not drafted against orders".into(),
        )),
        _ => Ok(()),
    }
}

/// Creates the draft acknowledgement or final invoice for an order.
///
/// # Errors
///
/// - [`SettlementError::OrderNotEligible`] - Order has not reached pickup/delivery.
/// - [`SettlementError::Conflict`] - The order already has an invoice of this type.
/// - [`SettlementError::InvalidInput`] - Content fails validation.
/// - [`SettlementError::OwnershipMismatch`] - Usage snapshot names another
///   customer's subscription.
pub fn create_draft(
    uow: &mut dyn UnitOfWork,
    order_id: OrderId,
    invoice_type: InvoiceType,
    content: InvoiceContent,
    now: DateTime<Utc>,
) -> Result<Invoice, SettlementError> {
    let order = load_order(uow, order_id)?;
    ensure_eligible(&order, invoice_type)?;
    content.validate(invoice_type)?;
    ensure_usage_owned(uow, order.customer_id, &content)?;
    if uow
        .invoices()
        .find_by_order_and_type(order_id, invoice_type)?
        .is_some()
    {
        return Err(SettlementError::Conflict {
            constraint: constraint::INVOICE_ORDER_TYPE,
        });
    }

    let invoice = Invoice {
        id: uow.invoices().allocate_id(),
        code: None,
        invoice_type,
        status: InvoiceStatus::Draft,
        subject: InvoiceSubject::Order(order_id),
        customer_id: order.customer_id,
        branch_id: order.branch_id,
        content,
        issued_at: None,
        voided_at: None,
        document_url: None,
        branding: None,
        new_subscription_fulfilled_at: None,
        payment_status: InvoicePaymentStatus::Due,
        created_at: now,
        updated_at: now,
    };
    uow.invoices().insert(invoice.clone())?;
    Ok(invoice)
}

/// Replaces the full content of a draft.
///
/// # Errors
///
/// Returns [`SettlementError::InvoiceNotDraft`] once the invoice is issued or void.
pub fn update_draft(
    uow: &mut dyn UnitOfWork,
    invoice_id: InvoiceId,
    content: InvoiceContent,
    now: DateTime<Utc>,
) -> Result<Invoice, SettlementError> {
    let mut invoice = load(uow, invoice_id)?;
    if invoice.status != InvoiceStatus::Draft {
        return Err(SettlementError::InvoiceNotDraft);
    }
    content.validate(invoice.invoice_type)?;
    ensure_usage_owned(uow, invoice.customer_id, &content)?;
    invoice.content = content;
    invoice.updated_at = now;
    uow.invoices().update(&invoice)?;
    Ok(invoice)
}

/// Administrative correction of content, allowed on drafts and issued
/// invoices. Code, issue time and branding snapshot are left untouched.
///
/// # Errors
///
/// Returns [`SettlementError::InvoiceVoid`] for void invoices.
pub fn update_content(
    uow: &mut dyn UnitOfWork,
    invoice_id: InvoiceId,
    content: InvoiceContent,
    now: DateTime<Utc>,
) -> Result<Invoice, SettlementError> {
    let mut invoice = load(uow, invoice_id)?;
    if invoice.status == InvoiceStatus::Void {
        return Err(SettlementError::InvoiceVoid);
    }
    content.validate(invoice.invoice_type)?;
    ensure_usage_owned(uow, invoice.customer_id, &content)?;
    if invoice.status == InvoiceStatus::Issued {
        tracing::warn!(invoice_id = %invoice_id, code = ?invoice.code, "correcting issued invoice content");
    }
    invoice.content = content;
    invoice.updated_at = now;
    uow.invoices().update(&invoice)?;
    Ok(invoice)
}

/// Next code for `invoice_type` under the branch prefix and fiscal year of `now`.
fn next_code(
    uow: &mut dyn UnitOfWork,
    invoice_type: InvoiceType,
    branch_id: Option<BranchId>,
    branches: &dyn BranchDirectory,
    placeholder: &str,
    calendar: &CivilCalendar,
    now: DateTime<Utc>,
) -> Result<String, SettlementError> {
    let branch_name = branch_id.and_then(|id| branches.branch(id)).map(|b| b.name);
    let prefix = numbering::branch_prefix(branch_name.as_deref(), placeholder);
    let fiscal_year = calendar.fiscal_year_of(calendar.civil_date(now));
    let sequence = uow
        .invoices()
        .count_with_code_stem(&numbering::invoice_code_stem(&prefix, invoice_type, fiscal_year))?
        + 1;
    Ok(numbering::invoice_code(&prefix, invoice_type, fiscal_year, sequence))
}

/// Collaborators consulted while issuing.
pub struct IssueContext<'a> {
    pub branches: &'a dyn BranchDirectory,
    pub branding: &'a dyn BrandingProvider,
    pub placeholder_branch_code: &'a str,
    pub calendar: &'a CivilCalendar,
}

/// Issues a draft: stamps `issued_at`, assigns the code and freezes branding.
///
/// A final invoice carrying a usage snapshot also charges that subscription,
/// tagged with this invoice, unless the order was already metered against it.
///
/// # Errors
///
/// - [`SettlementError::InvoiceNotDraft`] - Already issued or void; a second
///   issue never re-numbers or re-charges.
/// - [`SettlementError::OrderNotEligible`] - Order regressed (e.g. cancelled).
/// - [`SettlementError::Conflict`] - Code collision; retryable.
/// - Any charging error from [`subscription::charge`].
pub fn issue(
    uow: &mut dyn UnitOfWork,
    invoice_id: InvoiceId,
    ctx: &IssueContext<'_>,
    now: DateTime<Utc>,
) -> Result<Invoice, SettlementError> {
    let mut invoice = load(uow, invoice_id)?;
    if invoice.status != InvoiceStatus::Draft {
        return Err(SettlementError::InvoiceNotDraft);
    }
    if let Some(order_id) = invoice.order_id() {
        let order = load_order(uow, order_id)?;
        ensure_eligible(&order, invoice.invoice_type)?;
    }

    invoice.code = Some(next_code(
        uow,
        invoice.invoice_type,
        invoice.branch_id,
        ctx.branches,
        ctx.placeholder_branch_code,
        ctx.calendar,
        now,
    )?);
    invoice.status = InvoiceStatus::Issued;
    invoice.issued_at = Some(now);
    invoice.branding = Some(ctx.branding.snapshot(invoice.branch_id));
    invoice.updated_at = now;
    uow.invoices().update(&invoice)?;

    if let (InvoiceType::Final, Some(order_id), Some(usage)) = (
        invoice.invoice_type,
        invoice.order_id(),
        invoice.content.subscription_usage,
    ) {
        let already_metered = uow
            .usages()
            .find_by_order_and_subscription(order_id, usage.subscription_id)?
            .is_some();
        if already_metered {
            tracing::debug!(order_id = %order_id, subscription_id = %usage.subscription_id, "order already metered");
        } else {
            subscription::charge(
                uow,
                order_id,
                usage.subscription_id,
                usage.deduction(),
                Some(invoice.id),
                now,
            )?;
        }
    }
    Ok(invoice)
}

/// # Errors
///
/// - [`SettlementError::InvoiceNotIssued`] - Drafts cannot be voided.
/// - [`SettlementError::InvoiceVoid`] - Already void.
pub fn void(
    uow: &mut dyn UnitOfWork,
    invoice_id: InvoiceId,
    now: DateTime<Utc>,
) -> Result<Invoice, SettlementError> {
    let mut invoice = load(uow, invoice_id)?;
    match invoice.status {
        InvoiceStatus::Draft => return Err(SettlementError::InvoiceNotIssued),
        InvoiceStatus::Void => return Err(SettlementError::InvoiceVoid),
        InvoiceStatus::Issued => {}
    }
    invoice.status = InvoiceStatus::Void;
    invoice.voided_at = Some(now);
    invoice.updated_at = now;
    uow.invoices().update(&invoice)?;
    Ok(invoice)
}

/// Stores the rendered-document reference. Writable in every status.
///
/// # Errors
///
/// Returns [`SettlementError::InvoiceNotFound`] for unknown invoices.
pub fn attach_document(
    uow: &mut dyn UnitOfWork,
    invoice_id: InvoiceId,
    url: String,
    now: DateTime<Utc>,
) -> Result<Invoice, SettlementError> {
    let mut invoice = load(uow, invoice_id)?;
    invoice.document_url = Some(url);
    invoice.updated_at = now;
    uow.invoices().update(&invoice)?;
    Ok(invoice)
}

/// # Errors
///
/// Returns [`SettlementError::InvoiceNotFound`] for unknown invoices.
pub fn set_payment_status(
    uow: &mut dyn UnitOfWork,
    invoice_id: InvoiceId,
    status: InvoicePaymentStatus,
    now: DateTime<Utc>,
) -> Result<Invoice, SettlementError> {
    let mut invoice = load(uow, invoice_id)?;
    invoice.payment_status = status;
    invoice.updated_at = now;
    uow.invoices().update(&invoice)?;
    Ok(invoice)
}

/// Creates an already-issued, already-paid invoice for a direct purchase.
///
/// # Errors
///
/// - [`SettlementError::NegativeAmount`] - Negative price.
/// - [`SettlementError::Conflict`] - Code collision; retryable.
pub fn create_subscription_purchase(
    uow: &mut dyn UnitOfWork,
    subscription: &Subscription,
    plan_name: &str,
    quantity: u32,
    amount: Paise,
    ctx: &IssueContext<'_>,
    now: DateTime<Utc>,
) -> Result<Invoice, SettlementError> {
    if amount < 0 {
        return Err(SettlementError::NegativeAmount);
    }
    let quantity_dec = Decimal::from(quantity.max(1));
    let content = InvoiceContent {
        items: vec![InvoiceItem {
            item_type: ItemType::Service,
            name: plan_name.to_string(),
            quantity: quantity_dec,
            unit_price: amount / i64::from(quantity.max(1)),
            amount,
        }],
        subtotal: amount,
        tax: 0,
        discount: 0,
        total: amount,
        order_mode: OrderMode::SubscriptionOnly,
        subscription_usage: None,
        comments: None,
        new_subscription: None,
    };
    content.validate(InvoiceType::SubscriptionPurchase)?;

    let code = next_code(
        uow,
        InvoiceType::SubscriptionPurchase,
        subscription.branch_id,
        ctx.branches,
        ctx.placeholder_branch_code,
        ctx.calendar,
        now,
    )?;
    let invoice = Invoice {
        id: uow.invoices().allocate_id(),
        code: Some(code),
        invoice_type: InvoiceType::SubscriptionPurchase,
        status: InvoiceStatus::Issued,
        subject: InvoiceSubject::Subscription(subscription.id),
        customer_id: subscription.customer_id,
        branch_id: subscription.branch_id,
        content,
        issued_at: Some(now),
        voided_at: None,
        document_url: None,
        branding: Some(ctx.branding.snapshot(subscription.branch_id)),
        new_subscription_fulfilled_at: None,
        payment_status: InvoicePaymentStatus::Paid,
        created_at: now,
        updated_at: now,
    };
    uow.invoices().insert(invoice.clone())?;
    Ok(invoice)
}
