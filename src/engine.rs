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

//! Settlement engine.
//!
//! The [`SettlementEngine`] is the entry point for every use case. Each call
//! runs inside exactly one unit of work on the configured [`LedgerStore`], so
//! either all of its writes land or none do.
//!
//! # Use Cases
//!
//! - **Orders**: booking with branch-scoped daily numbering, status changes.
//! - **Subscriptions**: usage listing, metering, renewal, direct purchase.
//! - **Invoices**: drafting, issue with fiscal-year numbering, void, rendering.
//! - **Payments**: reconciliation, and on capture the fulfillment of
//!   subscriptions sold on the acknowledgement invoice.
//! - **Reporting**: revenue date ranges.
//!
//! # Thread Safety
//!
//! The engine holds no mutable state of its own. Concurrency control is the
//! store's job; units that collide on a document number are retried.

use crate::base::{AddressId, BranchId, CustomerId, InvoiceId, OrderId, PlanId, SubscriptionId};
use crate::clock::{CivilCalendar, Clock};
use crate::collaborators::{
    BranchDirectory, BrandingProvider, Directory, DocumentRenderer, PlanCatalog, RenderedDocument,
};
use crate::config::EngineConfig;
use crate::error::SettlementError;
use crate::fulfillment::{self, FulfillmentOutcome, Grant};
use crate::invoice::{
    self, Invoice, InvoiceContent, InvoicePaymentStatus, InvoiceStatus, InvoiceType, IssueContext,
};
use crate::order::{self, BookingRequest, Order, OrderStatus};
use crate::payment::{self, Payment, PaymentProvider, PaymentStatus, PaymentSubject, PaymentUpdate};
use crate::repository::{LedgerStore, UnitOfWork};
use crate::revenue::{self, RevenuePeriod, RevenueRange};
use crate::subscription::{
    self, Deduction, ExtendTerms, Subscription, SubscriptionUsage, UsableSubscription, UsageTotals,
};
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;

/// External lookups and rendering the engine consults.
#[derive(Clone)]
pub struct Collaborators {
    pub branches: Arc<dyn BranchDirectory>,
    pub plans: Arc<dyn PlanCatalog>,
    pub branding: Arc<dyn BrandingProvider>,
    pub renderer: Arc<dyn DocumentRenderer>,
}

impl Collaborators {
    /// One [`Directory`] serving branches, plans and branding.
    pub fn from_directory(directory: Arc<Directory>, renderer: Arc<dyn DocumentRenderer>) -> Self {
        Self {
            branches: directory.clone(),
            plans: directory.clone(),
            branding: directory,
            renderer,
        }
    }
}

/// A direct subscription purchase at checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseRequest {
    pub customer_id: CustomerId,
    pub plan_id: PlanId,
    pub quantity: u32,
    /// Civil date the allowance starts, for a new subscription.
    pub valid_from: NaiveDate,
    pub address_id: Option<AddressId>,
    pub branch_id: Option<BranchId>,
    /// Must already be captured.
    pub payment: PaymentUpdate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Purchase {
    pub subscription: Subscription,
    pub invoice: Invoice,
    pub payment: Payment,
}

/// Result of [`SettlementEngine::capture_order_payment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureOutcome {
    pub payment: Payment,
    /// `None` when the payment was not captured.
    pub fulfillment: Option<FulfillmentOutcome>,
}

/// Orchestrates every settlement use case over a [`LedgerStore`].
///
/// # Invariants
///
/// - Every public operation is one unit of work, except
///   [`capture_order_payment`](Self::capture_order_payment) which is two.
/// - Order and invoice codes are counted and written in the same unit.
/// - A subscription is never charged twice for one order or one invoice.
pub struct SettlementEngine<S: LedgerStore> {
    store: S,
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    calendar: CivilCalendar,
}

impl<S: LedgerStore> SettlementEngine<S> {
    /// # Errors
    ///
    /// Returns [`SettlementError::InvalidInput`] for an invalid configuration.
    pub fn new(
        store: S,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Result<Self, SettlementError> {
        config.validate()?;
        let calendar = config.calendar()?;
        Ok(Self {
            store,
            collaborators,
            clock,
            config,
            calendar,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn calendar(&self) -> &CivilCalendar {
        &self.calendar
    }

    fn issue_context(&self) -> IssueContext<'_> {
        IssueContext {
            branches: self.collaborators.branches.as_ref(),
            branding: self.collaborators.branding.as_ref(),
            placeholder_branch_code: &self.config.placeholder_branch_code,
            calendar: &self.calendar,
        }
    }

    /// One unit of work stamped with the current time.
    fn unit<T>(
        &self,
        label: &'static str,
        work: impl FnOnce(&mut dyn UnitOfWork, DateTime<Utc>) -> Result<T, SettlementError>,
    ) -> Result<T, SettlementError> {
        let now = self.clock.now();
        self.store.transaction(label, |uow| work(uow, now))
    }

    /// Like [`unit`](Self::unit), retrying numbering collisions in a fresh
    /// unit up to `numbering_attempts` times.
    fn numbered<T>(
        &self,
        label: &'static str,
        mut work: impl FnMut(&mut dyn UnitOfWork, DateTime<Utc>) -> Result<T, SettlementError>,
    ) -> Result<T, SettlementError> {
        let attempts = self.config.numbering_attempts.max(1);
        let mut attempt = 1;
        loop {
            let now = self.clock.now();
            match self.store.transaction(label, |uow| work(uow, now)) {
                Err(err) if err.is_retryable() && attempt < attempts => {
                    tracing::warn!(unit = label, attempt, error = %err, "numbering collision, retrying");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    // ---- orders ----

    /// Books an order.
    ///
    /// The branch is the explicit one on the request, else the branch serving
    /// the pincode, else the default branch, else none (placeholder code).
    ///
    /// # Errors
    ///
    /// - [`SettlementError::InvalidInput`] - Malformed request or unknown branch.
    /// - [`SettlementError::OwnershipMismatch`] - Subscription belongs to another customer.
    /// - [`SettlementError::SubscriptionBusy`] - Subscription funds an in-flight order.
    /// - [`SettlementError::Conflict`] - Numbering still colliding after every retry.
    pub fn book_order(&self, request: BookingRequest) -> Result<Order, SettlementError> {
        let branch = self
            .collaborators
            .branches
            .resolve(request.branch_id, &request.pincode)?;
        let branch_ref = branch.as_ref().map(|b| (b.id, b.name.as_str()));
        let order = self.numbered("book_order", |uow, now| {
            order::book(
                uow,
                request.clone(),
                branch_ref,
                &self.config.placeholder_branch_code,
                &self.calendar,
                now,
            )
        })?;
        tracing::info!(
            order_id = %order.id,
            code = %order.code,
            customer_id = %order.customer_id,
            "order booked"
        );
        Ok(order)
    }

    /// # Errors
    ///
    /// - [`SettlementError::OrderNotFound`] - No such order.
    /// - [`SettlementError::InvalidTransition`] - Rejected by the strict policy.
    pub fn update_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
        cancellation_reason: Option<String>,
    ) -> Result<Order, SettlementError> {
        let policy = self.config.transition_policy;
        let order = self.unit("update_status", |uow, now| {
            order::update_status(uow, order_id, status, cancellation_reason, now, policy)
        })?;
        tracing::info!(order_id = %order_id, status = %order.status, "order status updated");
        Ok(order)
    }

    /// # Errors
    ///
    /// Returns [`SettlementError::OrderNotFound`] for unknown orders.
    pub fn order(&self, order_id: OrderId) -> Result<Order, SettlementError> {
        self.unit("get_order", |uow, _| {
            uow.orders()
                .get(order_id)?
                .ok_or(SettlementError::OrderNotFound(order_id))
        })
    }

    /// # Errors
    ///
    /// Propagates store failures.
    pub fn orders_for_customer(&self, customer_id: CustomerId) -> Result<Vec<Order>, SettlementError> {
        self.unit("list_orders", |uow, _| Ok(uow.orders().list_by_customer(customer_id)?))
    }

    // ---- subscriptions ----

    /// # Errors
    ///
    /// Propagates store failures.
    pub fn usable_subscriptions(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<UsableSubscription>, SettlementError> {
        self.unit("list_usable", |uow, now| subscription::list_usable(uow, customer_id, now))
    }

    /// # Errors
    ///
    /// Returns [`SettlementError::SubscriptionNotFound`] for unknown subscriptions.
    pub fn subscription(&self, id: SubscriptionId) -> Result<Subscription, SettlementError> {
        self.unit("get_subscription", |uow, _| {
            uow.subscriptions()
                .get(id)?
                .ok_or(SettlementError::SubscriptionNotFound(id))
        })
    }

    /// # Errors
    ///
    /// Propagates store failures.
    pub fn usages_for_subscription(
        &self,
        id: SubscriptionId,
    ) -> Result<Vec<SubscriptionUsage>, SettlementError> {
        self.unit("list_usages", |uow, _| Ok(uow.usages().list_by_subscription(id)?))
    }

    /// Inserts one usage row without touching totals.
    ///
    /// # Errors
    ///
    /// Returns [`SettlementError::DuplicateUsage`] on a second row for the
    /// same order or invoice.
    pub fn record_usage(
        &self,
        order_id: OrderId,
        subscription_id: SubscriptionId,
        deduction: Deduction,
        invoice_id: Option<InvoiceId>,
    ) -> Result<SubscriptionUsage, SettlementError> {
        self.unit("record_usage", |uow, now| {
            subscription::record_usage(uow, order_id, subscription_id, deduction, invoice_id, now)
        })
    }

    /// # Errors
    ///
    /// Returns [`SettlementError::InvalidInput`] if used amounts would decrease.
    pub fn update_usage(
        &self,
        subscription_id: SubscriptionId,
        totals: UsageTotals,
    ) -> Result<Subscription, SettlementError> {
        self.unit("update_usage", |uow, now| {
            subscription::update_usage(uow, subscription_id, totals, now)
        })
    }

    /// Meters an order against a subscription: allowance check, usage row
    /// and new totals in one unit.
    ///
    /// # Errors
    ///
    /// See [`subscription::charge`].
    pub fn charge_subscription(
        &self,
        order_id: OrderId,
        subscription_id: SubscriptionId,
        deduction: Deduction,
    ) -> Result<SubscriptionUsage, SettlementError> {
        let usage = self
            .unit("charge_subscription", |uow, now| {
                subscription::charge(uow, order_id, subscription_id, deduction, None, now)
            })
            .inspect_err(|err| {
                tracing::warn!(
                    order_id = %order_id,
                    subscription_id = %subscription_id,
                    code = err.code(),
                    "charge rejected"
                );
            })?;
        tracing::info!(
            order_id = %order_id,
            subscription_id = %subscription_id,
            pickups = usage.deducted_pickups,
            kg = %usage.deducted_kg,
            items = usage.deducted_items,
            "subscription charged"
        );
        Ok(usage)
    }

    /// # Errors
    ///
    /// See [`subscription::extend`].
    pub fn extend_subscription(
        &self,
        subscription_id: SubscriptionId,
        terms: ExtendTerms,
    ) -> Result<Subscription, SettlementError> {
        self.unit("extend_subscription", |uow, now| {
            subscription::extend(uow, subscription_id, terms, now)
        })
    }

    /// Direct purchase at checkout: extends the customer's active
    /// subscription on the plan or creates one, records the captured payment
    /// and creates an issued subscription-purchase invoice.
    ///
    /// # Errors
    ///
    /// - [`SettlementError::PaymentNotCaptured`] - Payment is pending or failed.
    /// - [`SettlementError::PlanNotFound`] - Unknown plan.
    /// - [`SettlementError::PlanAlreadyRedeemed`] - Single-use plan held before.
    pub fn purchase_subscription(&self, request: PurchaseRequest) -> Result<Purchase, SettlementError> {
        if request.payment.status != PaymentStatus::Captured {
            return Err(SettlementError::PaymentNotCaptured);
        }
        if request.payment.amount < 0 {
            return Err(SettlementError::NegativeAmount);
        }
        let plan = self
            .collaborators
            .plans
            .plan(request.plan_id)
            .ok_or(SettlementError::PlanNotFound(request.plan_id))?;
        let valid_from = self.calendar.midnight(request.valid_from);
        let ctx = self.issue_context();

        let purchase = self.numbered("purchase_subscription", |uow, now| {
            fulfillment::ensure_redeemable(uow, request.customer_id, &plan)?;
            let subscription = fulfillment::grant(
                uow,
                Grant {
                    customer_id: request.customer_id,
                    plan: &plan,
                    quantity: request.quantity,
                    valid_from,
                    address_id: request.address_id,
                    branch_id: request.branch_id,
                },
                now,
            )?;
            let payment =
                payment::upsert_for_subscription(uow, subscription.id, request.payment.clone(), now)?;
            let invoice = invoice::create_subscription_purchase(
                uow,
                &subscription,
                &plan.name,
                request.quantity,
                payment.amount,
                &ctx,
                now,
            )?;
            Ok(Purchase {
                subscription,
                invoice,
                payment,
            })
        })?;
        tracing::info!(
            subscription_id = %purchase.subscription.id,
            invoice_id = %purchase.invoice.id,
            code = ?purchase.invoice.code,
            "subscription purchased"
        );
        Ok(purchase)
    }

    /// Deactivates a customer's expired or exhausted subscriptions.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn deactivate_unusable(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<SubscriptionId>, SettlementError> {
        let deactivated = self.unit("deactivate_unusable", |uow, now| {
            subscription::deactivate_unusable(uow, customer_id, now)
        })?;
        if !deactivated.is_empty() {
            tracing::info!(customer_id = %customer_id, count = deactivated.len(), "subscriptions deactivated");
        }
        Ok(deactivated)
    }

    // ---- invoices ----

    /// # Errors
    ///
    /// See [`invoice::create_draft`].
    pub fn create_draft(
        &self,
        order_id: OrderId,
        invoice_type: InvoiceType,
        content: InvoiceContent,
    ) -> Result<Invoice, SettlementError> {
        self.unit("create_draft", |uow, now| {
            invoice::create_draft(uow, order_id, invoice_type, content, now)
        })
    }

    /// # Errors
    ///
    /// Returns [`SettlementError::InvoiceNotDraft`] once issued.
    pub fn update_draft(
        &self,
        invoice_id: InvoiceId,
        content: InvoiceContent,
    ) -> Result<Invoice, SettlementError> {
        self.unit("update_draft", |uow, now| {
            invoice::update_draft(uow, invoice_id, content, now)
        })
    }

    /// Administrative content correction, allowed after issue.
    ///
    /// # Errors
    ///
    /// Returns [`SettlementError::InvoiceVoid`] for void invoices.
    pub fn update_invoice_content(
        &self,
        invoice_id: InvoiceId,
        content: InvoiceContent,
    ) -> Result<Invoice, SettlementError> {
        self.unit("update_invoice_content", |uow, now| {
            invoice::update_content(uow, invoice_id, content, now)
        })
    }

    /// Issues a draft, assigning its code. A final invoice with a usage
    /// snapshot charges the subscription in the same unit.
    ///
    /// # Errors
    ///
    /// See [`invoice::issue`].
    pub fn issue_invoice(&self, invoice_id: InvoiceId) -> Result<Invoice, SettlementError> {
        let ctx = self.issue_context();
        let issued = self.numbered("issue_invoice", |uow, now| {
            invoice::issue(uow, invoice_id, &ctx, now)
        })?;
        tracing::info!(invoice_id = %invoice_id, code = ?issued.code, "invoice issued");
        Ok(issued)
    }

    /// # Errors
    ///
    /// See [`invoice::void`].
    pub fn void_invoice(&self, invoice_id: InvoiceId) -> Result<Invoice, SettlementError> {
        let voided = self.unit("void_invoice", |uow, now| invoice::void(uow, invoice_id, now))?;
        tracing::info!(invoice_id = %invoice_id, code = ?voided.code, "invoice voided");
        Ok(voided)
    }

    /// Renders the invoice and stores the document reference on it.
    ///
    /// # Errors
    ///
    /// Returns [`SettlementError::InvoiceNotFound`] or the renderer's error.
    pub fn render_invoice(&self, invoice_id: InvoiceId) -> Result<RenderedDocument, SettlementError> {
        let renderer = self.collaborators.renderer.as_ref();
        self.unit("render_invoice", |uow, now| {
            let invoice = uow
                .invoices()
                .get(invoice_id)?
                .ok_or(SettlementError::InvoiceNotFound(invoice_id))?;
            let document = renderer.render(&invoice)?;
            invoice::attach_document(uow, invoice_id, document.reference.clone(), now)?;
            Ok(document)
        })
    }

    /// # Errors
    ///
    /// Returns [`SettlementError::InvoiceNotFound`] for unknown invoices.
    pub fn set_invoice_payment_status(
        &self,
        invoice_id: InvoiceId,
        status: InvoicePaymentStatus,
    ) -> Result<Invoice, SettlementError> {
        self.unit("set_invoice_payment_status", |uow, now| {
            invoice::set_payment_status(uow, invoice_id, status, now)
        })
    }

    /// # Errors
    ///
    /// Returns [`SettlementError::InvoiceNotFound`] for unknown invoices.
    pub fn invoice(&self, invoice_id: InvoiceId) -> Result<Invoice, SettlementError> {
        self.unit("get_invoice", |uow, _| {
            uow.invoices()
                .get(invoice_id)?
                .ok_or(SettlementError::InvoiceNotFound(invoice_id))
        })
    }

    /// # Errors
    ///
    /// Propagates store failures.
    pub fn invoices_for_order(&self, order_id: OrderId) -> Result<Vec<Invoice>, SettlementError> {
        self.unit("list_invoices", |uow, _| Ok(uow.invoices().list_by_order(order_id)?))
    }

    // ---- payments ----

    /// Upserts the order's payment and mirrors its status onto the order.
    /// Nothing else is triggered; see [`capture_order_payment`](Self::capture_order_payment).
    ///
    /// # Errors
    ///
    /// See [`payment::update_payment_status`].
    pub fn update_payment_status(
        &self,
        order_id: OrderId,
        update: PaymentUpdate,
    ) -> Result<Payment, SettlementError> {
        self.unit("update_payment_status", |uow, now| {
            payment::update_payment_status(uow, order_id, update, now)
        })
    }

    /// # Errors
    ///
    /// Propagates store failures.
    pub fn payment(&self, subject: PaymentSubject) -> Result<Option<Payment>, SettlementError> {
        self.unit("get_payment", |uow, _| Ok(uow.payments().find(subject)?))
    }

    /// Records an order payment and, when captured, settles it: fulfills
    /// subscriptions sold on the acknowledgement invoice and marks an issued
    /// final invoice paid.
    ///
    /// The payment is committed in its own unit before settlement runs. If
    /// settlement fails the payment stays recorded and the error is
    /// returned; [`fulfill_new_subscriptions`](Self::fulfill_new_subscriptions)
    /// can then be re-invoked.
    ///
    /// # Errors
    ///
    /// Anything raised by [`payment::update_payment_status`] or [`fulfillment::fulfill`].
    pub fn capture_order_payment(
        &self,
        order_id: OrderId,
        update: PaymentUpdate,
    ) -> Result<CaptureOutcome, SettlementError> {
        let provider = update.provider;
        let payment = self.update_payment_status(order_id, update)?;
        if payment.status != PaymentStatus::Captured {
            return Ok(CaptureOutcome {
                payment,
                fulfillment: None,
            });
        }

        let plans = self.collaborators.plans.as_ref();
        let fulfillment = self
            .unit("settle_capture", |uow, now| {
                let outcome =
                    fulfillment::fulfill(uow, order_id, plans, &self.calendar, provider, now)?;
                if let Some(final_invoice) = uow
                    .invoices()
                    .find_by_order_and_type(order_id, InvoiceType::Final)?
                    .filter(|i| i.status == InvoiceStatus::Issued)
                {
                    invoice::set_payment_status(uow, final_invoice.id, InvoicePaymentStatus::Paid, now)?;
                }
                Ok(outcome)
            })
            .inspect_err(|err| {
                tracing::warn!(order_id = %order_id, code = err.code(), "settlement after capture failed");
            })?;
        Ok(CaptureOutcome {
            payment,
            fulfillment: Some(fulfillment),
        })
    }

    /// Runs new-subscription fulfillment for an order on its own. Safe to
    /// call repeatedly.
    ///
    /// # Errors
    ///
    /// See [`fulfillment::fulfill`].
    pub fn fulfill_new_subscriptions(
        &self,
        order_id: OrderId,
        provider: PaymentProvider,
    ) -> Result<FulfillmentOutcome, SettlementError> {
        let plans = self.collaborators.plans.as_ref();
        self.unit("fulfill_new_subscriptions", |uow, now| {
            fulfillment::fulfill(uow, order_id, plans, &self.calendar, provider, now)
        })
    }

    // ---- reporting ----

    /// # Errors
    ///
    /// Returns [`SettlementError::InvalidDateRange`] for unrepresentable bounds.
    pub fn revenue_range(&self, period: RevenuePeriod) -> Result<RevenueRange, SettlementError> {
        revenue::resolve(
            period,
            self.clock.now(),
            &self.calendar,
            self.config.daily_breakdown_max_days,
        )
    }

    /// # Errors
    ///
    /// Returns [`SettlementError::InvalidDateRange`] when `from` is after `to`.
    pub fn revenue_range_custom(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<RevenueRange, SettlementError> {
        revenue::resolve_custom(from, to, &self.calendar, self.config.daily_breakdown_max_days)
    }
}
