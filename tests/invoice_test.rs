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

//! Invoice lifecycle tests: drafting, issue numbering, void, metering on
//! issue and rendering.

mod common;

use chrono::{Duration, TimeZone, Utc};
use common::*;
use laundry_settlement_rs::repository::constraint;
use laundry_settlement_rs::{
    BranchId, EngineConfig, InvoiceId, InvoicePaymentStatus, InvoiceStatus, InvoiceType,
    NewSubscriptionSnapshot, Order, OrderStatus, SettlementError, SubscriptionOffer,
    UsageSnapshot,
};
use rust_decimal_macros::dec;

fn acknowledged(h: &Harness, customer: u64) -> (Order, InvoiceId) {
    let order = h.picked_up(customer);
    let draft = h
        .engine
        .create_draft(order.id, InvoiceType::Acknowledgement, content(45_000))
        .unwrap();
    (order, draft.id)
}

// =============================================================================
// Drafts
// =============================================================================

#[test]
fn acknowledgement_needs_pickup() {
    let h = Harness::new();
    let order = h.book(1);
    let err = h
        .engine
        .create_draft(order.id, InvoiceType::Acknowledgement, content(45_000))
        .unwrap_err();
    assert!(matches!(err, SettlementError::OrderNotEligible(_)));
}

#[test]
fn final_needs_delivery() {
    let h = Harness::new();
    let order = h.picked_up(1);
    assert!(matches!(
        h.engine
            .create_draft(order.id, InvoiceType::Final, content(45_000)),
        Err(SettlementError::OrderNotEligible(_))
    ));
}

#[test]
fn cancelled_order_is_not_eligible() {
    let h = Harness::new();
    let order = h.picked_up(1);
    h.move_to(order.id, OrderStatus::Cancelled);
    assert!(matches!(
        h.engine
            .create_draft(order.id, InvoiceType::Acknowledgement, content(45_000)),
        Err(SettlementError::OrderNotEligible(_))
    ));
}

#[test]
fn draft_starts_uncoded() {
    let h = Harness::new();
    let (order, id) = acknowledged(&h, 1);
    let draft = h.engine.invoice(id).unwrap();
    assert_eq!(draft.status, InvoiceStatus::Draft);
    assert_eq!(draft.code, None);
    assert_eq!(draft.order_id(), Some(order.id));
    assert_eq!(draft.branch_id, Some(KORAMANGALA));
    assert_eq!(draft.customer_id, order.customer_id);
    assert_eq!(draft.payment_status, InvoicePaymentStatus::Due);
}

#[test]
fn one_invoice_per_order_and_type() {
    let h = Harness::new();
    let (order, _) = acknowledged(&h, 1);
    let err = h
        .engine
        .create_draft(order.id, InvoiceType::Acknowledgement, content(1_000))
        .unwrap_err();
    assert_eq!(
        err,
        SettlementError::Conflict {
            constraint: constraint::INVOICE_ORDER_TYPE
        }
    );
    assert!(!err.is_retryable());
}

#[test]
fn content_must_add_up() {
    let h = Harness::new();
    let order = h.picked_up(1);
    let mut bad = content(45_000);
    bad.total = 40_000;
    assert!(matches!(
        h.engine
            .create_draft(order.id, InvoiceType::Acknowledgement, bad),
        Err(SettlementError::InvalidInput(_))
    ));
}

#[test]
fn overflowing_totals_are_invalid() {
    let h = Harness::new();
    let order = h.picked_up(1);
    let mut huge = content(45_000);
    huge.subtotal = i64::MAX;
    huge.tax = 1;
    assert!(matches!(
        h.engine
            .create_draft(order.id, InvoiceType::Acknowledgement, huge),
        Err(SettlementError::InvalidInput(_))
    ));
    assert!(h.engine.invoices_for_order(order.id).unwrap().is_empty());
}

#[test]
fn usage_snapshot_must_name_the_customers_subscription() {
    let h = Harness::new();
    let other = h.purchase(7, MONTHLY_KG);
    let order = h.delivered(8);
    let mut body = content(0);
    body.subscription_usage = Some(UsageSnapshot {
        subscription_id: other.id,
        pickups: 1,
        kg: dec!(5),
        items: 0,
    });
    assert_eq!(
        h.engine.create_draft(order.id, InvoiceType::Final, body.clone()),
        Err(SettlementError::OwnershipMismatch)
    );

    let draft = h
        .engine
        .create_draft(order.id, InvoiceType::Final, content(0))
        .unwrap();
    assert_eq!(
        h.engine.update_draft(draft.id, body),
        Err(SettlementError::OwnershipMismatch)
    );
    let issued = h.engine.issue_invoice(draft.id).unwrap();
    assert!(issued.code.is_some());

    let untouched = h.engine.subscription(other.id).unwrap();
    assert_eq!(untouched.used_kg, dec!(0));
    assert_eq!(untouched.remaining_pickups, 2);
}

#[test]
fn new_subscriptions_only_ride_on_acknowledgements() {
    let h = Harness::new();
    let order = h.delivered(1);
    let mut with_offer = content(45_000);
    with_offer.new_subscription = Some(NewSubscriptionSnapshot {
        offers: vec![SubscriptionOffer {
            plan_id: MONTHLY_KG,
            quantity: 1,
            price: 99_900,
            valid_from: date(2025, 6, 1),
        }],
    });
    assert!(matches!(
        h.engine
            .create_draft(order.id, InvoiceType::Final, with_offer),
        Err(SettlementError::InvalidInput(_))
    ));
}

#[test]
fn update_draft_replaces_content() {
    let h = Harness::new();
    let (_, id) = acknowledged(&h, 1);
    let updated = h.engine.update_draft(id, content(52_500)).unwrap();
    assert_eq!(updated.content.total, 52_500);
    assert_eq!(updated.content.items.len(), 1);
}

// =============================================================================
// Issue
// =============================================================================

#[test]
fn issue_assigns_code_and_freezes_branding() {
    let h = Harness::new();
    let (_, id) = acknowledged(&h, 1);
    h.advance(Duration::minutes(5));

    let issued = h.engine.issue_invoice(id).unwrap();
    assert_eq!(issued.status, InvoiceStatus::Issued);
    assert_eq!(issued.code.as_deref(), Some("KOR-ACK-FY25-00001"));
    assert_eq!(issued.issued_at, Some(start() + Duration::minutes(5)));
    assert_eq!(issued.branding, Some(branding("Fresh Folds")));

    h.directory.set_branding(branding("Folds & Co"));
    let stored = h.engine.invoice(id).unwrap();
    assert_eq!(stored.branding.unwrap().business_name, "Fresh Folds");
}

#[test]
fn branch_branding_overrides_default() {
    let h = Harness::new();
    h.directory
        .set_branch_branding(KORAMANGALA, branding("Fresh Folds Koramangala"));
    let (_, id) = acknowledged(&h, 1);
    let issued = h.engine.issue_invoice(id).unwrap();
    assert_eq!(
        issued.branding.unwrap().business_name,
        "Fresh Folds Koramangala"
    );
}

#[test]
fn codes_are_sequential_per_type() {
    let h = Harness::new();
    let (first_order, first) = acknowledged(&h, 1);
    let (_, second) = acknowledged(&h, 2);
    h.engine.issue_invoice(first).unwrap();
    let second = h.engine.issue_invoice(second).unwrap();
    assert_eq!(second.code.as_deref(), Some("KOR-ACK-FY25-00002"));

    h.move_to(first_order.id, OrderStatus::Delivered);
    let final_draft = h
        .engine
        .create_draft(first_order.id, InvoiceType::Final, content(45_000))
        .unwrap();
    let final_invoice = h.engine.issue_invoice(final_draft.id).unwrap();
    assert_eq!(final_invoice.code.as_deref(), Some("KOR-FIN-FY25-00001"));
}

#[test]
fn branches_sharing_a_prefix_draw_distinct_codes() {
    let h = Harness::new();
    let second_block = BranchId(50);
    h.open_branch(second_block, "Koramangala 2");

    let (_, first) = acknowledged(&h, 1);
    let other = h.book_at(2, second_block);
    h.move_to(other.id, OrderStatus::PickedUp);
    let second = h
        .engine
        .create_draft(other.id, InvoiceType::Acknowledgement, content(45_000))
        .unwrap();

    let first = h.engine.issue_invoice(first).unwrap();
    let second = h.engine.issue_invoice(second.id).unwrap();
    assert_eq!(first.code.as_deref(), Some("KOR-ACK-FY25-00001"));
    assert_eq!(second.code.as_deref(), Some("KOR-ACK-FY25-00002"));
    assert_eq!(second.branch_id, Some(second_block));
}

#[test]
fn unissued_drafts_do_not_consume_codes() {
    let h = Harness::new();
    acknowledged(&h, 1);
    let (_, second) = acknowledged(&h, 2);
    let issued = h.engine.issue_invoice(second).unwrap();
    assert_eq!(issued.code.as_deref(), Some("KOR-ACK-FY25-00001"));
}

#[test]
fn second_issue_is_rejected_and_keeps_code() {
    let h = Harness::new();
    let (_, id) = acknowledged(&h, 1);
    let issued = h.engine.issue_invoice(id).unwrap();

    h.advance(Duration::hours(1));
    assert_eq!(
        h.engine.issue_invoice(id),
        Err(SettlementError::InvoiceNotDraft)
    );
    let stored = h.engine.invoice(id).unwrap();
    assert_eq!(stored.code, issued.code);
    assert_eq!(stored.issued_at, issued.issued_at);
}

#[test]
fn numbering_restarts_each_fiscal_year() {
    let h = Harness::new();
    let (_, march) = acknowledged(&h, 1);
    let (_, april) = acknowledged(&h, 2);

    // 23:59 on 31 March at +05:30.
    h.clock.set(Utc.with_ymd_and_hms(2026, 3, 31, 18, 29, 0).unwrap());
    let march = h.engine.issue_invoice(march).unwrap();
    assert_eq!(march.code.as_deref(), Some("KOR-ACK-FY25-00001"));

    h.clock.set(Utc.with_ymd_and_hms(2026, 3, 31, 18, 30, 0).unwrap());
    let april = h.engine.issue_invoice(april).unwrap();
    assert_eq!(april.code.as_deref(), Some("KOR-ACK-FY26-00001"));
}

#[test]
fn issue_rechecks_eligibility() {
    let h = Harness::new();
    let (order, id) = acknowledged(&h, 1);
    h.move_to(order.id, OrderStatus::Cancelled);
    assert!(matches!(
        h.engine.issue_invoice(id),
        Err(SettlementError::OrderNotEligible(_))
    ));
    assert_eq!(h.engine.invoice(id).unwrap().status, InvoiceStatus::Draft);
}

#[test]
fn issued_content_is_only_corrected_administratively() {
    let h = Harness::new();
    let (_, id) = acknowledged(&h, 1);
    let issued = h.engine.issue_invoice(id).unwrap();

    assert_eq!(
        h.engine.update_draft(id, content(1_000)),
        Err(SettlementError::InvoiceNotDraft)
    );
    let corrected = h.engine.update_invoice_content(id, content(44_000)).unwrap();
    assert_eq!(corrected.content.total, 44_000);
    assert_eq!(corrected.code, issued.code);
    assert_eq!(corrected.branding, issued.branding);
}

// =============================================================================
// Void
// =============================================================================

#[test]
fn only_issued_invoices_can_be_voided() {
    let h = Harness::new();
    let (_, id) = acknowledged(&h, 1);
    assert_eq!(
        h.engine.void_invoice(id),
        Err(SettlementError::InvoiceNotIssued)
    );

    h.engine.issue_invoice(id).unwrap();
    let voided = h.engine.void_invoice(id).unwrap();
    assert_eq!(voided.status, InvoiceStatus::Void);
    assert_eq!(voided.voided_at, Some(start()));
    assert_eq!(voided.code.as_deref(), Some("KOR-ACK-FY25-00001"));

    assert_eq!(h.engine.void_invoice(id), Err(SettlementError::InvoiceVoid));
    assert_eq!(
        h.engine.update_invoice_content(id, content(1_000)),
        Err(SettlementError::InvoiceVoid)
    );
}

#[test]
fn void_codes_are_never_reused() {
    let h = Harness::new();
    let (_, first) = acknowledged(&h, 1);
    let (_, second) = acknowledged(&h, 2);
    h.engine.issue_invoice(first).unwrap();
    h.engine.void_invoice(first).unwrap();
    let second = h.engine.issue_invoice(second).unwrap();
    assert_eq!(second.code.as_deref(), Some("KOR-ACK-FY25-00002"));
}

// =============================================================================
// Metering on final issue
// =============================================================================

fn subscription_final(h: &Harness, kg: rust_decimal::Decimal) -> (Order, InvoiceId) {
    let sub = h.purchase(7, MONTHLY_KG);
    let order = h.book_with_subscription(7, sub.id);
    h.move_to(order.id, OrderStatus::PickedUp);
    h.move_to(order.id, OrderStatus::Delivered);
    let mut body = content(0);
    body.subscription_usage = Some(UsageSnapshot {
        subscription_id: sub.id,
        pickups: 1,
        kg,
        items: 0,
    });
    let draft = h
        .engine
        .create_draft(order.id, InvoiceType::Final, body)
        .unwrap();
    (order, draft.id)
}

#[test]
fn final_issue_charges_the_subscription() {
    let h = Harness::new();
    let (order, id) = subscription_final(&h, dec!(4.5));
    let issued = h.engine.issue_invoice(id).unwrap();

    let sub_id = order.subscription_id.unwrap();
    let sub = h.engine.subscription(sub_id).unwrap();
    assert_eq!(sub.remaining_pickups, 1);
    assert_eq!(sub.used_kg, dec!(4.5));

    let usages = h.engine.usages_for_subscription(sub_id).unwrap();
    assert_eq!(usages.len(), 1);
    assert_eq!(usages[0].order_id, order.id);
    assert_eq!(usages[0].invoice_id, Some(issued.id));
}

#[test]
fn final_issue_skips_already_metered_orders() {
    let h = Harness::new();
    let (order, id) = subscription_final(&h, dec!(4.5));
    let sub_id = order.subscription_id.unwrap();
    h.engine
        .charge_subscription(
            order.id,
            sub_id,
            laundry_settlement_rs::Deduction {
                pickups: 1,
                kg: dec!(4.5),
                items: 0,
            },
        )
        .unwrap();

    h.engine.issue_invoice(id).unwrap();
    let sub = h.engine.subscription(sub_id).unwrap();
    assert_eq!(sub.remaining_pickups, 1);
    assert_eq!(sub.used_kg, dec!(4.5));
    assert_eq!(h.engine.usages_for_subscription(sub_id).unwrap().len(), 1);
}

#[test]
fn failed_charge_leaves_invoice_draft() {
    let h = Harness::new();
    let (order, id) = subscription_final(&h, dec!(20));
    assert!(matches!(
        h.engine.issue_invoice(id),
        Err(SettlementError::InsufficientAllowance(_))
    ));

    let draft = h.engine.invoice(id).unwrap();
    assert_eq!(draft.status, InvoiceStatus::Draft);
    assert_eq!(draft.code, None);
    let sub = h.engine.subscription(order.subscription_id.unwrap()).unwrap();
    assert_eq!(sub.remaining_pickups, 2);
}

// =============================================================================
// Rendering and payment status
// =============================================================================

#[test]
fn render_stores_document_reference() {
    let h = Harness::with_config(EngineConfig {
        render_lines_per_page: 5,
        ..EngineConfig::default()
    });
    let (_, id) = acknowledged(&h, 1);
    h.engine.issue_invoice(id).unwrap();

    let document = h.engine.render_invoice(id).unwrap();
    assert_eq!(
        document.reference,
        "memory://invoices/KOR-ACK-FY25-00001.txt"
    );
    assert_eq!(document.pages.len(), 3);
    assert!(document.pages[0].starts_with("Fresh Folds"));
    assert!(document.pages[2].ends_with("-- page 3 of 3 --"));

    let stored = h.engine.invoice(id).unwrap();
    assert_eq!(stored.document_url, Some(document.reference));
}

#[test]
fn drafts_render_under_a_draft_name() {
    let h = Harness::new();
    let (_, id) = acknowledged(&h, 1);
    let document = h.engine.render_invoice(id).unwrap();
    assert_eq!(document.reference, format!("memory://invoices/draft-{id}.txt"));
    assert_eq!(document.pages.len(), 1);
}

#[test]
fn payment_status_is_settable() {
    let h = Harness::new();
    let (_, id) = acknowledged(&h, 1);
    let paid = h
        .engine
        .set_invoice_payment_status(id, InvoicePaymentStatus::Paid)
        .unwrap();
    assert_eq!(paid.payment_status, InvoicePaymentStatus::Paid);
}

#[test]
fn invoices_are_listed_per_order() {
    let h = Harness::new();
    let (order, _) = acknowledged(&h, 1);
    h.move_to(order.id, OrderStatus::Delivered);
    h.engine
        .create_draft(order.id, InvoiceType::Final, content(45_000))
        .unwrap();
    let invoices = h.engine.invoices_for_order(order.id).unwrap();
    assert_eq!(invoices.len(), 2);
}

#[test]
fn unknown_invoice_is_not_found() {
    let h = Harness::new();
    assert_eq!(
        h.engine.issue_invoice(InvoiceId(404)),
        Err(SettlementError::InvoiceNotFound(InvoiceId(404)))
    );
}
