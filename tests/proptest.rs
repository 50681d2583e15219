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

//! Property-based tests for the settlement engine.
//!
//! These tests verify invariants that should hold for any sequence of
//! bookings, charges and renewals.

mod common;

use chrono::{Datelike, Duration, NaiveDate};
use common::*;
use laundry_settlement_rs::{
    Breakdown, CivilCalendar, Deduction, ExtendTerms, InvoiceType, SettlementError, UsageTotals,
    revenue,
};
use proptest::prelude::*;
use rust_decimal::Decimal;

// =============================================================================
// Arbitrary Strategies
// =============================================================================

/// Half-kilogram steps from 0 to 8 kg, 0 to 2 pickups.
fn arb_deduction() -> impl Strategy<Value = Deduction> {
    (0u32..=2, 0i64..=16).prop_map(|(pickups, halves)| Deduction {
        pickups,
        kg: Decimal::new(halves * 5, 1),
        items: 0,
    })
}

fn arb_date() -> impl Strategy<Value = NaiveDate> {
    (2000i32..2100, 1u32..=12, 1u32..=28)
        .prop_map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

// =============================================================================
// Metering Invariants
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Whatever is charged, usage stays within the allowance, never
    /// decreases, and always equals the sum of the usage rows.
    #[test]
    fn charges_stay_within_allowance(
        deductions in prop::collection::vec(arb_deduction(), 1..8),
    ) {
        let h = Harness::new();
        let sub = h.purchase(7, MONTHLY_KG);
        let mut successes = 0usize;
        let mut previous = sub.clone();

        for deduction in deductions {
            let order = h.book(7);
            let result = h.engine.charge_subscription(order.id, sub.id, deduction);
            let current = h.engine.subscription(sub.id).unwrap();

            match result {
                Ok(_) => {
                    successes += 1;
                    prop_assert_eq!(current.used_kg, previous.used_kg + deduction.kg);
                    prop_assert_eq!(
                        current.remaining_pickups,
                        previous.remaining_pickups - deduction.pickups
                    );
                }
                Err(err) => {
                    prop_assert!(matches!(
                        err,
                        SettlementError::InsufficientAllowance(_)
                            | SettlementError::SubscriptionInactive
                    ));
                    prop_assert_eq!(&current, &previous);
                }
            }

            prop_assert!(current.used_kg >= previous.used_kg);
            prop_assert!(current.used_kg <= current.total_kg_limit.unwrap());
            prop_assert!(current.remaining_pickups <= current.total_pickups);
            previous = current;
        }

        let usages = h.engine.usages_for_subscription(sub.id).unwrap();
        prop_assert_eq!(usages.len(), successes);
        let kg: Decimal = usages.iter().map(|u| u.deducted_kg).sum();
        let pickups: u32 = usages.iter().map(|u| u.deducted_pickups).sum();
        prop_assert_eq!(kg, previous.used_kg);
        prop_assert_eq!(pickups, previous.total_pickups - previous.remaining_pickups);
    }

    /// An exhausted subscription is never left active.
    #[test]
    fn exhausted_subscriptions_are_inactive(
        deductions in prop::collection::vec(arb_deduction(), 1..8),
    ) {
        let h = Harness::new();
        let sub = h.purchase(7, MONTHLY_KG);
        for deduction in deductions {
            let order = h.book(7);
            let _ = h.engine.charge_subscription(order.id, sub.id, deduction);
        }
        let current = h.engine.subscription(sub.id).unwrap();
        let exhausted = current.remaining_pickups == 0
            || current.used_kg >= current.total_kg_limit.unwrap();
        prop_assert!(!(exhausted && current.active));
    }
}

// =============================================================================
// Renewal Invariants
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Extending adds plan figures times quantity on top of whatever is left.
    #[test]
    fn extension_accumulates(
        remaining in 0u32..50,
        used_halves in 0i64..24,
        quantity in 1u32..=6,
    ) {
        let h = Harness::new();
        let sub = h.purchase(7, MONTHLY_KG);
        let before = h
            .engine
            .update_usage(
                sub.id,
                UsageTotals {
                    remaining_pickups: remaining,
                    used_kg: Decimal::new(used_halves * 5, 1),
                    used_items: 0,
                },
            )
            .unwrap();

        let plan = plans().into_iter().find(|p| p.id == MONTHLY_KG).unwrap();
        let after = h
            .engine
            .extend_subscription(sub.id, ExtendTerms::from_plan(&plan, quantity))
            .unwrap();

        prop_assert_eq!(after.remaining_pickups, remaining + 2 * quantity);
        prop_assert_eq!(
            after.total_kg_limit,
            Some(before.total_kg_limit.unwrap() + Decimal::from(12 * quantity))
        );
        prop_assert_eq!(after.used_kg, before.used_kg);
        prop_assert_eq!(
            after.expiry,
            before.expiry + Duration::days(30 * i64::from(quantity))
        );
    }
}

// =============================================================================
// Numbering Invariants
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Each branch numbers its own bookings 1, 2, 3... and codes never repeat.
    #[test]
    fn order_codes_are_gap_free_per_branch(
        branches in prop::collection::vec(any::<bool>(), 1..20),
    ) {
        let h = Harness::new();
        let mut kor = 0u32;
        let mut ind = 0u32;
        let mut codes = std::collections::HashSet::new();

        for (i, koramangala) in branches.into_iter().enumerate() {
            let pincode = if koramangala { KORAMANGALA_PIN } else { INDIRANAGAR_PIN };
            let order = h.engine.book_order(booking(i as u64, pincode)).unwrap();
            let (prefix, expected) = if koramangala {
                kor += 1;
                ("KOR", kor)
            } else {
                ind += 1;
                ("IND", ind)
            };
            prop_assert_eq!(&order.code, &format!("{prefix}01062025{expected:04}ON"));
            prop_assert!(codes.insert(order.code));
        }
    }

    /// Invoice codes follow issue order, not draft order.
    #[test]
    fn invoice_codes_follow_issue_order(
        sequence in Just((0..6usize).collect::<Vec<_>>()).prop_shuffle(),
    ) {
        let h = Harness::new();
        let drafts: Vec<_> = (0..6u64)
            .map(|customer| {
                let booked = h.picked_up(customer);
                h.engine
                    .create_draft(booked.id, InvoiceType::Acknowledgement, content(10_000))
                    .unwrap()
                    .id
            })
            .collect();

        for (position, index) in sequence.into_iter().enumerate() {
            let issued = h.engine.issue_invoice(drafts[index]).unwrap();
            prop_assert_eq!(
                issued.code.unwrap(),
                format!("KOR-ACK-FY25-{:05}", position + 1)
            );
        }
    }
}

// =============================================================================
// Calendar Invariants
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    /// A civil midnight maps back to its own civil date.
    #[test]
    fn midnight_round_trips(date in arb_date()) {
        let calendar = CivilCalendar::default();
        prop_assert_eq!(calendar.civil_date(calendar.midnight(date)), date);
        let (start, end) = calendar.day_bounds(date);
        prop_assert_eq!(end - start, Duration::days(1));
    }

    /// Fiscal years start in April.
    #[test]
    fn fiscal_year_starts_in_april(date in arb_date()) {
        let calendar = CivilCalendar::default();
        let expected = if date.month() >= 4 { date.year() } else { date.year() - 1 };
        prop_assert_eq!(calendar.fiscal_year_of(date), expected);
    }

    /// Custom ranges cover exactly the requested days and switch to a
    /// monthly breakdown past the threshold.
    #[test]
    fn custom_ranges_cover_requested_days(from in arb_date(), len in 1i64..400) {
        let calendar = CivilCalendar::default();
        let to = from + Duration::days(len - 1);
        let range = revenue::resolve_custom(from, to, &calendar, 92).unwrap();
        prop_assert_eq!(range.days(), len);
        prop_assert_eq!(range.to - range.from, Duration::days(len));
        prop_assert_eq!(range.breakdown == Breakdown::Daily, len <= 92);
    }
}
