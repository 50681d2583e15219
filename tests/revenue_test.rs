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

//! Revenue range resolution through the engine.

mod common;

use chrono::{TimeZone, Utc};
use common::*;
use laundry_settlement_rs::{Breakdown, EngineConfig, RevenuePeriod, SettlementError};

#[test]
fn fiscal_year_runs_april_to_march() {
    let h = Harness::new();
    let range = h.engine.revenue_range("FY25".parse().unwrap()).unwrap();
    assert_eq!(range.first_day, date(2025, 4, 1));
    assert_eq!(range.last_day, date(2026, 3, 31));
    assert_eq!(range.breakdown, Breakdown::Monthly);
    assert_eq!(range.from, Utc.with_ymd_and_hms(2025, 3, 31, 18, 30, 0).unwrap());
    assert_eq!(range.to, Utc.with_ymd_and_hms(2026, 3, 31, 18, 30, 0).unwrap());
    assert_eq!(range.days(), 365);
}

#[test]
fn this_fiscal_year_follows_the_clock() {
    let h = Harness::new();
    assert_eq!(
        h.engine.revenue_range(RevenuePeriod::ThisFiscalYear).unwrap(),
        h.engine.revenue_range(RevenuePeriod::FiscalYear(2025)).unwrap()
    );

    // 1 April civil, still 31 March in UTC.
    h.clock.set(Utc.with_ymd_and_hms(2026, 3, 31, 19, 0, 0).unwrap());
    let range = h.engine.revenue_range(RevenuePeriod::ThisFiscalYear).unwrap();
    assert_eq!(range.first_day, date(2026, 4, 1));
    let last = h.engine.revenue_range(RevenuePeriod::LastFiscalYear).unwrap();
    assert_eq!(last.first_day, date(2025, 4, 1));
}

#[test]
fn today_is_one_civil_day() {
    let h = Harness::new();
    let range = h.engine.revenue_range(RevenuePeriod::Today).unwrap();
    assert_eq!(range.first_day, date(2025, 6, 1));
    assert_eq!(range.days(), 1);
    assert_eq!(range.breakdown, Breakdown::Daily);
}

#[test]
fn breakdown_switches_after_threshold() {
    let h = Harness::new();
    let daily = h
        .engine
        .revenue_range_custom(date(2025, 1, 1), date(2025, 4, 2))
        .unwrap();
    assert_eq!(daily.days(), 92);
    assert_eq!(daily.breakdown, Breakdown::Daily);

    let monthly = h
        .engine
        .revenue_range_custom(date(2025, 1, 1), date(2025, 4, 3))
        .unwrap();
    assert_eq!(monthly.days(), 93);
    assert_eq!(monthly.breakdown, Breakdown::Monthly);
}

#[test]
fn threshold_is_configurable() {
    let h = Harness::with_config(EngineConfig {
        daily_breakdown_max_days: 31,
        ..EngineConfig::default()
    });
    let range = h
        .engine
        .revenue_range_custom(date(2025, 1, 1), date(2025, 2, 1))
        .unwrap();
    assert_eq!(range.breakdown, Breakdown::Monthly);
}

#[test]
fn single_day_custom_range() {
    let h = Harness::new();
    let range = h
        .engine
        .revenue_range_custom(date(2025, 6, 1), date(2025, 6, 1))
        .unwrap();
    assert_eq!(range.days(), 1);
}

#[test]
fn inverted_custom_range_is_rejected() {
    let h = Harness::new();
    let err = h
        .engine
        .revenue_range_custom(date(2025, 6, 2), date(2025, 6, 1))
        .unwrap_err();
    assert!(matches!(err, SettlementError::InvalidDateRange(_)));
    assert_eq!(err.http_status(), http::StatusCode::BAD_REQUEST);
}

#[test]
fn last_months_start_on_a_month_boundary() {
    let h = Harness::new();
    let range = h.engine.revenue_range(RevenuePeriod::LastMonths(6)).unwrap();
    assert_eq!(range.first_day, date(2025, 1, 1));
    assert_eq!(range.last_day, date(2025, 6, 1));
    assert_eq!(range.breakdown, Breakdown::Monthly);
}
