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

//! Reporting date ranges.
//!
//! Every boundary is a civil midnight; the returned range is half-open in
//! absolute time and inclusive in civil days.

use crate::clock::CivilCalendar;
use crate::error::SettlementError;
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevenuePeriod {
    Today,
    ThisMonth,
    /// The current month and the `n - 1` before it, through today.
    LastMonths(u32),
    ThisFiscalYear,
    LastFiscalYear,
    /// Named by its starting year: `FiscalYear(2025)` is FY25.
    FiscalYear(i32),
    /// The twelve months ending today.
    Trailing12Months,
}

impl FromStr for RevenuePeriod {
    type Err = SettlementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        let unknown = || SettlementError::InvalidInput(format!("unknown revenue period: {s}"));
        let period = match lowered.as_str() {
            "today" => Self::Today,
            "this_month" => Self::ThisMonth,
            "this_fy" => Self::ThisFiscalYear,
            "last_fy" => Self::LastFiscalYear,
            "trailing_12_months" => Self::Trailing12Months,
            other => {
                if let Some(n) = other
                    .strip_prefix("last_")
                    .and_then(|rest| rest.strip_suffix("_months"))
                {
                    let n: u32 = n.parse().map_err(|_| unknown())?;
                    if n == 0 {
                        return Err(unknown());
                    }
                    Self::LastMonths(n)
                } else if let Some(year) = other.strip_prefix("fy") {
                    let digits: i32 = year.parse().map_err(|_| unknown())?;
                    match year.len() {
                        2 => Self::FiscalYear(2000 + digits),
                        4 => Self::FiscalYear(digits),
                        _ => return Err(unknown()),
                    }
                } else {
                    return Err(unknown());
                }
            }
        };
        Ok(period)
    }
}

/// Granularity hint for charts and tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Breakdown {
    Daily,
    Monthly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueRange {
    /// Civil midnight starting the first day.
    pub from: DateTime<Utc>,
    /// Civil midnight after the last day; exclusive.
    pub to: DateTime<Utc>,
    pub first_day: NaiveDate,
    pub last_day: NaiveDate,
    pub breakdown: Breakdown,
}

impl RevenueRange {
    fn civil(
        first_day: NaiveDate,
        last_day: NaiveDate,
        calendar: &CivilCalendar,
        max_daily_days: i64,
    ) -> Result<Self, SettlementError> {
        if first_day > last_day {
            return Err(SettlementError::InvalidDateRange(format!(
                "{first_day} is after {last_day}"
            )));
        }
        let after_last = last_day
            .succ_opt()
            .ok_or_else(|| SettlementError::InvalidDateRange(format!("{last_day} is out of range")))?;
        let days = (last_day - first_day).num_days() + 1;
        let breakdown = if days <= max_daily_days {
            Breakdown::Daily
        } else {
            Breakdown::Monthly
        };
        Ok(Self {
            from: calendar.midnight(first_day),
            to: calendar.midnight(after_last),
            first_day,
            last_day,
            breakdown,
        })
    }

    /// Number of civil days covered.
    pub fn days(&self) -> i64 {
        (self.last_day - self.first_day).num_days() + 1
    }
}

fn first_of_month(date: NaiveDate) -> Result<NaiveDate, SettlementError> {
    date.with_day(1)
        .ok_or_else(|| SettlementError::InvalidDateRange(format!("{date} has no first day")))
}

fn months_back(date: NaiveDate, months: u32) -> Result<NaiveDate, SettlementError> {
    date.checked_sub_months(Months::new(months))
        .ok_or_else(|| SettlementError::InvalidDateRange(format!("{months} months before {date}")))
}

fn fiscal_year(
    year: i32,
    calendar: &CivilCalendar,
    max_daily_days: i64,
) -> Result<RevenueRange, SettlementError> {
    let first = NaiveDate::from_ymd_opt(year, 4, 1);
    let last = year
        .checked_add(1)
        .and_then(|next| NaiveDate::from_ymd_opt(next, 3, 31));
    match (first, last) {
        (Some(first), Some(last)) => RevenueRange::civil(first, last, calendar, max_daily_days),
        _ => Err(SettlementError::InvalidDateRange(format!(
            "fiscal year {year} is out of range"
        ))),
    }
}

/// Resolves a named period relative to `now`.
///
/// # Errors
///
/// Returns [`SettlementError::InvalidDateRange`] when a bound falls outside
/// chrono's calendar.
pub fn resolve(
    period: RevenuePeriod,
    now: DateTime<Utc>,
    calendar: &CivilCalendar,
    max_daily_days: i64,
) -> Result<RevenueRange, SettlementError> {
    let today = calendar.civil_date(now);
    match period {
        RevenuePeriod::Today => RevenueRange::civil(today, today, calendar, max_daily_days),
        RevenuePeriod::ThisMonth => {
            let first = first_of_month(today)?;
            let last = first
                .checked_add_months(Months::new(1))
                .map(|next| next - Duration::days(1))
                .ok_or_else(|| SettlementError::InvalidDateRange(format!("{today} is out of range")))?;
            RevenueRange::civil(first, last, calendar, max_daily_days)
        }
        RevenuePeriod::LastMonths(n) => {
            let first = months_back(first_of_month(today)?, n.saturating_sub(1))?;
            RevenueRange::civil(first, today, calendar, max_daily_days)
        }
        RevenuePeriod::ThisFiscalYear => {
            fiscal_year(calendar.fiscal_year_of(today), calendar, max_daily_days)
        }
        RevenuePeriod::LastFiscalYear => {
            fiscal_year(calendar.fiscal_year_of(today) - 1, calendar, max_daily_days)
        }
        RevenuePeriod::FiscalYear(year) => fiscal_year(year, calendar, max_daily_days),
        RevenuePeriod::Trailing12Months => {
            let first = months_back(today, 12)? + Duration::days(1);
            RevenueRange::civil(first, today, calendar, max_daily_days)
        }
    }
}

/// Resolves an explicit civil range, both ends inclusive.
///
/// # Errors
///
/// Returns [`SettlementError::InvalidDateRange`] when `from` is after `to`.
pub fn resolve_custom(
    from: NaiveDate,
    to: NaiveDate,
    calendar: &CivilCalendar,
    max_daily_days: i64,
) -> Result<RevenueRange, SettlementError> {
    RevenueRange::civil(from, to, calendar, max_daily_days)
}
