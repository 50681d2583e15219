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

//! Time sources and civil-day arithmetic.
//!
//! All date bucketing (order numbering, invoice fiscal years, revenue ranges)
//! happens in a fixed civil offset, never in server-local time or UTC.
//!
//! ```
//! use chrono::{NaiveDate, TimeZone, Utc};
//! use laundry_settlement_rs::CivilCalendar;
//!
//! let calendar = CivilCalendar::default();
//! // 18:30 UTC is already the next civil day at +05:30.
//! let instant = Utc.with_ymd_and_hms(2025, 1, 31, 18, 30, 0).unwrap();
//! assert_eq!(calendar.civil_date(instant), NaiveDate::from_ymd_opt(2025, 2, 1).unwrap());
//! ```

use crate::error::SettlementError;
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};
use parking_lot::Mutex;

/// UTC+5:30.
pub const IST_OFFSET_MINUTES: i32 = 330;

/// Source of "now".
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for deterministic tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Calendar arithmetic in a fixed civil offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CivilCalendar {
    offset: FixedOffset,
}

impl CivilCalendar {
    /// Builds a calendar for an offset east of UTC, in minutes.
    ///
    /// # Errors
    ///
    /// Returns [`SettlementError::InvalidInput`] when the offset is outside ±24h.
    pub fn from_offset_minutes(minutes: i32) -> Result<Self, SettlementError> {
        minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .map(|offset| Self { offset })
            .ok_or_else(|| {
                SettlementError::InvalidInput(format!("civil offset out of range: {minutes} minutes"))
            })
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Civil calendar date on which `instant` falls.
    pub fn civil_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }

    /// The absolute instant at which civil `date` begins.
    pub fn midnight(&self, date: NaiveDate) -> DateTime<Utc> {
        let local = date.and_time(NaiveTime::MIN);
        let utc = local - Duration::seconds(i64::from(self.offset.local_minus_utc()));
        DateTime::from_naive_utc_and_offset(utc, Utc)
    }

    /// Half-open `[start, end)` bounds of civil `date`.
    pub fn day_bounds(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.midnight(date);
        (start, start + Duration::days(1))
    }

    /// Fiscal year (April to March) containing civil `date`, named by its starting year.
    pub fn fiscal_year_of(&self, date: NaiveDate) -> i32 {
        if date.month() >= 4 {
            date.year()
        } else {
            date.year() - 1
        }
    }
}

impl Default for CivilCalendar {
    fn default() -> Self {
        Self {
            offset: FixedOffset::east_opt(IST_OFFSET_MINUTES * 60)
                .expect("+05:30 is within the valid offset range"),
        }
    }
}
