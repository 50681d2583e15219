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

//! Engine configuration.
//!
//! Every field has a default, so a JSON file only needs to name what it
//! overrides:
//!
//! ```
//! use laundry_settlement_rs::{EngineConfig, TransitionPolicy};
//!
//! let config = EngineConfig::from_json(r#"{"transition_policy": "strict"}"#).unwrap();
//! assert_eq!(config.transition_policy, TransitionPolicy::Strict);
//! assert_eq!(config.civil_offset_minutes, 330);
//! ```

use crate::clock::{CivilCalendar, IST_OFFSET_MINUTES};
use crate::error::SettlementError;
use serde::{Deserialize, Serialize};

/// How the order state machine treats out-of-sequence transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionPolicy {
    /// Record whatever status the caller sends; jumps and rewinds are allowed.
    #[default]
    Permissive,
    /// Only forward moves along the fulfillment chain, or cancellation.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Civil offset east of UTC used for every day, month and fiscal-year boundary.
    pub civil_offset_minutes: i32,
    /// Branch code used in document numbers when no branch resolves.
    pub placeholder_branch_code: String,
    /// Attempts for a unit of work that collides on a document number.
    pub numbering_attempts: u32,
    /// Longest span, in days, reported with a daily breakdown.
    pub daily_breakdown_max_days: i64,
    pub transition_policy: TransitionPolicy,
    pub render_lines_per_page: usize,
    pub document_base_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            civil_offset_minutes: IST_OFFSET_MINUTES,
            placeholder_branch_code: "GEN".to_string(),
            numbering_attempts: 3,
            daily_breakdown_max_days: 92,
            transition_policy: TransitionPolicy::Permissive,
            render_lines_per_page: 40,
            document_base_url: "memory://invoices".to_string(),
        }
    }
}

impl EngineConfig {
    /// Parses a JSON document, filling unspecified fields with defaults.
    ///
    /// # Errors
    ///
    /// Returns [`SettlementError::InvalidInput`] on malformed JSON or an
    /// invalid combination of values.
    pub fn from_json(json: &str) -> Result<Self, SettlementError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| SettlementError::InvalidInput(format!("config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns [`SettlementError::InvalidInput`] for a zero attempt count,
    /// zero page length, negative breakdown threshold or unusable offset.
    pub fn validate(&self) -> Result<(), SettlementError> {
        if self.numbering_attempts == 0 {
            return Err(SettlementError::InvalidInput(
                "numbering_attempts must be at least 1".into(),
            ));
        }
        if self.render_lines_per_page == 0 {
            return Err(SettlementError::InvalidInput(
                "render_lines_per_page must be at least 1".into(),
            ));
        }
        if self.daily_breakdown_max_days < 0 {
            return Err(SettlementError::InvalidInput(
                "daily_breakdown_max_days must not be negative".into(),
            ));
        }
        self.calendar().map(|_| ())
    }

    /// # Errors
    ///
    /// Returns [`SettlementError::InvalidInput`] if the offset is out of range.
    pub fn calendar(&self) -> Result<CivilCalendar, SettlementError> {
        CivilCalendar::from_offset_minutes(self.civil_offset_minutes)
    }
}
