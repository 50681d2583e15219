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

//! Human-readable document numbers.
//!
//! These builders are pure. Sequences are counted by the caller inside the
//! same unit of work that inserts the numbered row.

use crate::invoice::InvoiceType;
use crate::order::OrderSource;
use chrono::{Datelike, NaiveDate};

const PREFIX_LEN: usize = 3;
const FILLER: char = 'X';

/// Three-letter branch code: first three characters of the name, uppercased,
/// non-letters replaced and short names padded with `X`.
///
/// ```
/// use laundry_settlement_rs::numbering::branch_prefix;
///
/// assert_eq!(branch_prefix(Some("Koramangala"), "GEN"), "KOR");
/// assert_eq!(branch_prefix(Some("HS"), "GEN"), "HSX");
/// assert_eq!(branch_prefix(None, "GEN"), "GEN");
/// ```
pub fn branch_prefix(branch_name: Option<&str>, placeholder: &str) -> String {
    let Some(name) = branch_name.map(str::trim).filter(|n| !n.is_empty()) else {
        return placeholder.to_string();
    };
    let mut prefix: String = name
        .chars()
        .take(PREFIX_LEN)
        .map(|c| {
            if c.is_ascii_alphabetic() {
                c.to_ascii_uppercase()
            } else {
                FILLER
            }
        })
        .collect();
    while prefix.len() < PREFIX_LEN {
        prefix.push(FILLER);
    }
    prefix
}

/// `BBBDDMMYYYY`: the part of an order code shared by one prefix and civil day.
///
/// Sequences are scoped to the stem, not the branch id, so two branches whose
/// names share a prefix still draw distinct codes.
pub fn order_code_stem(prefix: &str, civil_date: NaiveDate) -> String {
    format!(
        "{prefix}{:02}{:02}{:04}",
        civil_date.day(),
        civil_date.month(),
        civil_date.year()
    )
}

/// `BBBDDMMYYYYNNNNSS`.
pub fn order_code(prefix: &str, civil_date: NaiveDate, sequence: u32, source: OrderSource) -> String {
    format!(
        "{}{:04}{}",
        order_code_stem(prefix, civil_date),
        sequence,
        source.suffix()
    )
}

/// `BBB-TTT-FYyy-`: the part of an invoice code shared by one prefix, type and
/// fiscal year.
pub fn invoice_code_stem(prefix: &str, invoice_type: InvoiceType, fiscal_year: i32) -> String {
    format!(
        "{prefix}-{}-FY{:02}-",
        invoice_type.code(),
        fiscal_year.rem_euclid(100)
    )
}

/// `BBB-TTT-FYyy-NNNNN`, sequential per stem.
pub fn invoice_code(prefix: &str, invoice_type: InvoiceType, fiscal_year: i32, sequence: u32) -> String {
    format!(
        "{}{:05}",
        invoice_code_stem(prefix, invoice_type, fiscal_year),
        sequence
    )
}
