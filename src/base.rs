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

//! Core identifier types for the settlement entities.
//!
//! Every entity is addressed by a `u64` wrapped in its own newtype so an
//! order id can never be passed where a subscription id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Amount in minor currency units (paise). Discounts are negative.
pub type Paise = i64;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Customer fulfillment request.
    OrderId
);
id_type!(
    /// Verified customer identity, supplied by the caller.
    CustomerId
);
id_type!(
    /// Prepaid usage allowance.
    SubscriptionId
);
id_type!(
    /// Billing document.
    InvoiceId
);
id_type!(
    /// Operating branch, owned by the branch directory.
    BranchId
);
id_type!(
    /// Subscription plan, owned by the plan catalog.
    PlanId
);
id_type!(
    /// Customer delivery address reference.
    AddressId
);
id_type!(
    /// Subscription usage ledger entry.
    UsageId
);
id_type!(
    /// Payment record.
    PaymentId
);
