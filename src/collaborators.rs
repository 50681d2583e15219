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

//! Read-only collaborators the engine consults but does not own: the branch
//! directory, the plan catalog, branding, and document rendering.

use crate::base::{BranchId, Paise, PlanId};
use crate::error::SettlementError;
use crate::invoice::Invoice;
use crate::subscription::Plan;
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub id: BranchId,
    pub name: String,
    pub is_default: bool,
    pub service_pincodes: Vec<String>,
}

pub trait BranchDirectory: Send + Sync {
    fn branch(&self, id: BranchId) -> Option<Branch>;

    /// Branch whose service area covers `pincode`.
    fn serving(&self, pincode: &str) -> Option<Branch>;

    fn default_branch(&self) -> Option<Branch>;

    /// Explicit branch, else the one serving the pincode, else the default.
    ///
    /// # Errors
    ///
    /// Returns [`SettlementError::InvalidInput`] for an explicit id the
    /// directory does not know.
    fn resolve(
        &self,
        explicit: Option<BranchId>,
        pincode: &str,
    ) -> Result<Option<Branch>, SettlementError> {
        match explicit {
            Some(id) => self
                .branch(id)
                .map(Some)
                .ok_or_else(|| SettlementError::InvalidInput(format!("unknown branch {id}"))),
            None => Ok(self.serving(pincode).or_else(|| self.default_branch())),
        }
    }
}

pub trait PlanCatalog: Send + Sync {
    fn plan(&self, id: PlanId) -> Option<Plan>;
}

/// Business details frozen into an issued invoice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandingSnapshot {
    pub business_name: String,
    pub address: String,
    pub tax_id: Option<String>,
    pub phone: Option<String>,
    pub logo_url: Option<String>,
}

pub trait BrandingProvider: Send + Sync {
    fn snapshot(&self, branch: Option<BranchId>) -> BrandingSnapshot;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    /// Where the artifact can be fetched; stored on the invoice.
    pub reference: String,
    pub pages: Vec<String>,
}

pub trait DocumentRenderer: Send + Sync {
    /// # Errors
    ///
    /// Implementations return [`SettlementError::Storage`] when the artifact
    /// cannot be produced or stored.
    fn render(&self, invoice: &Invoice) -> Result<RenderedDocument, SettlementError>;
}

/// In-memory directory backing all three lookup collaborators.
#[derive(Debug, Default)]
pub struct Directory {
    branches: DashMap<BranchId, Branch>,
    plans: DashMap<PlanId, Plan>,
    branding: RwLock<BrandingSnapshot>,
    branch_branding: DashMap<BranchId, BrandingSnapshot>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_branch(&self, branch: Branch) {
        self.branches.insert(branch.id, branch);
    }

    pub fn add_plan(&self, plan: Plan) {
        self.plans.insert(plan.id, plan);
    }

    pub fn set_branding(&self, branding: BrandingSnapshot) {
        *self.branding.write() = branding;
    }

    pub fn set_branch_branding(&self, branch: BranchId, branding: BrandingSnapshot) {
        self.branch_branding.insert(branch, branding);
    }
}

impl BranchDirectory for Directory {
    fn branch(&self, id: BranchId) -> Option<Branch> {
        self.branches.get(&id).map(|b| b.value().clone())
    }

    fn serving(&self, pincode: &str) -> Option<Branch> {
        let mut matches: Vec<Branch> = self
            .branches
            .iter()
            .filter(|b| b.service_pincodes.iter().any(|p| p == pincode))
            .map(|b| b.value().clone())
            .collect();
        // DashMap iteration order is arbitrary; lowest id wins.
        matches.sort_by_key(|b| b.id);
        matches.into_iter().next()
    }

    fn default_branch(&self) -> Option<Branch> {
        self.branches
            .iter()
            .filter(|b| b.is_default)
            .map(|b| b.value().clone())
            .min_by_key(|b| b.id)
    }
}

impl PlanCatalog for Directory {
    fn plan(&self, id: PlanId) -> Option<Plan> {
        self.plans.get(&id).map(|p| p.value().clone())
    }
}

impl BrandingProvider for Directory {
    fn snapshot(&self, branch: Option<BranchId>) -> BrandingSnapshot {
        branch
            .and_then(|id| self.branch_branding.get(&id).map(|b| b.value().clone()))
            .unwrap_or_else(|| self.branding.read().clone())
    }
}

/// Plain-text paginated rendering.
#[derive(Debug, Clone)]
pub struct TextRenderer {
    lines_per_page: usize,
    base_url: String,
}

impl TextRenderer {
    pub fn new(lines_per_page: usize, base_url: impl Into<String>) -> Self {
        Self {
            lines_per_page: lines_per_page.max(1),
            base_url: base_url.into(),
        }
    }

    fn lines(invoice: &Invoice) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(branding) = &invoice.branding {
            lines.push(branding.business_name.clone());
            lines.push(branding.address.clone());
            if let Some(tax_id) = &branding.tax_id {
                lines.push(format!("Tax ID: {tax_id}"));
            }
            if let Some(phone) = &branding.phone {
                lines.push(format!("Phone: {phone}"));
            }
        }
        let code = invoice
            .code
            .clone()
            .unwrap_or_else(|| format!("DRAFT-{}", invoice.id));
        lines.push(format!("Invoice {code} ({})", invoice.invoice_type.code()));
        if let Some(issued_at) = invoice.issued_at {
            lines.push(format!("Issued {}", issued_at.format("%Y-%m-%d %H:%M UTC")));
        }
        lines.push("-".repeat(40));
        for item in &invoice.content.items {
            lines.push(format!(
                "{} x{} @ {} = {}",
                item.name,
                item.quantity,
                rupees(item.unit_price),
                rupees(item.amount)
            ));
        }
        lines.push("-".repeat(40));
        let content = &invoice.content;
        lines.push(format!("Subtotal {}", rupees(content.subtotal)));
        lines.push(format!("Tax {}", rupees(content.tax)));
        lines.push(format!("Discount {}", rupees(content.discount)));
        lines.push(format!("Total {}", rupees(content.total)));
        if let Some(usage) = &content.subscription_usage {
            lines.push(format!(
                "Subscription {}: {} pickup(s), {} kg, {} item(s)",
                usage.subscription_id, usage.pickups, usage.kg, usage.items
            ));
        }
        if let Some(snapshot) = &content.new_subscription {
            for offer in &snapshot.offers {
                lines.push(format!(
                    "New plan {} x{} from {} for {}",
                    offer.plan_id,
                    offer.quantity,
                    offer.valid_from,
                    rupees(offer.price)
                ));
            }
        }
        if let Some(comments) = &content.comments {
            lines.push(comments.clone());
        }
        lines
    }
}

fn rupees(paise: Paise) -> Decimal {
    Decimal::new(paise, 2)
}

impl DocumentRenderer for TextRenderer {
    fn render(&self, invoice: &Invoice) -> Result<RenderedDocument, SettlementError> {
        let lines = Self::lines(invoice);
        let chunks: Vec<&[String]> = lines.chunks(self.lines_per_page).collect();
        let total = chunks.len();
        let pages = chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| format!("{}\n-- page {} of {} --", chunk.join("\n"), i + 1, total))
            .collect();
        let name = invoice.code.clone().unwrap_or_else(|| format!("draft-{}", invoice.id));
        Ok(RenderedDocument {
            reference: format!("{}/{}.txt", self.base_url.trim_end_matches('/'), name),
            pages,
        })
    }
}
