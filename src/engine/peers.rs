//! Peer entries and their fee totals.
//!
//! A peer is a named seller entry tracking one or more products. Its
//! recorded `stock` figure feeds the peer-reference estimator; its total
//! is resolved from the exact-fee source when a credential is configured,
//! otherwise from the engine's own estimates.

use chrono::Duration;
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::estimator::EstimationEngine;
use crate::money;
use crate::platform::FeeSource;
use crate::types::{MinorUnits, ProductId};

/// Group label for entries without one.
pub const UNGROUPED: &str = "ungrouped";

#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub name: String,
    pub product_ids: Vec<ProductId>,
    pub stock: Option<i64>,
    pub credential: Option<SecretString>,
    pub group: Option<String>,
}

impl PeerEntry {
    pub fn references(&self, product_id: ProductId) -> bool {
        self.product_ids.contains(&product_id)
    }

    pub fn group(&self) -> &str {
        self.group.as_deref().unwrap_or(UNGROUPED)
    }
}

/// Source of peer entries.
pub trait PeerDirectory: Send + Sync {
    fn entries(&self) -> Vec<PeerEntry>;

    /// Entries that reference `product_id`.
    fn entries_for(&self, product_id: ProductId) -> Vec<PeerEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.references(product_id))
            .collect()
    }
}

/// Fixed peer list, usually loaded from config.
#[derive(Debug, Clone, Default)]
pub struct StaticPeers {
    entries: Vec<PeerEntry>,
}

impl StaticPeers {
    pub fn new(entries: Vec<PeerEntry>) -> Self {
        Self { entries }
    }
}

impl PeerDirectory for StaticPeers {
    fn entries(&self) -> Vec<PeerEntry> {
        self.entries.clone()
    }
}

/// How a peer total was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeBasis {
    Exact,
    Estimated,
    RecordedStock,
    Placeholder,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PeerTotal {
    pub name: String,
    pub group: String,
    pub amount: MinorUnits,
    pub basis: FeeBasis,
}

impl PeerTotal {
    pub fn accuracy_tag(&self) -> &'static str {
        match self.basis {
            FeeBasis::Exact => "[exact]",
            _ => "[estimated]",
        }
    }
}

/// Resolves peer totals against an optional exact-fee source.
pub struct FeeResolver {
    fees: Option<Arc<dyn FeeSource>>,
}

impl FeeResolver {
    pub fn new(fees: Option<Arc<dyn FeeSource>>) -> Self {
        Self { fees }
    }

    /// Total for one peer entry, never negative.
    ///
    /// With a credential: the sum of exact fees over its products. Without
    /// one but with a recorded stock: the sum of one-hour estimates, or the
    /// recorded stock when no estimate is positive. Otherwise 1.
    pub async fn resolve(&self, entry: &PeerEntry, estimator: &EstimationEngine) -> PeerTotal {
        let (amount, basis) = match (&entry.credential, entry.stock) {
            (Some(credential), _) => (self.exact_total(entry, credential).await, FeeBasis::Exact),
            (None, Some(stock)) => match estimated_total(entry, estimator) {
                Some(total) => (total, FeeBasis::Estimated),
                None => {
                    debug!(peer = %entry.name, stock, "No positive estimate, using recorded stock");
                    (stock, FeeBasis::RecordedStock)
                }
            },
            (None, None) => (1, FeeBasis::Placeholder),
        };

        PeerTotal {
            name: entry.name.clone(),
            group: entry.group().to_string(),
            amount: amount.max(0),
            basis,
        }
    }

    pub async fn resolve_all(
        &self,
        peers: &dyn PeerDirectory,
        estimator: &EstimationEngine,
    ) -> Vec<PeerTotal> {
        let mut totals = Vec::new();
        for entry in peers.entries() {
            totals.push(self.resolve(&entry, estimator).await);
        }
        totals
    }

    async fn exact_total(&self, entry: &PeerEntry, credential: &SecretString) -> MinorUnits {
        let Some(fees) = &self.fees else {
            warn!(peer = %entry.name, "Credential configured but no fee source available");
            return 0;
        };

        let mut total: MinorUnits = 0;
        for &product_id in &entry.product_ids {
            match fees.exact_fee(credential, product_id).await {
                Ok(fee) => {
                    if fee > 0 && total.checked_add(fee).is_none() {
                        warn!(peer = %entry.name, product_id, total, fee, "Fee total overflowed, clamping");
                        return MinorUnits::MAX;
                    }
                    total = money::add(total, fee);
                }
                Err(e) => {
                    warn!(peer = %entry.name, product_id, error = %e, "Exact fee lookup failed");
                }
            }
        }
        total.max(0)
    }
}

/// Sum of positive one-hour combined estimates over the entry's products.
fn estimated_total(entry: &PeerEntry, estimator: &EstimationEngine) -> Option<MinorUnits> {
    let mut total: MinorUnits = 0;
    for &product_id in &entry.product_ids {
        let Ok(result) = estimator.estimate(product_id, Duration::hours(1)) else {
            continue;
        };
        if result.estimated_amount <= 0 {
            continue;
        }
        if total.checked_add(result.estimated_amount).is_none() {
            warn!(peer = %entry.name, product_id, "Estimated total overflowed, clamping");
            return Some(MinorUnits::MAX);
        }
        total += result.estimated_amount;
    }
    if total > 0 {
        info!(peer = %entry.name, total, "Peer total from sales estimates");
        Some(total)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
