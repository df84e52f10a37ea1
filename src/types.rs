//! Shared types for the STOCKPULSE engine.
//!
//! These types form the data model used across all modules. Monetary
//! amounts are integer minor units (fen) throughout; nothing in the
//! engine works with floating-point money.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::money;

/// Platform-assigned product (item) identifier.
pub type ProductId = u64;

/// Monetary amount in currency minor units.
pub type MinorUnits = i64;

/// Variant id used when the platform reports no variant listing.
pub const DEFAULT_VARIANT_ID: &str = "default";

// ---------------------------------------------------------------------------
// Inventory (decoded upstream response)
// ---------------------------------------------------------------------------

/// One purchasable option of a product as reported by the inventory API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantStock {
    pub variant_id: String,
    pub unit_price: MinorUnits,
    pub stock_qty: i64,
    pub display_name: String,
}

/// Current inventory of a product across all of its variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub product_id: ProductId,
    pub variants: Vec<VariantStock>,
}

impl Inventory {
    /// Inventory for a product sold as a single implicit variant.
    pub fn single(product_id: ProductId, unit_price: MinorUnits, stock_qty: i64) -> Self {
        Self {
            product_id,
            variants: vec![VariantStock {
                variant_id: DEFAULT_VARIANT_ID.to_string(),
                unit_price,
                stock_qty,
                display_name: "default".to_string(),
            }],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    /// Σ unit_price × stock_qty, clamped on overflow.
    pub fn total_value(&self) -> MinorUnits {
        self.variants.iter().fold(0, |acc, v| {
            money::add(acc, money::mul(v.unit_price, v.stock_qty))
        })
    }

    /// Split into the snapshot stock map and the variant metadata map.
    pub fn split(&self) -> (HashMap<String, i64>, HashMap<String, VariantInfo>) {
        let mut stock = HashMap::with_capacity(self.variants.len());
        let mut info = HashMap::with_capacity(self.variants.len());
        for v in &self.variants {
            stock.insert(v.variant_id.clone(), v.stock_qty);
            info.insert(
                v.variant_id.clone(),
                VariantInfo {
                    variant_id: v.variant_id.clone(),
                    unit_price: v.unit_price,
                    display_name: v.display_name.clone(),
                },
            );
        }
        (stock, info)
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Latest known metadata for one variant. Replaced wholesale per sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantInfo {
    pub variant_id: String,
    pub unit_price: MinorUnits,
    pub display_name: String,
}

/// One point-in-time observation of a product's stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSnapshot {
    pub timestamp: DateTime<Utc>,
    pub total_stock_value: MinorUnits,
    pub per_variant_stock: HashMap<String, i64>,
}

impl StockSnapshot {
    pub fn new(
        timestamp: DateTime<Utc>,
        total_stock_value: MinorUnits,
        per_variant_stock: HashMap<String, i64>,
    ) -> Self {
        Self {
            timestamp,
            total_stock_value,
            per_variant_stock,
        }
    }

    /// Build a snapshot from a fetched inventory, stamped at `timestamp`.
    pub fn from_inventory(inventory: &Inventory, timestamp: DateTime<Utc>) -> Self {
        let (stock, _) = inventory.split();
        Self::new(timestamp, inventory.total_value(), stock)
    }
}

// ---------------------------------------------------------------------------
// Confidence
// ---------------------------------------------------------------------------

/// Coarse reliability tier of an estimate.
///
/// Declared lowest-first so the derived ordering matches reliability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    VeryLow,
    Low,
    Medium,
    High,
}

impl Confidence {
    /// Numeric weight used by the combiner.
    pub fn weight(self) -> u32 {
        match self {
            Confidence::High => 90,
            Confidence::Medium => 75,
            Confidence::Low => 60,
            Confidence::VeryLow => 40,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Confidence::High => "exact",
            Confidence::Medium => "fairly accurate",
            Confidence::Low => "estimated",
            Confidence::VeryLow => "rough",
        }
    }

    /// One tier down; Low and VeryLow stay put.
    pub fn downgraded(self) -> Self {
        match self {
            Confidence::High => Confidence::Medium,
            Confidence::Medium => Confidence::Low,
            other => other,
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}%)", self.label(), self.weight())
    }
}

// ---------------------------------------------------------------------------
// Estimation
// ---------------------------------------------------------------------------

/// Output of one estimator or of the combiner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationResult {
    pub estimated_amount: MinorUnits,
    pub confidence: Confidence,
    pub method: String,
    pub details: BTreeMap<String, serde_json::Value>,
}

impl EstimationResult {
    pub fn new(estimated_amount: MinorUnits, confidence: Confidence, method: impl Into<String>) -> Self {
        Self {
            estimated_amount,
            confidence,
            method: method.into(),
            details: BTreeMap::new(),
        }
    }

    /// Zero estimate for an estimator that had nothing to go on.
    pub fn inapplicable(method: &str, reason: &str) -> Self {
        Self::new(0, Confidence::VeryLow, format!("{method} (no data)"))
            .with_detail("reason", reason)
    }

    /// The combiner's "nothing contributed" result.
    pub fn no_data() -> Self {
        Self::new(0, Confidence::VeryLow, "no data")
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    /// Whether this result takes part in the weighted combination.
    pub fn contributes(&self) -> bool {
        self.estimated_amount > 0
    }
}

impl fmt::Display for EstimationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} minor units via {} [{}]",
            self.estimated_amount, self.method, self.confidence
        )
    }
}

/// Per-variant sales inferred over a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkuSales {
    pub variant_id: String,
    pub display_name: String,
    pub sold_qty: i64,
    pub sold_value: MinorUnits,
}

// ---------------------------------------------------------------------------
// Web scrape results
// ---------------------------------------------------------------------------

/// Sale count scraped from the public product page.
///
/// `valid == false` means "could not determine"; it is never a disguised zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSalesData {
    pub product_id: ProductId,
    pub sales_count: u64,
    pub price_range: String,
    pub fetched_at: DateTime<Utc>,
    pub valid: bool,
    pub matched_text: String,
    pub reason: Option<String>,
}

impl WebSalesData {
    pub fn parsed(
        product_id: ProductId,
        sales_count: u64,
        price_range: String,
        matched_text: String,
    ) -> Self {
        Self {
            product_id,
            sales_count,
            price_range,
            fetched_at: Utc::now(),
            valid: true,
            matched_text,
            reason: None,
        }
    }

    pub fn invalid(product_id: ProductId, reason: impl Into<String>) -> Self {
        Self {
            product_id,
            sales_count: 0,
            price_range: String::new(),
            fetched_at: Utc::now(),
            valid: false,
            matched_text: String::new(),
            reason: Some(reason.into()),
        }
    }

    /// Marker used by batch fetches for ids that did not resolve.
    pub fn unavailable(product_id: ProductId, why: &str) -> Self {
        Self::invalid(product_id, format!("unavailable: {why}"))
    }

    pub fn reason(&self) -> &str {
        self.reason.as_deref().unwrap_or("")
    }
}

/// Estimated sales set against the web-implied figure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesComparison {
    pub product_id: ProductId,
    pub web_sales_count: u64,
    pub estimated_amount: MinorUnits,
    pub web_implied_amount: MinorUnits,
    /// 0.0 to 1.0
    pub accuracy: f64,
    pub analysis: String,
    pub web_valid: bool,
}

impl SalesComparison {
    pub fn accuracy_level(&self) -> &'static str {
        if self.accuracy >= 0.9 {
            "very accurate"
        } else if self.accuracy >= 0.8 {
            "fairly accurate"
        } else if self.accuracy >= 0.7 {
            "moderately accurate"
        } else if self.accuracy >= 0.5 {
            "low accuracy"
        } else {
            "very low accuracy"
        }
    }
}

// ---------------------------------------------------------------------------
// Gateway lookups
// ---------------------------------------------------------------------------

/// Per-id result of a batch inventory lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StockLookup {
    Available(Inventory),
    Unavailable { reason: String },
}

impl StockLookup {
    pub fn is_available(&self) -> bool {
        matches!(self, StockLookup::Available(_))
    }

    pub fn total_value(&self) -> Option<MinorUnits> {
        match self {
            StockLookup::Available(inv) => Some(inv.total_value()),
            StockLookup::Unavailable { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for STOCKPULSE.
#[derive(Debug, thiserror::Error)]
pub enum SalesError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Fetch failed for product {product_id}: {message}")]
    Fetch { product_id: ProductId, message: String },

    #[error("Upstream error ({code}): {message}")]
    Upstream { code: i64, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Worker pool '{0}' is shut down")]
    PoolClosed(&'static str),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type SalesResult<T> = std::result::Result<T, SalesError>;

/// Reject the zero id at public entry points.
pub fn validate_product_id(product_id: ProductId) -> SalesResult<()> {
    if product_id == 0 {
        return Err(SalesError::InvalidInput("product id must be non-zero".into()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
