//! Upstream integrations.
//!
//! Defines the async traits the engine talks to and provides reqwest
//! implementations for the Weidian inventory API and product page:
//! - `InventorySource`: per-variant price and stock for a product
//! - `PageSource`: raw HTML of the public product page
//! - `FeeSource`: exact fee total behind a peer credential

pub mod weidian;

use anyhow::Result;
use async_trait::async_trait;
use secrecy::SecretString;

use crate::types::{Inventory, MinorUnits, ProductId};

/// Abstraction over the inventory API.
///
/// Implementors return an error for non-zero status codes so the caller
/// can treat the tick as "no data".
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InventorySource: Send + Sync {
    async fn fetch_inventory(&self, product_id: ProductId) -> Result<Inventory>;
}

/// A fetched page: status code plus opaque body text.
#[derive(Debug, Clone)]
pub struct PageResponse {
    pub status: u16,
    pub body: String,
}

/// Abstraction over the public product page.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, product_id: ProductId) -> Result<PageResponse>;
}

/// Exact fee retrieval for callers holding a platform credential.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeeSource: Send + Sync {
    async fn exact_fee(&self, credential: &SecretString, product_id: ProductId) -> Result<MinorUnits>;
}
