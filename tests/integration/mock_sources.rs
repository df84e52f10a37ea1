//! In-memory upstream sources for integration testing.
//!
//! Deterministic `InventorySource`, `PageSource` and `FeeSource`
//! implementations whose responses are fully controllable from test code.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use stockpulse::platform::{FeeSource, InventorySource, PageResponse, PageSource};
use stockpulse::types::{Inventory, MinorUnits, ProductId, VariantStock};

/// Inventory source replaying a script per product. The last scripted
/// inventory repeats once the script runs out.
#[derive(Default)]
pub struct ScriptedInventory {
    scripts: Mutex<HashMap<ProductId, VecDeque<Inventory>>>,
    last: Mutex<HashMap<ProductId, Inventory>>,
    calls: AtomicUsize,
    force_error: Mutex<Option<String>>,
}

impl ScriptedInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, inventory: Inventory) {
        self.scripts
            .lock()
            .unwrap()
            .entry(inventory.product_id)
            .or_default()
            .push_back(inventory);
    }

    /// Force all subsequent fetches to fail.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InventorySource for ScriptedInventory {
    async fn fetch_inventory(&self, product_id: ProductId) -> Result<Inventory> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = self.force_error.lock().unwrap().clone() {
            return Err(anyhow!(msg));
        }
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&product_id)
            .and_then(|q| q.pop_front());
        let mut last = self.last.lock().unwrap();
        match next {
            Some(inventory) => {
                last.insert(product_id, inventory.clone());
                Ok(inventory)
            }
            None => last
                .get(&product_id)
                .cloned()
                .ok_or_else(|| anyhow!("unknown product {product_id}")),
        }
    }
}

/// Two-variant inventory used across scenarios.
pub fn two_variants(product_id: ProductId, red_qty: i64, blue_qty: i64) -> Inventory {
    Inventory {
        product_id,
        variants: vec![
            VariantStock {
                variant_id: "red".into(),
                unit_price: 100,
                stock_qty: red_qty,
                display_name: "Red".into(),
            },
            VariantStock {
                variant_id: "blue".into(),
                unit_price: 250,
                stock_qty: blue_qty,
                display_name: "Blue".into(),
            },
        ],
    }
}

/// Page source serving fixed bodies per product; unknown ids get a 404.
#[derive(Default)]
pub struct FixedPages {
    pages: HashMap<ProductId, String>,
}

impl FixedPages {
    pub fn with_page(mut self, product_id: ProductId, body: &str) -> Self {
        self.pages.insert(product_id, body.to_string());
        self
    }
}

#[async_trait]
impl PageSource for FixedPages {
    async fn fetch_page(&self, product_id: ProductId) -> Result<PageResponse> {
        Ok(match self.pages.get(&product_id) {
            Some(body) => PageResponse { status: 200, body: body.clone() },
            None => PageResponse { status: 404, body: String::new() },
        })
    }
}

/// Fee source keyed by (credential, product). Missing pairs fail.
#[derive(Default)]
pub struct FixedFees {
    fees: HashMap<(String, ProductId), MinorUnits>,
}

impl FixedFees {
    pub fn with_fee(mut self, credential: &str, product_id: ProductId, fee: MinorUnits) -> Self {
        self.fees.insert((credential.to_string(), product_id), fee);
        self
    }
}

#[async_trait]
impl FeeSource for FixedFees {
    async fn exact_fee(&self, credential: &SecretString, product_id: ProductId) -> Result<MinorUnits> {
        self.fees
            .get(&(credential.expose_secret().clone(), product_id))
            .copied()
            .ok_or_else(|| anyhow!("no fee for product {product_id}"))
    }
}
