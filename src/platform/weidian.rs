//! Weidian storefront clients.
//!
//! Inventory: `https://thor.weidian.com/detail/getItemSkuInfo/1.0?param={"itemId":"…"}`
//! Product page: `https://weidian.com/item.html?itemID=…`
//! Auth: None required for either endpoint.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{InventorySource, PageResponse, PageSource};
use crate::types::{Inventory, ProductId, SalesError, VariantStock};

const STOCK_API: &str = "https://thor.weidian.com/detail/getItemSkuInfo/1.0";
const ITEM_PAGE: &str = "https://weidian.com/item.html";

const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SkuInfoResponse {
    status: ApiStatus,
    #[serde(default)]
    result: Option<SkuInfoResult>,
}

#[derive(Debug, Deserialize)]
struct ApiStatus {
    code: i64,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SkuInfoResult {
    #[serde(default)]
    sku_infos: Option<Vec<SkuEnvelope>>,
    #[serde(default)]
    item_discount_high_price: i64,
    #[serde(default)]
    item_stock: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SkuEnvelope {
    sku_info: SkuInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SkuInfo {
    #[serde(default, deserialize_with = "id_string")]
    sku_id: String,
    #[serde(default)]
    original_price: i64,
    #[serde(default)]
    stock: i64,
    #[serde(default)]
    sku_name: String,
}

/// SKU ids come back as either strings or numbers.
fn id_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Decode an inventory API body into an `Inventory`.
///
/// A missing `skuInfos` listing means the product is sold as a single
/// implicit variant priced at `itemDiscountHighPrice`.
pub fn parse_inventory(product_id: ProductId, body: &str) -> Result<Inventory, SalesError> {
    let resp: SkuInfoResponse = serde_json::from_str(body)
        .map_err(|e| SalesError::Parse(format!("inventory response: {e}")))?;

    if resp.status.code != 0 {
        return Err(SalesError::Upstream {
            code: resp.status.code,
            message: resp.status.message.unwrap_or_default(),
        });
    }

    let result = resp
        .result
        .ok_or_else(|| SalesError::Parse("inventory response has no result".into()))?;

    let inventory = match result.sku_infos {
        Some(skus) => Inventory {
            product_id,
            variants: skus
                .into_iter()
                .map(|e| VariantStock {
                    variant_id: e.sku_info.sku_id,
                    unit_price: e.sku_info.original_price,
                    stock_qty: e.sku_info.stock,
                    display_name: e.sku_info.sku_name,
                })
                .collect(),
        },
        None => Inventory::single(
            product_id,
            result.item_discount_high_price,
            result.item_stock,
        ),
    };
    Ok(inventory)
}

fn stock_url(product_id: ProductId) -> String {
    let param = format!("{{\"itemId\":\"{product_id}\"}}");
    format!("{STOCK_API}?param={}", urlencoding::encode(&param))
}

fn page_url(product_id: ProductId) -> String {
    format!("{ITEM_PAGE}?itemID={product_id}")
}

// ---------------------------------------------------------------------------
// Clients
// ---------------------------------------------------------------------------

pub struct WeidianInventoryClient {
    http: Client,
}

impl WeidianInventoryClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(BROWSER_UA)
            .build()
            .context("Failed to build inventory HTTP client")?;
        Ok(Self { http })
    }
}

#[async_trait]
impl InventorySource for WeidianInventoryClient {
    async fn fetch_inventory(&self, product_id: ProductId) -> Result<Inventory> {
        let url = stock_url(product_id);
        let resp = self.http.get(&url).send().await
            .context("Inventory request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            anyhow::bail!("Inventory API error: {status}");
        }

        let body = resp.text().await
            .context("Failed to read inventory response")?;
        let inventory = parse_inventory(product_id, &body)?;
        debug!(product_id, variants = inventory.variants.len(), "Inventory fetched");
        Ok(inventory)
    }
}

pub struct WeidianPageClient {
    http: Client,
}

impl WeidianPageClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static(
                "zh-CN,zh;q=0.8,zh-TW;q=0.7,zh-HK;q=0.5,en-US;q=0.3,en;q=0.2",
            ),
        );
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(BROWSER_UA)
            .default_headers(headers)
            .build()
            .context("Failed to build product page HTTP client")?;
        Ok(Self { http })
    }
}

#[async_trait]
impl PageSource for WeidianPageClient {
    async fn fetch_page(&self, product_id: ProductId) -> Result<PageResponse> {
        let resp = self.http.get(page_url(product_id)).send().await
            .context("Product page request failed")?;
        let status = resp.status().as_u16();
        let body = resp.text().await
            .context("Failed to read product page body")?;
        Ok(PageResponse { status, body })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
