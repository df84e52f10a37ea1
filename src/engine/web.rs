//! Web-scrape fallback: sale counts read off the public product page.
//!
//! Independent of the stock history. Results, including failures, are
//! cached for the configured TTL so a broken page is not hammered.
//! Fetches run on the extractor's own worker pool.

use chrono::{Duration as ChronoDuration, Utc};
use futures::future::join_all;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use super::estimator::validate_window;
use super::metrics::EngineMetrics;
use super::pool::{PoolConfig, PoolStats, WorkerPool};
use crate::cache::{CacheStats, TtlCache};
use crate::config::WebConfig;
use crate::platform::PageSource;
use crate::types::{
    validate_product_id, MinorUnits, ProductId, SalesComparison, SalesError, SalesResult,
    WebSalesData,
};

/// Sale-count patterns, most specific first. Group 1 is the count.
const SALES_PATTERNS: &[&str] = &[
    r#"<em[^>]*class="sale-count"[^>]*>销量\s*(\d+)</em>"#,
    r#"<em[^>]*class="sale-count"[^>]*>已售\s*(\d+)</em>"#,
    r#"<em[^>]*class='sale-count'[^>]*>销量\s*(\d+)</em>"#,
    r#"<em[^>]*class='sale-count'[^>]*>已售\s*(\d+)</em>"#,
    r#"class="[^"]*sale-count[^"]*"[^>]*>(?:销量|已售)\s*(\d+)"#,
    r#"class='[^']*sale-count[^']*'[^>]*>(?:销量|已售)\s*(\d+)"#,
    r#"data-v-[^=]*="[^"]*"[^>]*class="sale-count"[^>]*>(?:销量|已售)\s*(\d+)"#,
    r"销量\s*(\d+)",
    r"已售\s*(\d+)",
    r"售出\s*(\d+)",
    r"销售\s*(\d+)",
    r#""sales":\s*(\d+)"#,
    r#""soldCount":\s*(\d+)"#,
];

const PRICE_PATTERNS: &[&str] = &[
    r"(\d+\.\d+)\s*起",
    r"￥(\d+\.\d+)",
    r"价格[：:]\s*(\d+\.\d+)",
];

const SALE_COUNT_ELEMENT: &str = r"<[^>]*sale-count[^>]*>[^<]*</[^>]*>";

pub const NO_MARKER: &str = "no sales marker found in page";

/// Compiled page patterns.
pub struct SalesPageParser {
    sales: Vec<Regex>,
    prices: Vec<Regex>,
    sale_count_element: Regex,
}

impl SalesPageParser {
    pub fn new() -> SalesResult<Self> {
        let compile = |p: &str| {
            Regex::new(p).map_err(|e| SalesError::Config(format!("bad page pattern {p:?}: {e}")))
        };
        Ok(Self {
            sales: SALES_PATTERNS.iter().map(|p| compile(p)).collect::<SalesResult<_>>()?,
            prices: PRICE_PATTERNS.iter().map(|p| compile(p)).collect::<SalesResult<_>>()?,
            sale_count_element: compile(SALE_COUNT_ELEMENT)?,
        })
    }

    /// First pattern whose count parses wins.
    pub fn parse(&self, product_id: ProductId, html: &str) -> WebSalesData {
        let found = self.sales.iter().find_map(|re| {
            let caps = re.captures(html)?;
            let count = caps.get(1)?.as_str().parse::<u64>().ok()?;
            Some((count, caps.get(0).map_or("", |m| m.as_str()).to_string()))
        });

        let Some((count, matched_text)) = found else {
            self.log_unmatched(product_id, html);
            return WebSalesData::invalid(product_id, NO_MARKER);
        };

        debug!(product_id, count, matched = %matched_text, "Sale count parsed");
        WebSalesData::parsed(product_id, count, self.price_range(html), matched_text)
    }

    pub fn price_range(&self, html: &str) -> String {
        self.prices
            .iter()
            .find_map(|re| re.find(html))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    }

    fn log_unmatched(&self, product_id: ProductId, html: &str) {
        if !html.contains("sale-count") {
            return;
        }
        match self.sale_count_element.find(html) {
            Some(el) => debug!(product_id, element = el.as_str(), "Unrecognised sale-count element"),
            None => debug!(product_id, "Page mentions sale-count but no element matched"),
        }
    }
}

pub struct WebFallbackExtractor {
    pages: Arc<dyn PageSource>,
    parser: Arc<SalesPageParser>,
    cache: Arc<TtlCache<ProductId, WebSalesData>>,
    pool: WorkerPool,
    batch_timeout: Duration,
    assumed_unit_price: MinorUnits,
    metrics: Arc<EngineMetrics>,
}

impl WebFallbackExtractor {
    pub fn new(
        pages: Arc<dyn PageSource>,
        config: &WebConfig,
        metrics: Arc<EngineMetrics>,
    ) -> SalesResult<Self> {
        Ok(Self {
            pages,
            parser: Arc::new(SalesPageParser::new()?),
            cache: Arc::new(TtlCache::new("web", ChronoDuration::seconds(config.cache_ttl_secs))),
            pool: WorkerPool::new(
                "web",
                PoolConfig {
                    workers: config.workers,
                    queue_capacity: config.queue_capacity,
                },
            ),
            batch_timeout: Duration::from_secs(config.batch_timeout_secs),
            assumed_unit_price: config.assumed_unit_price,
            metrics,
        })
    }

    /// Scraped sale count for a product, cached.
    ///
    /// Page failures come back as `valid == false` with a reason; only a
    /// bad id or a shut-down pool is an `Err`.
    pub async fn web_sales(&self, product_id: ProductId) -> SalesResult<WebSalesData> {
        validate_product_id(product_id)?;
        if let Some(hit) = self.cache.get(&product_id) {
            return Ok(hit);
        }

        let pages = Arc::clone(&self.pages);
        let parser = Arc::clone(&self.parser);
        let cache = Arc::clone(&self.cache);
        let metrics = Arc::clone(&self.metrics);
        self.pool
            .run(async move {
                metrics.record_http_request();
                let data = match pages.fetch_page(product_id).await {
                    Ok(page) if page.status == 200 => parser.parse(product_id, &page.body),
                    Ok(page) => {
                        warn!(product_id, status = page.status, "Product page returned error status");
                        metrics.record_error();
                        WebSalesData::invalid(product_id, format!("HTTP error: {}", page.status))
                    }
                    Err(e) => {
                        warn!(product_id, error = %e, "Product page request failed");
                        metrics.record_error();
                        WebSalesData::invalid(product_id, format!("network error: {e:#}"))
                    }
                };
                cache.insert(product_id, data.clone());
                if data.valid {
                    info!(product_id, sales_count = data.sales_count, "Web sales fetched");
                }
                data
            })
            .await
    }

    /// Set an estimate against the web-implied amount.
    pub async fn compare(
        &self,
        product_id: ProductId,
        estimated: MinorUnits,
        window: ChronoDuration,
    ) -> SalesResult<SalesComparison> {
        validate_window(window)?;
        let web = self.web_sales(product_id).await?;
        Ok(self.compare_with(&web, estimated, window))
    }

    pub fn compare_with(
        &self,
        web: &WebSalesData,
        estimated: MinorUnits,
        window: ChronoDuration,
    ) -> SalesComparison {
        if !web.valid {
            return SalesComparison {
                product_id: web.product_id,
                web_sales_count: 0,
                estimated_amount: estimated,
                web_implied_amount: 0,
                accuracy: 0.0,
                analysis: format!("web sales unavailable: {}", web.reason()),
                web_valid: false,
            };
        }

        let count = i64::try_from(web.sales_count).unwrap_or(i64::MAX);
        let implied = crate::money::mul(count, self.assumed_unit_price);
        let accuracy = if implied > 0 {
            let diff = (estimated as f64 - implied as f64).abs();
            (1.0 - diff / implied as f64).clamp(0.0, 1.0)
        } else {
            0.0
        };

        SalesComparison {
            product_id: web.product_id,
            web_sales_count: web.sales_count,
            estimated_amount: estimated,
            web_implied_amount: implied,
            accuracy,
            analysis: format!(
                "web count {} units, estimate {} over {} min, web-implied {} (at {} per unit), accuracy {:.2}%",
                web.sales_count,
                estimated,
                window.num_minutes(),
                implied,
                self.assumed_unit_price,
                accuracy * 100.0
            ),
            web_valid: true,
        }
    }

    /// Scrape many products concurrently within one overall timeout.
    ///
    /// Never fails as a whole: ids that error or are still pending at the
    /// deadline get an "unavailable" marker.
    pub async fn web_sales_batch(&self, product_ids: &[ProductId]) -> HashMap<ProductId, WebSalesData> {
        let mut ids = product_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return HashMap::new();
        }

        let deadline = Instant::now() + self.batch_timeout;
        let started = Utc::now();
        let lookups = ids.iter().map(|&id| async move {
            let data = match timeout_at(deadline, self.web_sales(id)).await {
                Ok(Ok(data)) => data,
                Ok(Err(e)) => WebSalesData::unavailable(id, &e.to_string()),
                Err(_) => {
                    warn!(product_id = id, "Web sales lookup timed out in batch");
                    WebSalesData::unavailable(id, "batch timed out")
                }
            };
            (id, data)
        });
        let results: HashMap<_, _> = join_all(lookups).await.into_iter().collect();

        info!(
            requested = ids.len(),
            valid = results.values().filter(|d| d.valid).count(),
            elapsed_ms = (Utc::now() - started).num_milliseconds(),
            "Batch web sales lookup complete"
        );
        results
    }

    pub fn sweep_cache(&self) -> usize {
        self.cache.sweep()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub async fn shutdown(&self, grace: Duration) {
        self.pool.shutdown(grace).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
