//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Every section and field has a default, so a partial (or empty) file
//! loads. Peer credentials are referenced by env-var name in the config
//! and resolved at startup into `SecretString`s.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use tracing::warn;

use crate::engine::peers::PeerEntry;
use crate::engine::pool::MAX_POOL_SIZE;
use crate::types::{MinorUnits, ProductId, SalesError, SalesResult};

const MAX_RETENTION_HOURS: i64 = 366 * 24;
const MAX_CACHE_TTL_SECS: i64 = 24 * 3600;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub sampler: SamplerConfig,
    pub gateway: GatewayConfig,
    pub web: WebConfig,
    pub maintenance: MaintenanceConfig,
    pub api: ApiConfig,
    pub monitor: MonitorConfig,
    pub peers: Vec<PeerConfig>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SamplerConfig {
    /// Snapshots kept per product.
    pub history_cap: usize,
    pub retention_hours: i64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            history_cap: crate::store::DEFAULT_HISTORY_CAP,
            retention_hours: crate::store::DEFAULT_RETENTION_HOURS,
        }
    }
}

/// Inventory gateway: cache, pool and batch bounds.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    pub cache_ttl_secs: i64,
    pub workers: usize,
    pub queue_capacity: usize,
    pub request_timeout_secs: u64,
    pub batch_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 60,
            workers: 20,
            queue_capacity: 100,
            request_timeout_secs: 10,
            batch_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WebConfig {
    pub cache_ttl_secs: i64,
    pub workers: usize,
    pub queue_capacity: usize,
    pub request_timeout_secs: u64,
    pub batch_timeout_secs: u64,
    /// Unit price assumed when turning a scraped sale count into money.
    pub assumed_unit_price: MinorUnits,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            workers: 8,
            queue_capacity: 100,
            request_timeout_secs: 10,
            batch_timeout_secs: 30,
            assumed_unit_price: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub cleanup_interval_secs: u64,
    pub report_interval_secs: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: 300,
            report_interval_secs: 30,
            shutdown_grace_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { enabled: true, port: 8080 }
    }
}

/// Products monitored from startup.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MonitorConfig {
    pub product_ids: Vec<ProductId>,
    /// Fixed interval; omitted means pick one from the observed rate.
    pub interval_mins: Option<u32>,
}

/// One peer entry as written in `[[peers]]`.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PeerConfig {
    pub name: String,
    pub product_ids: Vec<ProductId>,
    pub stock: Option<i64>,
    /// Name of the env var holding this peer's platform credential.
    pub credential_env: Option<String>,
    pub group: Option<String>,
}

impl PeerConfig {
    /// Resolve into a runtime entry. A credential env var that is named
    /// but unset is logged and treated as absent.
    pub fn into_entry(self) -> PeerEntry {
        let credential = self.credential_env.as_deref().and_then(|env| {
            match AppConfig::resolve_env(env) {
                Ok(value) if !value.trim().is_empty() => Some(SecretString::new(value)),
                Ok(_) => None,
                Err(e) => {
                    warn!(peer = %self.name, error = %e, "Peer credential unavailable");
                    None
                }
            }
        });
        PeerEntry {
            name: self.name,
            product_ids: self.product_ids,
            stock: self.stock,
            credential,
            group: self.group,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {path}"))?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> SalesResult<()> {
        let bad = |msg: &str| Err(SalesError::Config(msg.to_string()));
        if !(1..=MAX_RETENTION_HOURS).contains(&self.sampler.retention_hours) {
            return bad("sampler.retention_hours must be between 1 and 8784");
        }
        let ttl_ok = |ttl: i64| (0..=MAX_CACHE_TTL_SECS).contains(&ttl);
        if !ttl_ok(self.gateway.cache_ttl_secs) || !ttl_ok(self.web.cache_ttl_secs) {
            return bad("cache TTLs must be between 0 and 86400 seconds");
        }
        if self.gateway.workers == 0 || self.web.workers == 0 {
            return bad("worker pools need at least one worker");
        }
        let sizes = [
            self.gateway.workers,
            self.gateway.queue_capacity,
            self.web.workers,
            self.web.queue_capacity,
        ];
        if sizes.iter().any(|&n| n > MAX_POOL_SIZE) {
            return bad("pool workers and queue_capacity must be at most 10000");
        }
        if self.web.assumed_unit_price <= 0 {
            return bad("web.assumed_unit_price must be positive");
        }
        if self.maintenance.cleanup_interval_secs == 0 || self.maintenance.report_interval_secs == 0 {
            return bad("maintenance intervals must be positive");
        }
        if self.monitor.product_ids.contains(&0) {
            return bad("monitor.product_ids must not contain 0");
        }
        if self.monitor.interval_mins == Some(0) {
            return bad("monitor.interval_mins must be positive");
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Runtime peer entries with credentials resolved.
    pub fn peer_entries(&self) -> Vec<PeerEntry> {
        self.peers.iter().cloned().map(PeerConfig::into_entry).collect()
    }
}
