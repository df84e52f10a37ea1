//! STOCKPULSE: stock-sampling sales estimation engine.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! builds the engine, starts the configured monitors and the API, and
//! runs until Ctrl+C triggers a graceful shutdown.

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};

use stockpulse::api;
use stockpulse::config;
use stockpulse::engine::SalesEngine;

const BANNER: &str = r#"
 ___ _____ ___   ___ _  _____ _   _ _    ___ ___
/ __|_   _/ _ \ / __| |/ / _ \ | | | |  / __| __|
\__ \ | || (_) | (__| ' <|  _/ |_| | |__\__ \ _|
|___/ |_| \___/ \___|_|\_\_|  \___/|____|___/___|

  Stock-sampling sales estimation engine
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;

    init_logging();

    println!("{BANNER}");
    info!(
        history_cap = cfg.sampler.history_cap,
        retention_hours = cfg.sampler.retention_hours,
        gateway_workers = cfg.gateway.workers,
        web_workers = cfg.web.workers,
        peers = cfg.peers.len(),
        "STOCKPULSE starting up"
    );

    let engine = Arc::new(SalesEngine::from_config(cfg.clone())?);
    engine.start_maintenance();

    // -- Startup monitors ------------------------------------------------

    for &product_id in &cfg.monitor.product_ids {
        let result = match cfg.monitor.interval_mins {
            Some(interval_mins) => engine.start_monitoring(product_id, interval_mins).map(|_| interval_mins),
            None => engine.start_smart_monitoring(product_id),
        };
        match result {
            Ok(interval_mins) => info!(product_id, interval_mins, "Monitoring configured product"),
            Err(e) => warn!(product_id, error = %e, "Failed to start monitoring"),
        }
    }

    // -- API server ------------------------------------------------------

    let server = if cfg.api.enabled {
        Some(api::spawn_api(Arc::clone(&engine), cfg.api.port).await?)
    } else {
        info!("API disabled in config");
        None
    };

    info!("Running. Press Ctrl+C to stop.");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received.");

    if let Some(handle) = server {
        handle.abort();
    }
    engine.shutdown().await;

    let stats = engine.stats();
    info!(
        requests = stats.metrics.http_requests,
        errors = stats.metrics.errors,
        "STOCKPULSE shut down cleanly."
    );

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("stockpulse=info"));

    let json_logging = std::env::var("STOCKPULSE_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
