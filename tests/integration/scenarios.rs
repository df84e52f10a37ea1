//! End-to-end engine scenarios against in-memory sources.

use chrono::{Duration as ChronoDuration, Utc};
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

use stockpulse::config::AppConfig;
use stockpulse::engine::peers::{FeeBasis, PeerEntry, StaticPeers};
use stockpulse::engine::sampler::SampleOutcome;
use stockpulse::engine::SalesEngine;
use stockpulse::platform::FeeSource;
use stockpulse::types::{Confidence, Inventory, StockLookup, StockSnapshot};

use crate::mock_sources::{two_variants, FixedFees, FixedPages, ScriptedInventory};

fn test_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    // Every sample reaches the source.
    cfg.gateway.cache_ttl_secs = 0;
    cfg.maintenance.shutdown_grace_secs = 1;
    cfg
}

fn build(
    inventory: Arc<ScriptedInventory>,
    pages: FixedPages,
    peers: Vec<PeerEntry>,
    fees: Option<FixedFees>,
) -> SalesEngine {
    SalesEngine::new(
        test_config(),
        inventory,
        Arc::new(pages),
        Arc::new(StaticPeers::new(peers)),
        fees.map(|f| Arc::new(f) as Arc<dyn FeeSource>),
    )
    .unwrap()
}

/// 10000 half an hour ago, 7000 now.
fn seed_half_hour_drop(engine: &SalesEngine, product_id: u64) {
    let now = Utc::now();
    engine.store().append(
        product_id,
        StockSnapshot::new(now - ChronoDuration::minutes(30), 10_000, HashMap::new()),
    );
    engine
        .store()
        .append(product_id, StockSnapshot::new(now, 7_000, HashMap::new()));
}

fn peer(name: &str, product_ids: Vec<u64>, stock: Option<i64>, credential: Option<&str>) -> PeerEntry {
    PeerEntry {
        name: name.into(),
        product_ids,
        stock,
        credential: credential.map(|c| SecretString::new(c.to_string())),
        group: None,
    }
}

#[tokio::test]
async fn test_sampled_history_drives_sku_breakdown() {
    let inventory = Arc::new(ScriptedInventory::new());
    inventory.push(two_variants(1, 10, 4));
    inventory.push(two_variants(1, 7, 4));
    let engine = build(Arc::clone(&inventory), FixedPages::default(), vec![], None);

    let first = assert_ok!(engine.sample_once(1).await);
    assert_eq!(first, SampleOutcome::Recorded { total_stock_value: 2_000 });
    let second = assert_ok!(engine.sample_once(1).await);
    assert_eq!(second, SampleOutcome::Recorded { total_stock_value: 1_700 });
    assert_eq!(inventory.calls(), 2);
    assert_eq!(engine.store().history_len(1), 2);

    let skus = engine.sku_breakdown(1, ChronoDuration::minutes(60)).unwrap();
    assert_eq!(skus.len(), 2);
    assert_eq!(skus[0].variant_id, "red");
    assert_eq!(skus[0].sold_qty, 3);
    assert_eq!(skus[0].sold_value, 300);
    assert_eq!(skus[1].variant_id, "blue");
    assert_eq!(skus[1].sold_qty, 0);

    let delta = engine
        .estimator()
        .stock_delta_at(1, ChronoDuration::minutes(60), Utc::now());
    assert_eq!(delta.estimated_amount, 300);
    assert_eq!(delta.confidence, Confidence::VeryLow);
}

#[tokio::test]
async fn test_combined_estimate_from_seeded_history() {
    let engine = build(Arc::new(ScriptedInventory::new()), FixedPages::default(), vec![], None);
    seed_half_hour_drop(&engine, 7);

    let result = engine.estimate(7, ChronoDuration::minutes(60)).unwrap();
    // stock-delta 3000 at weight 40, rate 6000/h at weight 60.
    assert_eq!(result.estimated_amount, 4_800);
    assert_eq!(result.confidence, Confidence::Low);
    assert_eq!(result.method, "combined");
    assert_eq!(result.details["stock-delta"], 3_000);
    assert_eq!(result.details["rate-extrapolation"], 6_000);

    assert_eq!(engine.recommended_interval(7), 5);
    let report = engine.analysis_report(7, ChronoDuration::minutes(60)).unwrap();
    assert!(report.contains("Sales analysis"));
}

#[tokio::test]
async fn test_peer_reference_joins_combination() {
    let peers = vec![peer("rival", vec![7], Some(5_000), None)];
    let engine = build(Arc::new(ScriptedInventory::new()), FixedPages::default(), peers, None);
    seed_half_hour_drop(&engine, 7);

    let result = engine.estimate(7, ChronoDuration::minutes(60)).unwrap();
    // (3000*40 + 6000*60 + 5000*40) / 140
    assert_eq!(result.estimated_amount, 4_857);
    assert_eq!(result.details["peer-reference"], 5_000);
}

#[tokio::test]
async fn test_validate_accuracy_against_web_count() {
    let pages = FixedPages::default().with_page(7, r#"<div class="sale-count">已售 5 件</div>"#);
    let engine = build(Arc::new(ScriptedInventory::new()), pages, vec![], None);
    seed_half_hour_drop(&engine, 7);

    let report = engine
        .validate_accuracy(7, ChronoDuration::minutes(60))
        .await
        .unwrap();
    assert!(report.contains("Estimated sales: 4800"));
    assert!(report.contains("Web sales count: 5 units"));
    assert!(report.contains("96.0%"));
    assert!(report.contains("Collect more history"));
    assert!(!report.contains("Sample more often"));
}

#[tokio::test]
async fn test_validate_accuracy_without_web_data() {
    let engine = build(Arc::new(ScriptedInventory::new()), FixedPages::default(), vec![], None);
    seed_half_hour_drop(&engine, 7);

    let report = engine
        .validate_accuracy(7, ChronoDuration::minutes(60))
        .await
        .unwrap();
    assert!(report.contains("Web data unavailable: web sales unavailable: HTTP error: 404"));
    assert!(report.contains("Sample more often"));
}

#[tokio::test]
async fn test_batches_resolve_every_id() {
    let inventory = Arc::new(ScriptedInventory::new());
    inventory.push(Inventory::single(1, 100, 10));
    let pages = FixedPages::default().with_page(1, "销量 12");
    let engine = build(inventory, pages, vec![], None);

    let stock = engine.stock_batch(&[1, 2, 1]).await;
    assert_eq!(stock.len(), 2);
    assert_eq!(stock[&1].total_value(), Some(1_000));
    assert!(matches!(stock[&2], StockLookup::Unavailable { .. }));

    let web = engine.web_sales_batch(&[1, 2]).await;
    assert_eq!(web[&1].sales_count, 12);
    assert!(web[&1].valid);
    assert!(!web[&2].valid);
}

#[tokio::test]
async fn test_peer_totals_pick_best_source() {
    let peers = vec![
        peer("exact", vec![1, 2], None, Some("token-a")),
        peer("estimated", vec![7], Some(9_000), None),
        peer("unknown", vec![], None, None),
    ];
    let fees = FixedFees::default()
        .with_fee("token-a", 1, 300)
        .with_fee("token-a", 2, 200);
    let engine = build(Arc::new(ScriptedInventory::new()), FixedPages::default(), peers, Some(fees));
    seed_half_hour_drop(&engine, 7);

    let totals = engine.peer_totals().await;
    assert_eq!(totals.len(), 3);

    assert_eq!(totals[0].amount, 500);
    assert_eq!(totals[0].basis, FeeBasis::Exact);
    assert_eq!(totals[0].accuracy_tag(), "[exact]");

    assert_eq!(totals[1].basis, FeeBasis::Estimated);
    assert!(totals[1].amount > 0);
    assert_eq!(totals[1].accuracy_tag(), "[estimated]");

    assert_eq!(totals[2].amount, 1);
    assert_eq!(totals[2].basis, FeeBasis::Placeholder);
}

#[tokio::test(start_paused = true)]
async fn test_monitoring_samples_on_schedule() {
    let inventory = Arc::new(ScriptedInventory::new());
    inventory.push(Inventory::single(3, 100, 50));
    inventory.push(Inventory::single(3, 100, 45));
    let engine = build(Arc::clone(&inventory), FixedPages::default(), vec![], None);

    assert!(engine.start_monitoring(3, 1).unwrap());
    assert!(!engine.start_monitoring(3, 1).unwrap());
    assert_eq!(engine.monitored_products(), vec![3]);

    tokio::time::sleep(Duration::from_secs(61)).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(inventory.calls() >= 2);
    assert!(engine.store().history_len(3) >= 2);

    assert!(engine.stop_monitoring(3));
    assert!(!engine.is_monitoring(3));
}

#[tokio::test(start_paused = true)]
async fn test_failing_source_keeps_schedule_alive() {
    let inventory = Arc::new(ScriptedInventory::new());
    inventory.set_error("upstream down");
    let engine = build(Arc::clone(&inventory), FixedPages::default(), vec![], None);

    assert_err!(engine.sample_once(4).await);
    engine.start_monitoring(4, 1).unwrap();
    tokio::time::sleep(Duration::from_secs(125)).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(engine.is_monitoring(4));
    assert!(inventory.calls() >= 3);
    assert_eq!(engine.store().history_len(4), 0);
    assert!(engine.stats().metrics.errors > 0);
}

#[tokio::test]
async fn test_shutdown_clears_state_and_closes_pools() {
    let inventory = Arc::new(ScriptedInventory::new());
    inventory.push(Inventory::single(5, 100, 10));
    let engine = build(inventory, FixedPages::default(), vec![], None);

    engine.sample_once(5).await.unwrap();
    engine.start_monitoring(5, 10).unwrap();
    engine.start_maintenance();

    engine.shutdown().await;
    assert!(engine.is_shut_down());
    assert!(engine.monitored_products().is_empty());
    assert_eq!(engine.store().total_records(), 0);

    // Second call is a no-op.
    engine.shutdown().await;

    let stock = engine.stock_batch(&[5]).await;
    assert!(matches!(stock[&5], StockLookup::Unavailable { .. }));
}
