//! HTTP flows through the router, backed by in-memory sources.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use std::sync::Arc;
use tower::ServiceExt;

use stockpulse::api::build_router;
use stockpulse::config::AppConfig;
use stockpulse::engine::peers::StaticPeers;
use stockpulse::engine::SalesEngine;

use crate::mock_sources::{two_variants, FixedPages, ScriptedInventory};

fn app(inventory: Arc<ScriptedInventory>) -> (Router, Arc<SalesEngine>) {
    let mut cfg = AppConfig::default();
    cfg.gateway.cache_ttl_secs = 0;
    let engine = Arc::new(
        SalesEngine::new(
            cfg,
            inventory,
            Arc::new(FixedPages::default().with_page(9, "<span>已售 3</span>")),
            Arc::new(StaticPeers::default()),
            None,
        )
        .unwrap(),
    );
    (build_router(Arc::clone(&engine)), engine)
}

async fn send(app: &Router, method: &str, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), 1_000_000).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_sampled_product_shows_in_skus_and_stats() {
    let inventory = Arc::new(ScriptedInventory::new());
    inventory.push(two_variants(9, 20, 10));
    inventory.push(two_variants(9, 20, 6));
    let (router, engine) = app(inventory);

    engine.sample_once(9).await.unwrap();
    engine.sample_once(9).await.unwrap();

    let (status, skus) = send(&router, "GET", "/api/skus/9?window_mins=60", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(skus[0]["variant_id"], "blue");
    assert_eq!(skus[0]["sold_qty"], 4);
    assert_eq!(skus[0]["sold_value"], 1_000);

    let (_, stats) = send(&router, "GET", "/api/stats", "").await;
    assert_eq!(stats["tracked_products"], 1);
    assert_eq!(stats["total_snapshots"], 2);
}

#[tokio::test]
async fn test_monitor_listing_and_web_sales() {
    let inventory = Arc::new(ScriptedInventory::new());
    inventory.push(two_variants(9, 5, 5));
    let (router, _engine) = app(inventory);

    let (status, body) = send(&router, "POST", "/api/monitor/9?interval_mins=15", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["started"], true);

    let (_, listed) = send(&router, "GET", "/api/monitor", "").await;
    assert_eq!(listed, serde_json::json!([9]));

    let (status, web) = send(&router, "GET", "/api/web-sales/9", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(web["sales_count"], 3);

    let (status, web) = send(&router, "GET", "/api/web-sales/10", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(web["valid"], false);
    assert_eq!(web["reason"], "HTTP error: 404");
}

#[tokio::test]
async fn test_malformed_batch_body_is_rejected() {
    let (router, _engine) = app(Arc::new(ScriptedInventory::new()));
    let (status, _) = send(&router, "POST", "/api/batch/stock", r#"{"ids": "nope"}"#).await;
    assert!(status.is_client_error());
}
