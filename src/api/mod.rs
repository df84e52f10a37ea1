//! HTTP API: Axum server exposing the engine to the command layer.
//!
//! JSON for data endpoints, plain text for the rendered reports.
//! CORS enabled for local development.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use routes::AppState;

/// Bind the port and serve the API on a background task.
pub async fn spawn_api(state: AppState, port: u16) -> Result<JoinHandle<()>> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API port {port}"))?;
    info!(port, "API server listening on http://localhost:{port}");

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server error");
        }
    }))
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/estimate/:id", get(routes::get_estimate))
        .route("/api/skus/:id", get(routes::get_skus))
        .route(
            "/api/monitor/:id",
            post(routes::start_monitor).delete(routes::stop_monitor),
        )
        .route("/api/monitor", get(routes::list_monitored))
        .route("/api/web-sales/:id", get(routes::get_web_sales))
        .route("/api/batch/web-sales", post(routes::web_sales_batch))
        .route("/api/batch/stock", post(routes::stock_batch))
        .route("/api/validate/:id", get(routes::validate))
        .route("/api/report/:id", get(routes::report))
        .route("/api/peers", get(routes::get_peers))
        .route("/api/stats", get(routes::get_stats))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
