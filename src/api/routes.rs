//! API route handlers.
//!
//! State is the shared `Arc<SalesEngine>`. Engine errors map to status
//! codes in `ApiError`; invalid input is always a 400.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::peers::PeerTotal;
use crate::engine::{EngineStats, SalesEngine};
use crate::types::{EstimationResult, ProductId, SalesError, SkuSales, StockLookup, WebSalesData};

pub type AppState = Arc<SalesEngine>;

/// Window applied when a request does not give one.
const DEFAULT_WINDOW_MINS: i64 = 60;

/// Longest window accepted from a request (one year).
const MAX_WINDOW_MINS: i64 = 366 * 24 * 60;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    pub window_mins: Option<i64>,
}

impl WindowQuery {
    fn window(&self) -> Duration {
        let mins = self.window_mins.unwrap_or(DEFAULT_WINDOW_MINS);
        Duration::minutes(mins.clamp(-MAX_WINDOW_MINS, MAX_WINDOW_MINS))
    }
}

#[derive(Debug, Deserialize)]
pub struct MonitorQuery {
    pub interval_mins: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub product_ids: Vec<ProductId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorResponse {
    pub product_id: ProductId,
    pub started: bool,
    pub interval_mins: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Engine error rendered as an HTTP response.
pub struct ApiError(SalesError);

impl From<SalesError> for ApiError {
    fn from(e: SalesError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SalesError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            SalesError::PoolClosed(_) => StatusCode::SERVICE_UNAVAILABLE,
            SalesError::Fetch { .. } | SalesError::Upstream { .. } | SalesError::Parse(_) => {
                StatusCode::BAD_GATEWAY
            }
            SalesError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/estimate/:id
pub async fn get_estimate(
    State(engine): State<AppState>,
    Path(id): Path<ProductId>,
    Query(q): Query<WindowQuery>,
) -> ApiResult<Json<EstimationResult>> {
    Ok(Json(engine.estimate(id, q.window())?))
}

/// GET /api/skus/:id
pub async fn get_skus(
    State(engine): State<AppState>,
    Path(id): Path<ProductId>,
    Query(q): Query<WindowQuery>,
) -> ApiResult<Json<Vec<SkuSales>>> {
    Ok(Json(engine.sku_breakdown(id, q.window())?))
}

/// POST /api/monitor/:id
///
/// Without `interval_mins` the interval is picked from the observed rate.
pub async fn start_monitor(
    State(engine): State<AppState>,
    Path(id): Path<ProductId>,
    Query(q): Query<MonitorQuery>,
) -> ApiResult<Json<MonitorResponse>> {
    let resp = match q.interval_mins {
        Some(interval_mins) => {
            let started = engine.start_monitoring(id, interval_mins)?;
            let interval_mins = engine.monitoring_interval(id).unwrap_or(interval_mins);
            MonitorResponse { product_id: id, started, interval_mins }
        }
        None => {
            let was_monitoring = engine.is_monitoring(id);
            let interval_mins = engine.start_smart_monitoring(id)?;
            MonitorResponse { product_id: id, started: !was_monitoring, interval_mins }
        }
    };
    Ok(Json(resp))
}

/// DELETE /api/monitor/:id
pub async fn stop_monitor(State(engine): State<AppState>, Path(id): Path<ProductId>) -> StatusCode {
    if engine.stop_monitoring(id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

/// GET /api/monitor
pub async fn list_monitored(State(engine): State<AppState>) -> Json<Vec<ProductId>> {
    Json(engine.monitored_products())
}

/// GET /api/web-sales/:id
pub async fn get_web_sales(
    State(engine): State<AppState>,
    Path(id): Path<ProductId>,
) -> ApiResult<Json<WebSalesData>> {
    Ok(Json(engine.web_sales(id).await?))
}

/// POST /api/batch/web-sales
pub async fn web_sales_batch(
    State(engine): State<AppState>,
    Json(req): Json<BatchRequest>,
) -> Json<HashMap<ProductId, WebSalesData>> {
    Json(engine.web_sales_batch(&req.product_ids).await)
}

/// POST /api/batch/stock
pub async fn stock_batch(
    State(engine): State<AppState>,
    Json(req): Json<BatchRequest>,
) -> Json<HashMap<ProductId, StockLookup>> {
    Json(engine.stock_batch(&req.product_ids).await)
}

/// GET /api/validate/:id
pub async fn validate(
    State(engine): State<AppState>,
    Path(id): Path<ProductId>,
    Query(q): Query<WindowQuery>,
) -> ApiResult<String> {
    Ok(engine.validate_accuracy(id, q.window()).await?)
}

/// GET /api/report/:id
pub async fn report(
    State(engine): State<AppState>,
    Path(id): Path<ProductId>,
    Query(q): Query<WindowQuery>,
) -> ApiResult<String> {
    Ok(engine.analysis_report(id, q.window())?)
}

/// GET /api/peers
pub async fn get_peers(State(engine): State<AppState>) -> Json<Vec<PeerTotal>> {
    Json(engine.peer_totals().await)
}

/// GET /api/stats
pub async fn get_stats(State(engine): State<AppState>) -> Json<EngineStats> {
    Json(engine.stats())
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_query_default() {
        let q = WindowQuery { window_mins: None };
        assert_eq!(q.window(), Duration::minutes(60));
        let q = WindowQuery { window_mins: Some(15) };
        assert_eq!(q.window(), Duration::minutes(15));
        let q = WindowQuery { window_mins: Some(i64::MAX) };
        assert_eq!(q.window(), Duration::minutes(MAX_WINDOW_MINS));
    }

    #[test]
    fn test_error_status_mapping() {
        let status = |e: SalesError| ApiError(e).into_response().status();
        assert_eq!(status(SalesError::InvalidInput("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(SalesError::PoolClosed("web")), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status(SalesError::Fetch { product_id: 1, message: "x".into() }),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_monitor_response_serializes() {
        let json = serde_json::to_string(&MonitorResponse {
            product_id: 9,
            started: true,
            interval_mins: 5,
        })
        .unwrap();
        assert!(json.contains("\"interval_mins\":5"));
    }
}
