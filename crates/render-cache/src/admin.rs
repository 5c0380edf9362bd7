//! Admin API on its own listener: Prometheus metrics, stats, and the
//! explicit refresh/remove operations.

use crate::engine::{EngineStats, RenderCache};
use crate::error::Error;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};

#[derive(Clone)]
pub struct AdminState {
    pub cache: RenderCache,
    pub prometheus: Option<PrometheusHandle>,
}

/// GET /api/stats response.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub pages: usize,
    pub page_hits: u64,
    pub page_misses: u64,
    pub expiration_offset_ms: u64,
    pub engine: EngineStats,
}

/// Body of POST /api/pages/refresh, query of DELETE /api/pages.
#[derive(Debug, Deserialize)]
pub struct UrlRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub key: String,
    pub url: String,
    pub expiration: Option<i64>,
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/pages/refresh", post(refresh_handler))
        .route("/api/pages", delete(remove_handler))
        .with_state(state)
}

async fn metrics_handler(State(state): State<AdminState>) -> impl IntoResponse {
    match &state.prometheus {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::NOT_FOUND,
            "metrics recorder not installed".to_string(),
        ),
    }
}

/// GET /api/stats — one-shot stats endpoint.
async fn stats_handler(State(state): State<AdminState>) -> Json<StatsResponse> {
    let pages = state.cache.pages().stats();
    Json(StatsResponse {
        pages: pages.entries,
        page_hits: pages.hits,
        page_misses: pages.misses,
        expiration_offset_ms: state.cache.expiration_offset().as_millis() as u64,
        engine: state.cache.stats(),
    })
}

/// POST /api/pages/refresh — re-render a URL now.
async fn refresh_handler(
    State(state): State<AdminState>,
    Json(body): Json<UrlRequest>,
) -> Result<Json<RefreshResponse>, Error> {
    let page = state.cache.update(&body.url).await?;
    Ok(Json(RefreshResponse {
        key: page.key().to_string(),
        url: page.url().to_string(),
        expiration: page.expiration.as_millis(),
    }))
}

/// DELETE /api/pages?url=... — forget a URL everywhere.
async fn remove_handler(
    State(state): State<AdminState>,
    Query(query): Query<UrlRequest>,
) -> Result<Json<serde_json::Value>, Error> {
    let key = state.cache.remove(&query.url).await?;
    Ok(Json(serde_json::json!({ "key": key })))
}
