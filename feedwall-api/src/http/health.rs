//! Health and metrics endpoints

use axum::{
    http::header,
    response::IntoResponse,
    routing::get,
    Router,
};

use crate::http::{AppResult, AppState};

/// Health check and Prometheus scrape routes
pub fn create_health_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
}

/// Basic health check (always returns OK if server is running)
pub async fn health_check() -> impl IntoResponse {
    "OK"
}

/// Prometheus text exposition of every registered metric
pub async fn metrics() -> AppResult<impl IntoResponse> {
    let body = feedwall_core::metrics::gather_metrics()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    ))
}
