// Module: http
// SSE event feed plus the settings, health and metrics endpoints

pub mod error;
pub mod events;
pub mod health;
pub mod settings;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, Method},
    routing::get,
    Router,
};
use feedwall_hub::FanoutHub;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<FanoutHub>,
    /// Cancelled on server shutdown; every event stream holds a child token
    pub shutdown: CancellationToken,
    /// Interval between SSE keep-alive comments
    pub keep_alive: Duration,
}

impl AppState {
    pub fn new(hub: Arc<FanoutHub>, shutdown: CancellationToken, keep_alive: Duration) -> Self {
        Self {
            hub,
            shutdown,
            keep_alive,
        }
    }
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    feedwall_core::metrics::init_metrics();

    let router = Router::new()
        .route("/events", get(events::stream_events))
        .route(
            "/settings",
            get(settings::get_settings).put(settings::update_settings),
        )
        .merge(health::create_health_router())
        .fallback(not_found);

    // Apply layers before state
    let router = router
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::PUT])
                .allow_headers([header::CONTENT_TYPE]),
        )
        .layer(TraceLayer::new_for_http());

    // Apply state to all routes (must be last)
    router.with_state(state)
}

async fn not_found() -> AppError {
    AppError::not_found("Not found")
}
