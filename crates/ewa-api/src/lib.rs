//! EWA API - REST server
//!
//! Provides HTTP endpoints for entity and keyword extraction.

pub mod error;
pub mod handlers;
pub mod state;

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use ewa_core::ServerConfig;
use handlers::{analyze, health, openapi};
use state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

/// Build the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let server = state.config.server.clone();

    let router = Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/api/v1/analyze", post(analyze::analyze_handler))
        .route("/api-docs/openapi.json", get(openapi::openapi_spec))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(
            server.request_timeout_secs,
        )));

    let router = match cors_layer(&server) {
        Some(cors) => router.layer(cors),
        None => router,
    };

    router.with_state(state)
}

/// CORS policy; an empty origin list allows any origin
fn cors_layer(server: &ServerConfig) -> Option<CorsLayer> {
    if !server.cors_enabled {
        return None;
    }

    let origins: Vec<HeaderValue> = server
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    Some(if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    })
}
