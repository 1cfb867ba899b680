//! Health check handlers
//!
//! Author: hephaex@gmail.com

use crate::state::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

/// Health check response
#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Liveness probe - basic health check
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    )
)]
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Model handle cache counters for one task
#[derive(Serialize, ToSchema)]
pub struct CacheStatus {
    #[schema(example = "ner")]
    pub task: String,
    pub requests: u64,
    pub loads: u64,
    pub hits: u64,
    pub hit_rate: f64,
}

/// Readiness response
#[derive(Serialize, ToSchema)]
pub struct ReadinessResponse {
    pub ready: bool,
    /// Languages with at least one default model
    pub languages: Vec<String>,
    pub reuse_models: bool,
    pub parallel_inference: bool,
    pub model_cache: Vec<CacheStatus>,
    pub uptime_seconds: u64,
    pub total_requests: u64,
}

/// Readiness probe - ready once some language has default models
#[utoipa::path(
    get,
    path = "/ready",
    tag = "health",
    responses(
        (status = 200, description = "Service is ready", body = ReadinessResponse),
        (status = 503, description = "No default models configured", body = ReadinessResponse)
    )
)]
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let analyzer = &state.analyzer;
    let languages: Vec<String> = analyzer
        .registry()
        .languages()
        .into_iter()
        .map(|l| l.to_string())
        .collect();

    let model_cache = analyzer
        .cache_stats()
        .into_iter()
        .map(|report| CacheStatus {
            task: report.task.to_string(),
            requests: report.requests,
            loads: report.loads,
            hits: report.hits,
            hit_rate: report.hit_rate,
        })
        .collect();

    let ready = !languages.is_empty();
    let response = ReadinessResponse {
        ready,
        languages,
        reuse_models: analyzer.options().reuse_models,
        parallel_inference: analyzer.options().parallel_inference,
        model_cache,
        uptime_seconds: state.uptime_secs(),
        total_requests: state.get_request_count(),
    };

    if ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}
