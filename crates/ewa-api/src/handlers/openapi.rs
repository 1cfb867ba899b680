//! OpenAPI document

use axum::{response::IntoResponse, Json};
use utoipa::OpenApi;

use super::{analyze, health};
use crate::error::ApiError;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "EWA API",
        description = "Named entities and keywords from web pages, with models chosen by language"
    ),
    paths(
        health::health_check,
        health::readiness_check,
        analyze::analyze_handler,
    ),
    components(schemas(
        ApiError,
        health::HealthResponse,
        health::ReadinessResponse,
        health::CacheStatus,
        analyze::AnalyzeRequest,
        analyze::AnalyzeResponse,
        analyze::EntityDto,
        analyze::KeywordDto,
    )),
    tags(
        (name = "health", description = "Liveness and readiness"),
        (name = "analysis", description = "Entity and keyword extraction")
    )
)]
pub struct ApiDoc;

pub async fn openapi_spec() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}
