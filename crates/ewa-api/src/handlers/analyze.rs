//! Analysis handlers
//!
//! Author: hephaex@gmail.com

use crate::error::{ApiError, AppError};
use crate::state::AppState;
use axum::{extract::State, Json};
use ewa_core::{AnalysisRun, EntitySpan, KeywordResult};
use ewa_pipeline::RunOptions;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use utoipa::ToSchema;

/// Analysis request body; exactly one of `url` and `text` is required
#[derive(Debug, Deserialize, ToSchema)]
pub struct AnalyzeRequest {
    /// Page to fetch and analyze
    #[schema(example = "https://en.wikipedia.org/wiki/Istanbul")]
    pub url: Option<String>,

    /// Raw text to analyze instead of a page
    pub text: Option<String>,

    /// Hub model for entity recognition; chosen by language if omitted
    #[schema(example = "dslim/bert-base-NER")]
    pub ner_model: Option<String>,

    /// Hub embedding model for keywords; chosen by language if omitted
    pub kw_model: Option<String>,

    /// Number of keywords to return
    #[schema(example = 10)]
    pub top_n: Option<usize>,
}

enum Input<'a> {
    Url(&'a str),
    Text(&'a str),
}

impl AnalyzeRequest {
    fn input(&self) -> Result<Input<'_>, AppError> {
        match (self.url.as_deref(), self.text.as_deref()) {
            (Some(url), None) => Ok(Input::Url(url)),
            (None, Some(text)) => Ok(Input::Text(text)),
            (Some(_), Some(_)) => Err(AppError::bad_request("provide either url or text, not both")),
            (None, None) => Err(AppError::bad_request("either url or text is required")),
        }
    }

    fn run_options(&self) -> RunOptions {
        RunOptions {
            entity_model: self.ner_model.clone(),
            keyword_model: self.kw_model.clone(),
            top_n: self.top_n,
        }
    }
}

/// A recognized entity
#[derive(Debug, Serialize, ToSchema)]
pub struct EntityDto {
    #[schema(example = "New York")]
    pub word: String,
    #[schema(example = "LOC")]
    pub entity_group: String,
    #[schema(example = 0.998)]
    pub score: f64,
}

impl From<EntitySpan> for EntityDto {
    fn from(span: EntitySpan) -> Self {
        Self {
            word: span.word,
            entity_group: span.entity_group,
            score: span.score,
        }
    }
}

/// A ranked keyword
#[derive(Debug, Serialize, ToSchema)]
pub struct KeywordDto {
    #[schema(example = "istanbul")]
    pub keyword: String,
    #[schema(example = 0.6532)]
    pub score: f64,
}

impl From<KeywordResult> for KeywordDto {
    fn from(keyword: KeywordResult) -> Self {
        Self {
            keyword: keyword.keyword,
            score: keyword.score,
        }
    }
}

/// Analysis response body
#[derive(Debug, Serialize, ToSchema)]
pub struct AnalyzeResponse {
    /// Detected language; absent when both models were given
    #[schema(example = "en")]
    pub language: Option<String>,

    /// Entity model that was used
    pub ner_model: String,

    /// Keyword model that was used
    pub kw_model: String,

    pub ner: Vec<EntityDto>,
    pub kw: Vec<KeywordDto>,

    pub processing_time_ms: u64,
}

impl AnalyzeResponse {
    fn from_run(run: AnalysisRun, started: Instant) -> Self {
        Self {
            language: run.language.map(|l| l.to_string()),
            ner_model: run.selection.entity_model,
            kw_model: run.selection.keyword_model,
            ner: run.result.ner.into_iter().map(EntityDto::from).collect(),
            kw: run.result.kw.into_iter().map(KeywordDto::from).collect(),
            processing_time_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Analyze a page or a text
#[utoipa::path(
    post,
    path = "/api/v1/analyze",
    tag = "analysis",
    request_body = AnalyzeRequest,
    responses(
        (status = 200, description = "Entities and keywords", body = AnalyzeResponse),
        (status = 400, description = "Invalid request", body = ApiError),
        (status = 502, description = "Page or model provider failed", body = ApiError),
        (status = 500, description = "Server misconfigured", body = ApiError)
    )
)]
pub async fn analyze_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, AppError> {
    state.increment_requests();
    let started = Instant::now();
    let options = request.run_options();

    let run = match request.input()? {
        Input::Url(url) => {
            tracing::info!(url, "Analyze URL request");
            state.analyzer.run_url(url, &options).await?
        }
        Input::Text(text) => {
            tracing::info!(text_len = text.len(), "Analyze text request");
            state.analyzer.run(text, &options).await?
        }
    };

    Ok(Json(AnalyzeResponse::from_run(run, started)))
}
