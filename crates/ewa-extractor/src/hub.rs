//! Hugging Face Hub and Inference API client
//!
//! Looks up model metadata on the Hub and runs token classification,
//! text classification and feature extraction through the hosted
//! Inference API.
//!
//! Author: hephaex@gmail.com

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ewa_core::HubConfig;
use ndarray::{Array2, Axis};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors returned by the Hub client
#[derive(Error, Debug)]
pub enum HubError {
    #[error("Invalid model identifier '{0}'")]
    InvalidModelId(String),

    #[error("Model '{0}' not found on the Hub")]
    NotFound(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("HTTP client error: {0}")]
    Client(String),
}

pub type Result<T> = std::result::Result<T, HubError>;

// ============================================================================
// Wire Types
// ============================================================================

/// Model metadata from `GET /api/models/{id}`
#[derive(Debug, Clone, Deserialize)]
pub struct ModelInfo {
    #[serde(alias = "modelId")]
    pub id: String,

    /// Task the model was published for (e.g. `token-classification`)
    #[serde(default)]
    pub pipeline_tag: Option<String>,

    #[serde(default)]
    pub library_name: Option<String>,
}

/// One token-level prediction from the token-classification pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawToken {
    /// Label such as `B-PER`, `I-LOC` or `O`
    #[serde(alias = "entity_group")]
    pub entity: String,

    pub score: f32,

    /// Token text as produced by the tokenizer (`##ing`, `▁New`, ...)
    #[serde(default)]
    pub word: String,

    /// Character offsets into the input text
    #[serde(default)]
    pub start: Option<usize>,
    #[serde(default)]
    pub end: Option<usize>,
}

/// A label with its probability
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f32,
}

#[derive(Debug, Serialize)]
struct InferenceRequest<I: Serialize> {
    inputs: I,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
    options: InferenceOptions,
}

#[derive(Debug, Serialize)]
struct InferenceOptions {
    wait_for_model: bool,
}

/// Text classification answers `[[...]]` for one input on most deployments
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClassificationResponse {
    Nested(Vec<Vec<LabelScore>>),
    Flat(Vec<LabelScore>),
}

/// Sentence-transformers models return pooled vectors; plain encoders
/// return one vector per token
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeatureResponse {
    Pooled(Vec<Vec<f32>>),
    Tokens(Vec<Vec<Vec<f32>>>),
}

// ============================================================================
// Client
// ============================================================================

/// Hugging Face Hub / Inference API client
pub struct HubClient {
    client: Client,
    hub_url: String,
    inference_url: String,
    api_token: Option<String>,
    wait_for_model: bool,
}

impl HubClient {
    /// Create a new client
    pub fn new(client: Client, hub_url: impl Into<String>, inference_url: impl Into<String>) -> Self {
        Self {
            client,
            hub_url: hub_url.into().trim_end_matches('/').to_string(),
            inference_url: inference_url.into().trim_end_matches('/').to_string(),
            api_token: None,
            wait_for_model: true,
        }
    }

    /// Set the access token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    /// Create from config
    pub fn from_config(config: &HubConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("ewa/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| HubError::Client(e.to_string()))?;

        let mut hub = Self::new(client, &config.hub_url, &config.inference_url);
        hub.api_token = config.api_token.clone();
        hub.wait_for_model = config.wait_for_model;
        Ok(hub)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Fetch model metadata
    pub async fn model_info(&self, model_id: &str) -> Result<ModelInfo> {
        validate_model_id(model_id)?;

        let url = format!("{}/api/models/{}", self.hub_url, model_id);
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| HubError::Request(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(HubError::NotFound(model_id.to_string()));
        }

        decode(response).await
    }

    async fn infer<I, T>(
        &self,
        url: String,
        inputs: I,
        parameters: Option<serde_json::Value>,
    ) -> Result<T>
    where
        I: Serialize + Send,
        T: for<'de> Deserialize<'de>,
    {
        let request = InferenceRequest {
            inputs,
            parameters,
            options: InferenceOptions {
                wait_for_model: self.wait_for_model,
            },
        };

        let response = self
            .authorize(self.client.post(url))
            .json(&request)
            .send()
            .await
            .map_err(|e| HubError::Request(e.to_string()))?;

        decode(response).await
    }

    /// Token-level predictions without server-side aggregation
    pub async fn token_classification(&self, model_id: &str, text: &str) -> Result<Vec<RawToken>> {
        validate_model_id(model_id)?;

        let url = format!("{}/models/{}", self.inference_url, model_id);
        let parameters = serde_json::json!({ "aggregation_strategy": "none" });
        self.infer(url, text, Some(parameters)).await
    }

    /// Label probabilities for one text, best first
    pub async fn text_classification(&self, model_id: &str, text: &str) -> Result<Vec<LabelScore>> {
        validate_model_id(model_id)?;

        let url = format!("{}/models/{}", self.inference_url, model_id);
        let response: ClassificationResponse = self.infer(url, text, None).await?;

        let mut scores = match response {
            ClassificationResponse::Nested(nested) => nested.into_iter().next().unwrap_or_default(),
            ClassificationResponse::Flat(flat) => flat,
        };
        scores.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(scores)
    }

    /// One embedding per input, mean-pooled when the model returns token vectors
    pub async fn feature_extraction(&self, model_id: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        validate_model_id(model_id)?;
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!(
            "{}/pipeline/feature-extraction/{}",
            self.inference_url, model_id
        );
        let response: FeatureResponse = self.infer(url, inputs, None).await?;

        let embeddings = match response {
            FeatureResponse::Pooled(vectors) => vectors,
            FeatureResponse::Tokens(tokens) => tokens
                .into_iter()
                .map(mean_pool)
                .collect::<Result<Vec<_>>>()?,
        };

        if embeddings.len() != inputs.len() {
            return Err(HubError::Decode(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                embeddings.len()
            )));
        }
        Ok(embeddings)
    }
}

async fn decode<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(HubError::Status {
            status: status.as_u16(),
            body,
        });
    }

    response
        .json()
        .await
        .map_err(|e| HubError::Decode(e.to_string()))
}

/// Reject identifiers that cannot name a Hub repository
pub fn validate_model_id(model_id: &str) -> Result<()> {
    let valid = !model_id.is_empty()
        && !model_id.starts_with('/')
        && !model_id.ends_with('/')
        && !model_id.contains("..")
        && model_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'));

    if valid {
        Ok(())
    } else {
        Err(HubError::InvalidModelId(model_id.to_string()))
    }
}

/// Average token vectors into a single embedding
pub fn mean_pool(tokens: Vec<Vec<f32>>) -> Result<Vec<f32>> {
    let rows = tokens.len();
    let dim = tokens.first().map(Vec::len).unwrap_or(0);
    if rows == 0 || dim == 0 {
        return Err(HubError::Decode("empty token embeddings".to_string()));
    }

    let flat: Vec<f32> = tokens.into_iter().flatten().collect();
    let matrix = Array2::from_shape_vec((rows, dim), flat)
        .map_err(|e| HubError::Decode(format!("ragged token embeddings: {e}")))?;

    matrix
        .mean_axis(Axis(0))
        .map(|mean| mean.to_vec())
        .ok_or_else(|| HubError::Decode("empty token embeddings".to_string()))
}

// ============================================================================
// Model Capabilities
// ============================================================================

/// Token classification (NER tagging)
#[async_trait]
pub trait TokenClassifier: Send + Sync {
    async fn classify_tokens(&self, text: &str) -> Result<Vec<RawToken>>;
}

/// Whole-sequence classification
#[async_trait]
pub trait SequenceClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Vec<LabelScore>>;
}

/// Sentence embeddings
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// A single Hub model bound to a shared client
#[derive(Clone)]
pub struct HubModel {
    client: Arc<HubClient>,
    model_id: String,
}

impl HubModel {
    pub fn new(client: Arc<HubClient>, model_id: impl Into<String>) -> Self {
        Self {
            client,
            model_id: model_id.into(),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[async_trait]
impl TokenClassifier for HubModel {
    async fn classify_tokens(&self, text: &str) -> Result<Vec<RawToken>> {
        self.client.token_classification(&self.model_id, text).await
    }
}

#[async_trait]
impl SequenceClassifier for HubModel {
    async fn classify(&self, text: &str) -> Result<Vec<LabelScore>> {
        self.client.text_classification(&self.model_id, text).await
    }
}

#[async_trait]
impl TextEmbedder for HubModel {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        self.client.feature_extraction(&self.model_id, inputs).await
    }
}

// ============================================================================
// Tests
// ============================================================================
