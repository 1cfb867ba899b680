//! EWA Configuration Management
//!
//! Handles configuration from environment variables, config files,
//! and command-line arguments with sensible defaults for development.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::registry::{builtin_rows, ModelRegistry, ModelRow};
use crate::{EwaError, LanguageCode, DEFAULT_TOP_N};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Hugging Face Hub / Inference API
    pub hub: HubConfig,

    /// Page fetching and text extraction
    pub fetch: FetchConfig,

    /// Language detection
    pub language: LanguageConfig,

    /// Entity recognition
    pub ner: NerConfig,

    /// Keyword extraction
    pub keyword: KeywordConfig,

    /// Default models per language code, merged over the built-in rows
    #[serde(deserialize_with = "merge_registry")]
    pub registry: RegistryConfig,

    /// Orchestration behavior
    pub pipeline: PipelineConfig,

    /// API server configuration
    pub server: ServerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Registry rows keyed by language code (`en`, `tr`, `other`)
pub type RegistryConfig = BTreeMap<String, ModelRow>;

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            hub: HubConfig::default(),
            fetch: FetchConfig::default(),
            language: LanguageConfig::default(),
            ner: NerConfig::default(),
            keyword: KeywordConfig::default(),
            registry: builtin_rows(),
            pipeline: PipelineConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn merge_registry<'de, D>(deserializer: D) -> Result<RegistryConfig, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let rows = RegistryConfig::deserialize(deserializer)?;
    let mut merged = builtin_rows();
    for (language, row) in rows {
        merged.entry(language).or_default().overlay(row);
    }
    Ok(merged)
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_override()
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// File (if given) or defaults, then environment, then validation
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = config.with_env_override()?;
        config.validate()?;
        Ok(config)
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        // Hub
        if let Ok(url) = std::env::var("HF_HUB_URL") {
            self.hub.hub_url = url;
        }
        if let Ok(url) = std::env::var("HF_INFERENCE_URL") {
            self.hub.inference_url = url;
        }
        if let Ok(token) = std::env::var("HF_TOKEN") {
            if !token.trim().is_empty() {
                self.hub.api_token = Some(token);
            }
        }
        if let Some(secs) = parse_env("HF_TIMEOUT_SECS")? {
            self.hub.timeout_secs = secs;
        }

        // Language detection
        if let Ok(model) = std::env::var("EWA_LANGUAGE_MODEL") {
            self.language.model = model;
        }

        // Keywords
        if let Some(top_n) = parse_env("EWA_TOP_N")? {
            self.keyword.top_n = top_n;
        }

        // Pipeline
        if let Some(parallel) = parse_bool_env("EWA_PARALLEL_INFERENCE")? {
            self.pipeline.parallel_inference = parallel;
        }
        if let Some(reuse) = parse_bool_env("EWA_REUSE_MODELS")? {
            self.pipeline.reuse_models = reuse;
        }

        // Registry rows, e.g. EWA_NER_MODEL_OTHER to fill the fallback row
        for language in LanguageCode::ALL {
            let suffix = language.as_str().to_uppercase();
            let ner = std::env::var(format!("EWA_NER_MODEL_{suffix}")).ok();
            let kw = std::env::var(format!("EWA_KW_MODEL_{suffix}")).ok();
            if ner.is_none() && kw.is_none() {
                continue;
            }

            self.registry
                .entry(language.as_str().to_string())
                .or_default()
                .overlay(ModelRow { ner, kw });
        }

        // Server
        if let Ok(host) = std::env::var("API_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("API_PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "API_PORT".to_string(),
                value: port,
            })?;
        }

        // CORS origins from environment variable (comma-separated)
        if let Ok(origins) = std::env::var("CORS_ORIGINS") {
            self.server.cors_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = parse_bool_env("LOG_JSON")? {
            self.logging.json_format = json;
        }

        Ok(self)
    }

    /// Check values that would otherwise fail deep inside a run
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch.tags.is_empty() {
            return Err(ConfigError::MissingRequired("fetch.tags".to_string()));
        }
        if self.keyword.ngram_min == 0 || self.keyword.ngram_min > self.keyword.ngram_max {
            return Err(ConfigError::InvalidValue {
                key: "keyword.ngram_min/ngram_max".to_string(),
                value: format!("{}..={}", self.keyword.ngram_min, self.keyword.ngram_max),
            });
        }
        if self.keyword.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "keyword.batch_size".to_string(),
                value: "0".to_string(),
            });
        }
        if self.ner.max_chunk_chars == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ner.max_chunk_chars".to_string(),
                value: "0".to_string(),
            });
        }
        if self.language.model.trim().is_empty() {
            return Err(ConfigError::MissingRequired("language.model".to_string()));
        }
        for key in self.registry.keys() {
            key.parse::<LanguageCode>()
                .map_err(|_| ConfigError::InvalidValue {
                    key: "registry".to_string(),
                    value: key.clone(),
                })?;
        }
        Ok(())
    }

    /// Build the model registry described by this configuration
    pub fn model_registry(&self) -> crate::Result<ModelRegistry> {
        ModelRegistry::from_rows(&self.registry)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

fn parse_bool_env(key: &str) -> Result<Option<bool>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => match value.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        },
        Err(_) => Ok(None),
    }
}

/// Hugging Face Hub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Hub base URL, used to look up model metadata
    pub hub_url: String,

    /// Inference API base URL
    pub inference_url: String,

    /// Access token for gated models and higher rate limits
    pub api_token: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Ask the Inference API to block until a cold model is loaded
    pub wait_for_model: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            hub_url: "https://huggingface.co".to_string(),
            inference_url: "https://api-inference.huggingface.co".to_string(),
            api_token: None,
            timeout_secs: 120,
            wait_for_model: true,
        }
    }
}

/// Page fetching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Tags collected, in this order (all of one tag before the next)
    pub tags: Vec<String>,

    /// Chunks shorter than this many characters are skipped
    pub min_chunk_chars: usize,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// User-Agent header sent with page requests
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            tags: ["h1", "h2", "h3", "h4", "p"]
                .iter()
                .map(|t| t.to_string())
                .collect(),
            min_chunk_chars: 20,
            timeout_secs: 30,
            user_agent: "Mozilla/5.0 (compatible; EWA/0.1)".to_string(),
        }
    }
}

/// Language detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageConfig {
    /// Text-classification model returning language codes as labels
    pub model: String,

    /// Characters of the document sent to the classifier
    pub max_chars: usize,
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            model: "papluca/xlm-roberta-base-language-detection".to_string(),
            max_chars: 2000,
        }
    }
}

/// Entity recognition configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NerConfig {
    /// Longest piece of text sent in one inference request
    pub max_chunk_chars: usize,
}

impl Default for NerConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: 1500,
        }
    }
}

/// Keyword extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordConfig {
    /// Keywords returned per document
    pub top_n: usize,

    /// Shortest candidate phrase, in words
    pub ngram_min: usize,

    /// Longest candidate phrase, in words
    pub ngram_max: usize,

    /// Upper bound on candidates embedded per document; phrases first
    /// seen after the bound is reached are not ranked
    pub max_candidates: usize,

    /// Candidates embedded per request
    pub batch_size: usize,

    /// Words that never appear in a candidate
    pub stop_words: Vec<String>,
}

impl Default for KeywordConfig {
    fn default() -> Self {
        Self {
            top_n: DEFAULT_TOP_N,
            ngram_min: 1,
            ngram_max: 3,
            max_candidates: 1000,
            batch_size: 64,
            stop_words: Vec::new(),
        }
    }
}

/// Pipeline orchestration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Keep loaded model handles for later runs
    pub reuse_models: bool,

    /// Maximum cached handles per task
    pub model_cache_capacity: u64,

    /// Run entity and keyword inference concurrently
    pub parallel_inference: bool,

    /// Upper bound on each load and inference call
    pub inference_timeout_secs: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            reuse_models: true,
            model_cache_capacity: 16,
            parallel_inference: false,
            inference_timeout_secs: None,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Enable CORS
    pub cors_enabled: bool,

    /// Allowed origins for CORS
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 300,
            cors_enabled: true,
            // Empty by default - set via CORS_ORIGINS env var
            cors_origins: vec![],
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

impl From<ConfigError> for EwaError {
    fn from(err: ConfigError) -> Self {
        EwaError::Configuration(err.to_string())
    }
}
