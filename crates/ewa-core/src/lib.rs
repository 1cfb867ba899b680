//! EWA Core - Domain models, traits, and shared types
//!
//! This crate defines the core abstractions used throughout EWA:
//! - Analysis data model (entity spans, keywords, analysis results)
//! - Common error types
//! - Capability traits for text sources, language classifiers and models
//! - The language-keyed model registry
//! - Configuration management

pub mod config;
pub mod registry;

pub use config::{
    AppConfig, ConfigError, FetchConfig, HubConfig, KeywordConfig, LanguageConfig,
    LoggingConfig, NerConfig, PipelineConfig, ServerConfig,
};
pub use registry::{ModelRegistry, ModelRow};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Number of keywords returned when the caller does not ask for a specific count
pub const DEFAULT_TOP_N: usize = 10;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for EWA operations
#[derive(Error, Debug)]
pub enum EwaError {
    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to load {task} model '{model_id}': {reason}")]
    ModelLoad {
        task: Task,
        model_id: String,
        reason: String,
    },

    #[error("{task} inference failed: {reason}")]
    Inference { task: Task, reason: String },

    #[error("Language detection failed: {0}")]
    LanguageDetection(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EwaError {
    pub fn fetch(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn model_load(task: Task, model_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ModelLoad {
            task,
            model_id: model_id.into(),
            reason: reason.into(),
        }
    }

    pub fn inference(task: Task, reason: impl Into<String>) -> Self {
        Self::Inference {
            task,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EwaError>;

// ============================================================================
// Language and Task
// ============================================================================

/// Language of a document, collapsed onto the closed set of supported codes
///
/// `En` and `Tr` have dedicated model rows. Every other detected language
/// maps to `Other`; supporting a new language means adding a variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageCode {
    En,
    Tr,
    Other,
}

impl LanguageCode {
    /// Languages with their own registry rows
    pub const FIRST_CLASS: [LanguageCode; 2] = [Self::En, Self::Tr];

    /// Every code, fallback included
    pub const ALL: [LanguageCode; 3] = [Self::En, Self::Tr, Self::Other];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Tr => "tr",
            Self::Other => "other",
        }
    }

    /// Map a raw classifier label onto the closed set.
    ///
    /// Accepts plain codes (`en`), region-tagged codes (`en-US`, `pt_BR`)
    /// and fastText-style labels (`__label__tr`). Anything that is not a
    /// first-class language collapses to [`LanguageCode::Other`].
    pub fn from_detected(label: &str) -> Self {
        let label = label.trim();
        let label = label.strip_prefix("__label__").unwrap_or(label);
        let primary = label
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_lowercase();

        Self::FIRST_CLASS
            .into_iter()
            .find(|code| code.as_str() == primary)
            .unwrap_or(Self::Other)
    }

    pub fn is_first_class(&self) -> bool {
        !matches!(self, Self::Other)
    }
}

impl std::fmt::Display for LanguageCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LanguageCode {
    type Err = EwaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "en" => Ok(Self::En),
            "tr" => Ok(Self::Tr),
            "other" => Ok(Self::Other),
            _ => Err(EwaError::Configuration(format!(
                "unknown language code '{s}' (expected one of: en, tr, other)"
            ))),
        }
    }
}

/// NLP task a model is selected for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Task {
    /// Named-entity recognition
    #[serde(rename = "ner")]
    Entity,
    /// Keyword extraction
    #[serde(rename = "kw")]
    Keyword,
}

impl Task {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entity => "ner",
            Self::Keyword => "kw",
        }
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Analysis Models
// ============================================================================

/// An entity found by a recognizer, after sub-word aggregation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySpan {
    /// Surface text of the entity
    pub word: String,

    /// Category label (e.g. PER, ORG, LOC, MISC)
    pub entity_group: String,

    /// Confidence in [0, 1]
    pub score: f64,
}

impl EntitySpan {
    pub fn new(word: impl Into<String>, entity_group: impl Into<String>, score: f64) -> Self {
        Self {
            word: word.into(),
            entity_group: entity_group.into(),
            score,
        }
    }
}

/// A ranked keyword phrase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordResult {
    pub keyword: String,

    /// Relevance used for ranking; not bounded to [0, 1]
    pub score: f64,
}

impl KeywordResult {
    pub fn new(keyword: impl Into<String>, score: f64) -> Self {
        Self {
            keyword: keyword.into(),
            score,
        }
    }
}

/// Output of one analysis run
///
/// Serializes to the persisted layout `{"ner": [...], "kw": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub ner: Vec<EntitySpan>,
    pub kw: Vec<KeywordResult>,
}

impl AnalysisResult {
    pub fn new(ner: Vec<EntitySpan>, kw: Vec<KeywordResult>) -> Self {
        Self { ner, kw }
    }

    pub fn entities(&self) -> &[EntitySpan] {
        &self.ner
    }

    pub fn keywords(&self) -> &[KeywordResult] {
        &self.kw
    }

    pub fn is_empty(&self) -> bool {
        self.ner.is_empty() && self.kw.is_empty()
    }

    /// Render as UTF-8 JSON indented by four spaces, non-ASCII left unescaped
    pub fn to_pretty_json(&self) -> Result<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut serializer)
            .map_err(|e| EwaError::Other(e.into()))?;
        String::from_utf8(buf).map_err(|e| EwaError::Other(e.into()))
    }
}

/// The pair of model identifiers used by one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelection {
    pub entity_model: String,
    pub keyword_model: String,
}

impl ModelSelection {
    pub fn model_for(&self, task: Task) -> &str {
        match task {
            Task::Entity => &self.entity_model,
            Task::Keyword => &self.keyword_model,
        }
    }
}

/// Analysis result together with the decisions that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRun {
    /// Detected language; `None` when both models were supplied explicitly
    pub language: Option<LanguageCode>,
    pub selection: ModelSelection,
    pub result: AnalysisResult,
}

// ============================================================================
// Capability Traits
// ============================================================================

/// Supplies cleaned document text for a resource identifier
#[async_trait::async_trait]
pub trait TextSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// Detects the language of a text
#[async_trait::async_trait]
pub trait LanguageClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<LanguageCode>;
}

/// A loaded named-entity recognition model
#[async_trait::async_trait]
pub trait EntityRecognizer: Send + Sync {
    /// Identifier the handle was loaded from
    fn model_id(&self) -> &str;

    /// Whole-entity spans in document order
    async fn predict(&self, text: &str) -> Result<Vec<EntitySpan>>;
}

/// A loaded keyword extraction model
#[async_trait::async_trait]
pub trait KeywordExtractor: Send + Sync {
    /// Identifier the handle was loaded from
    fn model_id(&self) -> &str;

    /// At most `top_n` keywords by descending score
    async fn predict(&self, text: &str, top_n: usize) -> Result<Vec<KeywordResult>>;
}

/// Produces entity recognizer handles from model identifiers
#[async_trait::async_trait]
pub trait EntityModelLoader: Send + Sync {
    async fn load(&self, model_id: &str) -> Result<Arc<dyn EntityRecognizer>>;
}

/// Produces keyword extractor handles from model identifiers
#[async_trait::async_trait]
pub trait KeywordModelLoader: Send + Sync {
    async fn load(&self, model_id: &str) -> Result<Arc<dyn KeywordExtractor>>;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_from_detected_first_class() {
        assert_eq!(LanguageCode::from_detected("en"), LanguageCode::En);
        assert_eq!(LanguageCode::from_detected("TR"), LanguageCode::Tr);
        assert_eq!(LanguageCode::from_detected("__label__tr"), LanguageCode::Tr);
        assert_eq!(LanguageCode::from_detected("en-US"), LanguageCode::En);
    }

    #[test]
    fn test_language_from_detected_collapses_to_other() {
        assert_eq!(LanguageCode::from_detected("fr"), LanguageCode::Other);
        assert_eq!(LanguageCode::from_detected("__label__de"), LanguageCode::Other);
        assert_eq!(LanguageCode::from_detected(""), LanguageCode::Other);
        assert!(!LanguageCode::Other.is_first_class());
    }

    #[test]
    fn test_language_parse() {
        assert_eq!("en".parse::<LanguageCode>().unwrap(), LanguageCode::En);
        assert_eq!("Other".parse::<LanguageCode>().unwrap(), LanguageCode::Other);
        assert!(matches!(
            "fr".parse::<LanguageCode>(),
            Err(EwaError::Configuration(_))
        ));
    }

    #[test]
    fn test_task_display() {
        assert_eq!(Task::Entity.to_string(), "ner");
        assert_eq!(Task::Keyword.as_str(), "kw");
    }

    #[test]
    fn test_model_load_error_names_task_and_model() {
        let err = EwaError::model_load(Task::Entity, "dslim/bert-base-NER", "404 Not Found");
        let message = err.to_string();
        assert!(message.contains("ner"));
        assert!(message.contains("dslim/bert-base-NER"));
    }

    #[test]
    fn test_analysis_result_layout() {
        let result = AnalysisResult::new(
            vec![EntitySpan::new("New York", "LOC", 0.99)],
            vec![KeywordResult::new("new york city", 0.71)],
        );

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["ner"][0]["word"], "New York");
        assert_eq!(value["ner"][0]["entity_group"], "LOC");
        assert_eq!(value["kw"][0]["keyword"], "new york city");
        assert_eq!(value.as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_pretty_json_keeps_non_ascii() {
        let result = AnalysisResult::new(vec![EntitySpan::new("İstanbul", "LOC", 0.98)], vec![]);

        let json = result.to_pretty_json().unwrap();
        assert!(json.contains("İstanbul"));
        assert!(json.contains("\n    \"ner\""));
    }

    #[test]
    fn test_model_selection_lookup() {
        let selection = ModelSelection {
            entity_model: "a".to_string(),
            keyword_model: "b".to_string(),
        };
        assert_eq!(selection.model_for(Task::Entity), "a");
        assert_eq!(selection.model_for(Task::Keyword), "b");
    }
}
