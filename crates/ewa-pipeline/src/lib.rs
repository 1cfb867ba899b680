//! EWA Pipeline - Language-conditional analysis orchestrator
//!
//! One analysis run goes through these stages:
//! 1. Reject empty text
//! 2. Detect the document language, only if a model still has to be chosen
//! 3. Pick each model: the caller's identifier, or the registry default
//!    for the detected language
//! 4. Load both models
//! 5. Run entity recognition and keyword extraction
//! 6. Assemble the result
//!
//! Language detection runs at most once per run. Handles are cached
//! across runs unless reuse is turned off.
//!
//! Author: hephaex@gmail.com

pub mod cache;

pub use cache::{CacheStats, CacheStatsReport, HandleCache};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ewa_core::{
    AnalysisResult, AnalysisRun, AppConfig, EntityModelLoader, EntityRecognizer, EntitySpan,
    EwaError, KeywordExtractor, KeywordModelLoader, KeywordResult, LanguageClassifier,
    LanguageCode, ModelRegistry, ModelSelection, Result, Task, TextSource, DEFAULT_TOP_N,
};
use ewa_crawler::HttpTextSource;
use ewa_extractor::{HubClient, HubEntityModelLoader, HubKeywordModelLoader, ModelLanguageClassifier};
use tokio::sync::OnceCell;
use tracing::Instrument;
use uuid::Uuid;

// ============================================================================
// Options
// ============================================================================

/// Pipeline behaviour switches
#[derive(Debug, Clone)]
pub struct AnalyzerOptions {
    /// Keep loaded handles for later runs
    pub reuse_models: bool,

    /// Handles kept per task
    pub model_cache_capacity: u64,

    /// Run entity and keyword inference concurrently
    pub parallel_inference: bool,

    /// Limit for each load and each inference call
    pub inference_timeout: Option<Duration>,

    /// Keywords returned when a run does not ask for a count
    pub default_top_n: usize,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            reuse_models: true,
            model_cache_capacity: 16,
            parallel_inference: false,
            inference_timeout: None,
            default_top_n: DEFAULT_TOP_N,
        }
    }
}

impl From<&AppConfig> for AnalyzerOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            reuse_models: config.pipeline.reuse_models,
            model_cache_capacity: config.pipeline.model_cache_capacity,
            parallel_inference: config.pipeline.parallel_inference,
            inference_timeout: config.pipeline.inference_timeout_secs.map(Duration::from_secs),
            default_top_n: config.keyword.top_n,
        }
    }
}

/// Per-run caller choices
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Entity model to use instead of the registry default
    pub entity_model: Option<String>,

    /// Keyword model to use instead of the registry default
    pub keyword_model: Option<String>,

    /// Number of keywords to return
    pub top_n: Option<usize>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity_model(mut self, model_id: impl Into<String>) -> Self {
        self.entity_model = Some(model_id.into());
        self
    }

    pub fn with_keyword_model(mut self, model_id: impl Into<String>) -> Self {
        self.keyword_model = Some(model_id.into());
        self
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = Some(top_n);
        self
    }

    /// Caller-supplied identifier for a task; blank counts as unset
    pub fn explicit_model(&self, task: Task) -> Option<&str> {
        let model = match task {
            Task::Entity => self.entity_model.as_deref(),
            Task::Keyword => self.keyword_model.as_deref(),
        };
        model.map(str::trim).filter(|m| !m.is_empty())
    }
}

// ============================================================================
// Run State
// ============================================================================

/// State owned by a single run
struct RunState<'a> {
    text: &'a str,
    language: OnceCell<LanguageCode>,
}

impl<'a> RunState<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            language: OnceCell::new(),
        }
    }

    /// Detected language, classifying on first use only
    async fn language(&self, classifier: &dyn LanguageClassifier) -> Result<LanguageCode> {
        self.language
            .get_or_try_init(move || classifier.classify(self.text))
            .await
            .copied()
    }
}

// ============================================================================
// Analyzer
// ============================================================================

/// Analysis pipeline orchestrator
pub struct Analyzer {
    registry: Arc<ModelRegistry>,
    classifier: Arc<dyn LanguageClassifier>,
    entity_loader: Arc<dyn EntityModelLoader>,
    keyword_loader: Arc<dyn KeywordModelLoader>,
    source: Option<Arc<dyn TextSource>>,
    entity_cache: HandleCache<dyn EntityRecognizer>,
    keyword_cache: HandleCache<dyn KeywordExtractor>,
    options: AnalyzerOptions,
}

impl Analyzer {
    /// Create an analyzer with default options
    pub fn new(
        registry: Arc<ModelRegistry>,
        classifier: Arc<dyn LanguageClassifier>,
        entity_loader: Arc<dyn EntityModelLoader>,
        keyword_loader: Arc<dyn KeywordModelLoader>,
    ) -> Self {
        let options = AnalyzerOptions::default();
        Self {
            registry,
            classifier,
            entity_loader,
            keyword_loader,
            source: None,
            entity_cache: build_cache(Task::Entity, &options),
            keyword_cache: build_cache(Task::Keyword, &options),
            options,
        }
    }

    /// Add a text source for URL analysis
    pub fn with_source(mut self, source: Arc<dyn TextSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Replace the options; handle caches are rebuilt empty
    pub fn with_options(mut self, options: AnalyzerOptions) -> Self {
        self.entity_cache = build_cache(Task::Entity, &options);
        self.keyword_cache = build_cache(Task::Keyword, &options);
        self.options = options;
        self
    }

    /// Hub-backed analyzer with an HTTP text source
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let registry = Arc::new(config.model_registry()?);
        let client = Arc::new(HubClient::from_config(&config.hub)?);
        let source = HttpTextSource::from_config(&config.fetch)?;

        Ok(Self::new(
            registry,
            Arc::new(ModelLanguageClassifier::from_config(client.clone(), &config.language)),
            Arc::new(HubEntityModelLoader::new(client.clone(), &config.ner)),
            Arc::new(HubKeywordModelLoader::new(client, &config.keyword)),
        )
        .with_source(Arc::new(source))
        .with_options(AnalyzerOptions::from(config)))
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn options(&self) -> &AnalyzerOptions {
        &self.options
    }

    pub fn cache_stats(&self) -> Vec<CacheStatsReport> {
        vec![
            self.entity_cache.stats().report(),
            self.keyword_cache.stats().report(),
        ]
    }

    /// Analyze document text
    pub async fn analyze(&self, text: &str, options: &RunOptions) -> Result<AnalysisResult> {
        self.run(text, options).await.map(|run| run.result)
    }

    /// Fetch a page and analyze its text
    pub async fn analyze_url(&self, url: &str, options: &RunOptions) -> Result<AnalysisResult> {
        self.run_url(url, options).await.map(|run| run.result)
    }

    /// Fetch a page and analyze it, keeping the selection details
    pub async fn run_url(&self, url: &str, options: &RunOptions) -> Result<AnalysisRun> {
        let text = self.fetch_text(url).await?;
        self.run(&text, options).await
    }

    /// Cleaned text of a page
    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        let source = self.source.as_ref().ok_or_else(|| {
            EwaError::Configuration("no text source configured for URL analysis".to_string())
        })?;
        source.fetch(url).await
    }

    /// Analyze document text, keeping the selection details
    pub async fn run(&self, text: &str, options: &RunOptions) -> Result<AnalysisRun> {
        let span = tracing::info_span!("analysis", run_id = %Uuid::new_v4());
        self.run_inner(text, options).instrument(span).await
    }

    async fn run_inner(&self, text: &str, options: &RunOptions) -> Result<AnalysisRun> {
        if text.trim().is_empty() {
            return Err(EwaError::Input("document text is empty".to_string()));
        }
        tracing::info!(text_len = text.len(), "Analysis started");

        let state = RunState::new(text);
        let selection = ModelSelection {
            entity_model: self.select_model(&state, options, Task::Entity).await?,
            keyword_model: self.select_model(&state, options, Task::Keyword).await?,
        };
        let language = state.language.get().copied();
        tracing::info!(
            language = language.map(|l| l.as_str()).unwrap_or("-"),
            entity_model = %selection.entity_model,
            keyword_model = %selection.keyword_model,
            "Models selected"
        );

        let recognizer = self.load_entity_model(&selection.entity_model).await?;
        let extractor = self.load_keyword_model(&selection.keyword_model).await?;

        let top_n = options.top_n.unwrap_or(self.options.default_top_n);
        let entities = self.predict_entities(recognizer.as_ref(), text);
        let keywords = self.predict_keywords(extractor.as_ref(), text, top_n);

        let (ner, kw) = if self.options.parallel_inference {
            tokio::try_join!(entities, keywords)?
        } else {
            let ner = entities.await?;
            (ner, keywords.await?)
        };

        tracing::info!(entities = ner.len(), keywords = kw.len(), "Analysis completed");

        Ok(AnalysisRun {
            language,
            selection,
            result: AnalysisResult::new(ner, kw),
        })
    }

    async fn select_model(
        &self,
        state: &RunState<'_>,
        options: &RunOptions,
        task: Task,
    ) -> Result<String> {
        if let Some(model_id) = options.explicit_model(task) {
            return Ok(model_id.to_string());
        }

        let language = state.language(self.classifier.as_ref()).await?;
        self.registry.resolve(language, task)
    }

    async fn load_entity_model(&self, model_id: &str) -> Result<Arc<dyn EntityRecognizer>> {
        self.entity_cache
            .get_or_load(model_id, || async move {
                let load = self.entity_loader.load(model_id);
                self.limited(load, || EwaError::model_load(Task::Entity, model_id, "load timed out"))
                    .await
                    .map_err(|e| as_load_error(e, Task::Entity, model_id))
            })
            .await
    }

    async fn load_keyword_model(&self, model_id: &str) -> Result<Arc<dyn KeywordExtractor>> {
        self.keyword_cache
            .get_or_load(model_id, || async move {
                let load = self.keyword_loader.load(model_id);
                self.limited(load, || EwaError::model_load(Task::Keyword, model_id, "load timed out"))
                    .await
                    .map_err(|e| as_load_error(e, Task::Keyword, model_id))
            })
            .await
    }

    async fn predict_entities(
        &self,
        recognizer: &dyn EntityRecognizer,
        text: &str,
    ) -> Result<Vec<EntitySpan>> {
        self.limited(recognizer.predict(text), || {
            EwaError::inference(Task::Entity, "inference timed out")
        })
        .await
    }

    async fn predict_keywords(
        &self,
        extractor: &dyn KeywordExtractor,
        text: &str,
        top_n: usize,
    ) -> Result<Vec<KeywordResult>> {
        self.limited(extractor.predict(text, top_n), || {
            EwaError::inference(Task::Keyword, "inference timed out")
        })
        .await
    }

    /// Apply the configured timeout, if any
    async fn limited<T, F>(&self, fut: F, on_timeout: impl FnOnce() -> EwaError) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.options.inference_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| on_timeout())?,
            None => fut.await,
        }
    }
}

fn build_cache<H: ?Sized + Send + Sync + 'static>(task: Task, options: &AnalyzerOptions) -> HandleCache<H> {
    if options.reuse_models {
        HandleCache::new(task, options.model_cache_capacity)
    } else {
        HandleCache::disabled(task)
    }
}

/// Every loader failure is reported as a load error for its task
fn as_load_error(err: EwaError, task: Task, model_id: &str) -> EwaError {
    match err {
        err @ EwaError::ModelLoad { .. } => err,
        other => EwaError::model_load(task, model_id, other.to_string()),
    }
}
