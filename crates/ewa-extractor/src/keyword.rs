//! Embedding-based keyword extraction
//!
//! Candidate phrases are word n-grams taken from the document. The document
//! and every candidate are embedded with the same sentence model, and
//! candidates are ranked by cosine similarity to the document.
//!
//! Author: hephaex@gmail.com

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use ewa_core::{
    EwaError, KeywordConfig, KeywordExtractor, KeywordModelLoader, KeywordResult, Result, Task,
};
use futures::{stream, StreamExt, TryStreamExt};
use ndarray::ArrayView1;
use regex::Regex;

use crate::ensure_pipeline_tag;
use crate::hub::{HubClient, HubModel, TextEmbedder};

/// Pipeline tags a Hub model must declare to be used for keywords
pub const KEYWORD_PIPELINE_TAGS: &[&str] = &["sentence-similarity", "feature-extraction"];

/// Embedding batches in flight at once
const CONCURRENT_BATCHES: usize = 2;

// ============================================================================
// Candidates
// ============================================================================

/// Builds candidate keyphrases from document text
///
/// Candidates are collected in reading order and collection stops at
/// `max_candidates`, so phrases that first appear after the cap is reached
/// are never scored. Raise `keyword.max_candidates` for long pages; every
/// extra candidate costs one more embedding.
pub struct CandidateGenerator {
    token_pattern: Regex,
    ngram_min: usize,
    ngram_max: usize,
    max_candidates: usize,
    stop_words: HashSet<String>,
}

impl CandidateGenerator {
    pub fn new(ngram_min: usize, ngram_max: usize, max_candidates: usize) -> Result<Self> {
        if ngram_min == 0 || ngram_min > ngram_max {
            return Err(EwaError::Configuration(format!(
                "invalid n-gram range {ngram_min}..={ngram_max}"
            )));
        }

        let token_pattern =
            Regex::new(r"\b\w\w+\b").map_err(|e| EwaError::Configuration(e.to_string()))?;

        Ok(Self {
            token_pattern,
            ngram_min,
            ngram_max,
            max_candidates,
            stop_words: HashSet::new(),
        })
    }

    pub fn with_stop_words<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.stop_words = words
            .into_iter()
            .map(|w| w.as_ref().to_lowercase())
            .collect();
        self
    }

    pub fn from_config(config: &KeywordConfig) -> Result<Self> {
        Ok(Self::new(config.ngram_min, config.ngram_max, config.max_candidates)?
            .with_stop_words(&config.stop_words))
    }

    fn tokens(&self, line: &str) -> Vec<String> {
        let line = line.to_lowercase();
        self.token_pattern
            .find_iter(&line)
            .map(|m| m.as_str().to_string())
            .filter(|t| !self.stop_words.contains(t))
            .collect()
    }

    /// Unique candidate phrases in order of first occurrence
    ///
    /// N-grams never span a line break, so headings and paragraphs do not
    /// run together.
    pub fn candidates(&self, text: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for line in text.lines() {
            let tokens = self.tokens(line);

            for start in 0..tokens.len() {
                for n in self.ngram_min..=self.ngram_max {
                    let Some(window) = tokens.get(start..start + n) else {
                        break;
                    };

                    let phrase = window.join(" ");
                    if seen.insert(phrase.clone()) {
                        candidates.push(phrase);
                        if candidates.len() >= self.max_candidates {
                            return candidates;
                        }
                    }
                }
            }
        }

        candidates
    }
}

// ============================================================================
// Ranking
// ============================================================================

/// Cosine similarity; zero vectors score 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let a = ArrayView1::from(a).mapv(f64::from);
    let b = ArrayView1::from(b).mapv(f64::from);

    let norm = a.dot(&a).sqrt() * b.dot(&b).sqrt();
    if norm == 0.0 {
        0.0
    } else {
        a.dot(&b) / norm
    }
}

fn round4(score: f64) -> f64 {
    (score * 10_000.0).round() / 10_000.0
}

/// Rank candidates against the document embedding
///
/// Sorting is stable, so equal scores keep candidate order.
pub fn rank_keywords(
    document: &[f32],
    candidates: Vec<String>,
    embeddings: &[Vec<f32>],
    top_n: usize,
) -> Vec<KeywordResult> {
    let mut ranked: Vec<KeywordResult> = candidates
        .into_iter()
        .zip(embeddings)
        .map(|(keyword, embedding)| {
            KeywordResult::new(keyword, round4(cosine_similarity(document, embedding)))
        })
        .collect();

    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked.truncate(top_n);
    ranked
}

// ============================================================================
// Extractor
// ============================================================================

/// Keyword extractor over a sentence embedding model
pub struct EmbeddingKeywordExtractor<E> {
    embedder: E,
    model_id: String,
    generator: CandidateGenerator,
    batch_size: usize,
}

impl<E: TextEmbedder> EmbeddingKeywordExtractor<E> {
    pub fn new(
        embedder: E,
        model_id: impl Into<String>,
        generator: CandidateGenerator,
        batch_size: usize,
    ) -> Self {
        Self {
            embedder,
            model_id: model_id.into(),
            generator,
            batch_size: batch_size.max(1),
        }
    }

    async fn embed_all(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let requests: Vec<_> = inputs
            .chunks(self.batch_size)
            .map(|batch| self.embedder.embed(batch))
            .collect();
        let batches: Vec<Vec<Vec<f32>>> = stream::iter(requests)
            .buffered(CONCURRENT_BATCHES)
            .try_collect()
            .await
            .map_err(|e| EwaError::inference(Task::Keyword, e.to_string()))?;

        let embeddings: Vec<Vec<f32>> = batches.into_iter().flatten().collect();
        if embeddings.len() != inputs.len() {
            return Err(EwaError::inference(
                Task::Keyword,
                format!("expected {} embeddings, got {}", inputs.len(), embeddings.len()),
            ));
        }
        Ok(embeddings)
    }
}

#[async_trait]
impl<E: TextEmbedder> KeywordExtractor for EmbeddingKeywordExtractor<E> {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn predict(&self, text: &str, top_n: usize) -> Result<Vec<KeywordResult>> {
        if top_n == 0 {
            return Ok(Vec::new());
        }

        let candidates = self.generator.candidates(text);
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let document = self
            .embed_all(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();
        let embeddings = self.embed_all(&candidates).await?;

        tracing::debug!(
            model = %self.model_id,
            candidates = candidates.len(),
            top_n,
            "Keyword candidates embedded"
        );

        Ok(rank_keywords(&document, candidates, &embeddings, top_n))
    }
}

/// Loads sentence embedding models from the Hub
pub struct HubKeywordModelLoader {
    client: Arc<HubClient>,
    config: KeywordConfig,
}

impl HubKeywordModelLoader {
    pub fn new(client: Arc<HubClient>, config: &KeywordConfig) -> Self {
        Self {
            client,
            config: config.clone(),
        }
    }
}

#[async_trait]
impl KeywordModelLoader for HubKeywordModelLoader {
    async fn load(&self, model_id: &str) -> Result<Arc<dyn KeywordExtractor>> {
        ensure_pipeline_tag(&self.client, model_id, Task::Keyword, KEYWORD_PIPELINE_TAGS).await?;

        let generator = CandidateGenerator::from_config(&self.config)?;
        let model = HubModel::new(self.client.clone(), model_id);
        Ok(Arc::new(EmbeddingKeywordExtractor::new(
            model,
            model_id,
            generator,
            self.config.batch_size,
        )))
    }
}
