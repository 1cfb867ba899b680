//! Model registry
//!
//! Read-only mapping from language to the default entity and keyword
//! models. The registry is built once from configuration and injected
//! into the pipeline; it never changes for the lifetime of the process.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::{EwaError, LanguageCode, Result, Task};

/// Default models for one language
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRow {
    /// Token-classification model for named-entity recognition
    #[serde(default)]
    pub ner: Option<String>,

    /// Embedding model for keyword extraction
    #[serde(default)]
    pub kw: Option<String>,
}

impl ModelRow {
    pub fn new(ner: impl Into<String>, kw: impl Into<String>) -> Self {
        Self {
            ner: Some(ner.into()),
            kw: Some(kw.into()),
        }
    }

    /// Replace the fields `other` sets, keeping the rest
    pub fn overlay(&mut self, other: ModelRow) {
        if other.ner.is_some() {
            self.ner = other.ner;
        }
        if other.kw.is_some() {
            self.kw = other.kw;
        }
    }

    /// Configured model for a task; blank identifiers count as missing
    pub fn get(&self, task: Task) -> Option<&str> {
        let model = match task {
            Task::Entity => self.ner.as_deref(),
            Task::Keyword => self.kw.as_deref(),
        };
        model.map(str::trim).filter(|m| !m.is_empty())
    }
}

/// Built-in rows shipped with EWA. The fallback language has none yet.
pub fn builtin_rows() -> BTreeMap<String, ModelRow> {
    BTreeMap::from([
        (
            LanguageCode::En.as_str().to_string(),
            ModelRow::new(
                "dslim/bert-base-NER",
                "sentence-transformers/paraphrase-mpnet-base-v2",
            ),
        ),
        (
            LanguageCode::Tr.as_str().to_string(),
            ModelRow::new(
                "savasy/bert-base-turkish-ner-cased",
                "emrecan/bert-base-turkish-cased-mean-nli-stsb-tr",
            ),
        ),
    ])
}

/// Language-keyed model table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRegistry {
    rows: HashMap<LanguageCode, ModelRow>,
}

impl ModelRegistry {
    /// Registry with no rows
    pub fn empty() -> Self {
        Self {
            rows: HashMap::new(),
        }
    }

    /// Add or replace the row for a language
    pub fn with_row(mut self, language: LanguageCode, row: ModelRow) -> Self {
        self.rows.insert(language, row);
        self
    }

    /// Build from configuration rows keyed by language code
    pub fn from_rows(rows: &BTreeMap<String, ModelRow>) -> Result<Self> {
        let mut registry = Self::empty();
        for (key, row) in rows {
            let language: LanguageCode = key.parse()?;
            registry.rows.insert(language, row.clone());
        }
        Ok(registry)
    }

    /// Default model for (language, task)
    ///
    /// Fails with [`EwaError::Configuration`] when no usable identifier is
    /// configured, so an empty id never reaches a model loader.
    pub fn resolve(&self, language: LanguageCode, task: Task) -> Result<String> {
        self.rows
            .get(&language)
            .and_then(|row| row.get(task))
            .map(str::to_string)
            .ok_or_else(|| {
                EwaError::Configuration(format!(
                    "no default {task} model configured for language '{language}'"
                ))
            })
    }

    pub fn row(&self, language: LanguageCode) -> Option<&ModelRow> {
        self.rows.get(&language)
    }

    /// Languages that have at least one configured model
    pub fn languages(&self) -> Vec<LanguageCode> {
        let mut languages: Vec<_> = self
            .rows
            .iter()
            .filter(|(_, row)| row.get(Task::Entity).is_some() || row.get(Task::Keyword).is_some())
            .map(|(language, _)| *language)
            .collect();
        languages.sort();
        languages
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        for (key, row) in builtin_rows() {
            if let Ok(language) = key.parse() {
                registry.rows.insert(language, row);
            }
        }
        registry
    }
}
