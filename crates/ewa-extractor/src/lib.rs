//! EWA Extractor - Language detection, NER and keyword extraction
//!
//! Implements the model capabilities from `ewa-core` on top of the
//! Hugging Face Hub:
//! - [`ModelLanguageClassifier`]: text-classification language detection
//! - [`HubEntityModelLoader`]: token-classification models with local
//!   entity aggregation
//! - [`HubKeywordModelLoader`]: sentence embedding models ranked against
//!   word n-gram candidates
//!
//! Loading a model means checking its Hub card; inference runs on the
//! Inference API.

pub mod hub;
pub mod keyword;
pub mod language;
pub mod ner;

pub use hub::{HubClient, HubError, HubModel, ModelInfo};
pub use keyword::{CandidateGenerator, EmbeddingKeywordExtractor, HubKeywordModelLoader};
pub use language::ModelLanguageClassifier;
pub use ner::{AggregatingRecognizer, HubEntityModelLoader};

use ewa_core::{EwaError, Result, Task};

impl From<HubError> for EwaError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::Client(message) => EwaError::Configuration(message),
            other => EwaError::Other(other.into()),
        }
    }
}

/// Fail with a load error unless the model card declares a usable pipeline
pub(crate) async fn ensure_pipeline_tag(
    client: &HubClient,
    model_id: &str,
    task: Task,
    accepted: &[&str],
) -> Result<()> {
    let info = client
        .model_info(model_id)
        .await
        .map_err(|e| EwaError::model_load(task, model_id, e.to_string()))?;

    check_pipeline_tag(&info, task, accepted)
}

/// Accept a model card whose pipeline tag is one of `accepted`
pub fn check_pipeline_tag(info: &ModelInfo, task: Task, accepted: &[&str]) -> Result<()> {
    match info.pipeline_tag.as_deref() {
        Some(tag) if accepted.contains(&tag) => {
            tracing::info!(%task, model = %info.id, pipeline = tag, "Model loaded");
            Ok(())
        }
        Some(tag) => Err(EwaError::model_load(
            task,
            info.id.clone(),
            format!("pipeline '{tag}' is not one of: {}", accepted.join(", ")),
        )),
        None => Err(EwaError::model_load(
            task,
            info.id.clone(),
            "model card declares no pipeline",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(pipeline_tag: Option<&str>) -> ModelInfo {
        ModelInfo {
            id: "org/model".to_string(),
            pipeline_tag: pipeline_tag.map(str::to_string),
            library_name: Some("transformers".to_string()),
        }
    }

    #[test]
    fn test_accepted_pipeline_tag() {
        let info = card(Some("feature-extraction"));
        assert!(check_pipeline_tag(&info, Task::Keyword, keyword::KEYWORD_PIPELINE_TAGS).is_ok());

        let info = card(Some("token-classification"));
        assert!(check_pipeline_tag(&info, Task::Entity, ner::NER_PIPELINE_TAGS).is_ok());
    }

    #[test]
    fn test_wrong_pipeline_tag_is_load_error() {
        let info = card(Some("text-generation"));

        match check_pipeline_tag(&info, Task::Entity, ner::NER_PIPELINE_TAGS) {
            Err(EwaError::ModelLoad {
                task,
                model_id,
                reason,
            }) => {
                assert_eq!(task, Task::Entity);
                assert_eq!(model_id, "org/model");
                assert!(reason.contains("text-generation"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_missing_pipeline_tag_is_load_error() {
        let info = card(None);

        assert!(matches!(
            check_pipeline_tag(&info, Task::Keyword, keyword::KEYWORD_PIPELINE_TAGS),
            Err(EwaError::ModelLoad {
                task: Task::Keyword,
                ..
            })
        ));
    }

    #[test]
    fn test_client_error_is_configuration() {
        let err: EwaError = HubError::Client("bad token header".to_string()).into();
        assert!(matches!(err, EwaError::Configuration(_)));
    }
}
