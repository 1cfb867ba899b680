//! Language detection backed by a text-classification model

use std::sync::Arc;

use async_trait::async_trait;
use ewa_core::{EwaError, LanguageClassifier, LanguageCode, LanguageConfig, Result};

use crate::hub::{HubClient, HubModel, SequenceClassifier};

/// Classifies the language of a document with a sequence classifier
pub struct ModelLanguageClassifier<C> {
    classifier: C,
    max_chars: usize,
}

impl<C: SequenceClassifier> ModelLanguageClassifier<C> {
    pub fn new(classifier: C, max_chars: usize) -> Self {
        Self {
            classifier,
            max_chars,
        }
    }

    /// Flatten line breaks and cut to `max_chars` characters
    pub fn prepare_text(&self, text: &str) -> Result<String> {
        if text.trim().is_empty() {
            return Err(EwaError::Input(
                "cannot detect the language of empty text".to_string(),
            ));
        }

        Ok(text
            .chars()
            .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
            .take(self.max_chars)
            .collect())
    }
}

impl ModelLanguageClassifier<HubModel> {
    /// Hub-backed classifier using the configured detection model
    pub fn from_config(client: Arc<HubClient>, config: &LanguageConfig) -> Self {
        Self::new(HubModel::new(client, &config.model), config.max_chars)
    }
}

#[async_trait]
impl<C: SequenceClassifier> LanguageClassifier for ModelLanguageClassifier<C> {
    async fn classify(&self, text: &str) -> Result<LanguageCode> {
        let prepared = self.prepare_text(text)?;

        let scores = self
            .classifier
            .classify(&prepared)
            .await
            .map_err(|e| EwaError::LanguageDetection(e.to_string()))?;

        let best = scores
            .iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
            .ok_or_else(|| EwaError::LanguageDetection("classifier returned no labels".to_string()))?;

        let language = LanguageCode::from_detected(&best.label);
        tracing::debug!(label = %best.label, score = best.score, %language, "Language detected");
        Ok(language)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{self, HubError, LabelScore};
    use std::sync::Mutex;

    struct FakeClassifier {
        labels: Vec<(&'static str, f32)>,
        seen: Mutex<Vec<String>>,
    }

    impl FakeClassifier {
        fn new(labels: Vec<(&'static str, f32)>) -> Self {
            Self {
                labels,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SequenceClassifier for FakeClassifier {
        async fn classify(&self, text: &str) -> hub::Result<Vec<LabelScore>> {
            self.seen.lock().unwrap().push(text.to_string());
            Ok(self
                .labels
                .iter()
                .map(|(label, score)| LabelScore {
                    label: label.to_string(),
                    score: *score,
                })
                .collect())
        }
    }

    struct FailingClassifier;

    #[async_trait]
    impl SequenceClassifier for FailingClassifier {
        async fn classify(&self, _text: &str) -> hub::Result<Vec<LabelScore>> {
            Err(HubError::Status {
                status: 503,
                body: "loading".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_top_label_wins() {
        let classifier =
            ModelLanguageClassifier::new(FakeClassifier::new(vec![("en", 0.2), ("tr", 0.7)]), 2000);

        let language = classifier.classify("Bugün hava çok güzel.").await.unwrap();
        assert_eq!(language, LanguageCode::Tr);
    }

    #[tokio::test]
    async fn test_unsupported_language_is_other() {
        let classifier = ModelLanguageClassifier::new(FakeClassifier::new(vec![("fr", 0.95)]), 2000);

        let language = classifier.classify("Bonjour tout le monde").await.unwrap();
        assert_eq!(language, LanguageCode::Other);
    }

    #[tokio::test]
    async fn test_empty_text_is_input_error() {
        let classifier = ModelLanguageClassifier::new(FakeClassifier::new(vec![("en", 1.0)]), 2000);

        let err = classifier.classify("  \n\t ").await.unwrap_err();
        assert!(matches!(err, EwaError::Input(_)));
        assert!(classifier.classifier.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_text_flattened_and_truncated() {
        let classifier = ModelLanguageClassifier::new(FakeClassifier::new(vec![("en", 1.0)]), 8);

        classifier.classify("ab\ncd\r\nefghij").await.unwrap();
        let seen = classifier.classifier.seen.lock().unwrap();
        assert_eq!(seen[0], "ab cd  e");
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let classifier = ModelLanguageClassifier::new(FakeClassifier::new(vec![]), 3);
        assert_eq!(classifier.prepare_text("ğüşiö").unwrap(), "ğüş");
    }

    #[tokio::test]
    async fn test_classifier_failure() {
        let classifier = ModelLanguageClassifier::new(FailingClassifier, 2000);

        let err = classifier.classify("some text").await.unwrap_err();
        assert!(matches!(err, EwaError::LanguageDetection(_)));
    }

    #[tokio::test]
    async fn test_no_labels() {
        let classifier = ModelLanguageClassifier::new(FakeClassifier::new(vec![]), 2000);

        let err = classifier.classify("some text").await.unwrap_err();
        assert!(matches!(err, EwaError::LanguageDetection(_)));
    }
}
