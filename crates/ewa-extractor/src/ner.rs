//! Named-entity recognition
//!
//! Token-level predictions are grouped into whole entities locally so the
//! output does not depend on how a given deployment aggregates. Grouping
//! follows the "simple" strategy: `O` tokens are dropped, and a token joins
//! the open group when it has the same category and is not tagged `B-` or
//! `S-`. Sub-word continuations always join an open group of their category.
//! `S-` and `E-` tokens close the group they end up in.

use std::sync::Arc;

use async_trait::async_trait;
use ewa_core::{EntityModelLoader, EntityRecognizer, EntitySpan, EwaError, NerConfig, Result, Task};

use crate::hub::{HubClient, HubModel, RawToken, TokenClassifier};
use crate::ensure_pipeline_tag;

/// Pipeline tags a Hub model must declare to be used for NER
pub const NER_PIPELINE_TAGS: &[&str] = &["token-classification"];

/// Split `B-PER` into (`Some('B')`, `PER`); bare labels have no prefix
fn split_label(label: &str) -> (Option<char>, &str) {
    let mut chars = label.chars();
    match (chars.next(), chars.next()) {
        (Some(prefix @ ('B' | 'I' | 'E' | 'S')), Some('-' | '_')) => (Some(prefix), &label[2..]),
        _ => (None, label),
    }
}

/// Substring by character offsets
fn char_slice(text: &str, start: usize, end: usize) -> Option<&str> {
    if start >= end {
        return None;
    }
    let mut indices = text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len()));
    let from = indices.nth(start)?;
    let to = indices.nth(end - start - 1)?;
    Some(&text[from..to])
}

fn has_word_marker(word: &str) -> bool {
    word.starts_with('▁') || word.starts_with('Ġ')
}

/// SentencePiece and byte-level BPE vocabularies mark word starts
fn uses_word_markers<'a>(tokens: impl IntoIterator<Item = &'a RawToken>) -> bool {
    tokens.into_iter().any(|t| has_word_marker(&t.word))
}

/// Whether a token continues the word before it
fn is_subword(token: &RawToken, word_markers: bool) -> bool {
    if word_markers {
        !has_word_marker(&token.word)
    } else {
        token.word.starts_with("##")
    }
}

/// Rebuild a surface form from sub-word tokens
fn join_tokens(tokens: &[&RawToken]) -> String {
    let sentencepiece = uses_word_markers(tokens.iter().copied());

    let mut word = String::new();
    for token in tokens {
        let (piece, continues) = if sentencepiece {
            match token.word.strip_prefix('▁').or_else(|| token.word.strip_prefix('Ġ')) {
                Some(rest) => (rest, false),
                None => (token.word.as_str(), true),
            }
        } else {
            match token.word.strip_prefix("##") {
                Some(rest) => (rest, true),
                None => (token.word.as_str(), false),
            }
        };

        if !continues && !word.is_empty() {
            word.push(' ');
        }
        word.push_str(piece);
    }
    word
}

fn build_span(text: &str, entity_group: &str, tokens: &[&RawToken]) -> EntitySpan {
    let offsets = tokens
        .first()
        .and_then(|first| first.start)
        .zip(tokens.last().and_then(|last| last.end));

    let word = offsets
        .and_then(|(start, end)| char_slice(text, start, end))
        .map(|w| w.trim().to_string())
        .filter(|w| !w.is_empty())
        .unwrap_or_else(|| join_tokens(tokens));

    let score = tokens.iter().map(|t| f64::from(t.score)).sum::<f64>() / tokens.len() as f64;

    EntitySpan::new(word, entity_group, score)
}

/// Group token predictions into entity spans
pub fn aggregate_simple(text: &str, tokens: &[RawToken]) -> Vec<EntitySpan> {
    let word_markers = uses_word_markers(tokens);
    let mut spans = Vec::new();
    let mut group: Option<(&str, Vec<&RawToken>)> = None;

    for token in tokens {
        let (prefix, category) = split_label(&token.entity);

        if category == "O" {
            if let Some((entity, members)) = group.take() {
                spans.push(build_span(text, entity, &members));
            }
            continue;
        }

        let same_category = matches!(&group, Some((entity, _)) if *entity == category);
        let begins = matches!(prefix, Some('B' | 'S'));
        let joins = same_category && (!begins || is_subword(token, word_markers));

        if joins {
            if let Some((_, members)) = group.as_mut() {
                members.push(token);
            }
        } else if let Some((entity, members)) = group.replace((category, vec![token])) {
            spans.push(build_span(text, entity, &members));
        }

        if matches!(prefix, Some('S' | 'E')) {
            if let Some((entity, members)) = group.take() {
                spans.push(build_span(text, entity, &members));
            }
        }
    }

    if let Some((entity, members)) = group {
        spans.push(build_span(text, entity, &members));
    }

    spans
}

/// Split text into trimmed pieces of at most `max_chars` characters,
/// cutting at the last whitespace when there is one
pub fn split_chunks(text: &str, max_chars: usize) -> Vec<&str> {
    if max_chars == 0 || text.chars().count() <= max_chars {
        let trimmed = text.trim();
        return if trimmed.is_empty() { Vec::new() } else { vec![trimmed] };
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut count = 0;
    let mut last_break: Option<usize> = None;

    for (i, c) in text.char_indices() {
        if count == max_chars {
            let cut = last_break.filter(|&b| b > start).unwrap_or(i);
            let piece = text[start..cut].trim();
            if !piece.is_empty() {
                chunks.push(piece);
            }
            start = cut;
            count = text[start..i].chars().count();
            last_break = None;
        }

        count += 1;
        if c.is_whitespace() {
            last_break = Some(i + c.len_utf8());
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        chunks.push(tail);
    }
    chunks
}

// ============================================================================
// Recognizer
// ============================================================================

/// Entity recognizer that aggregates token predictions locally
pub struct AggregatingRecognizer<C> {
    classifier: C,
    model_id: String,
    max_chunk_chars: usize,
}

impl<C: TokenClassifier> AggregatingRecognizer<C> {
    pub fn new(classifier: C, model_id: impl Into<String>, max_chunk_chars: usize) -> Self {
        Self {
            classifier,
            model_id: model_id.into(),
            max_chunk_chars,
        }
    }
}

#[async_trait]
impl<C: TokenClassifier> EntityRecognizer for AggregatingRecognizer<C> {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn predict(&self, text: &str) -> Result<Vec<EntitySpan>> {
        let mut spans = Vec::new();

        for chunk in split_chunks(text, self.max_chunk_chars) {
            let tokens = self
                .classifier
                .classify_tokens(chunk)
                .await
                .map_err(|e| EwaError::inference(Task::Entity, e.to_string()))?;
            spans.extend(aggregate_simple(chunk, &tokens));
        }

        tracing::debug!(model = %self.model_id, entities = spans.len(), "Entities recognized");
        Ok(spans)
    }
}

/// Loads token-classification models from the Hub
pub struct HubEntityModelLoader {
    client: Arc<HubClient>,
    max_chunk_chars: usize,
}

impl HubEntityModelLoader {
    pub fn new(client: Arc<HubClient>, config: &NerConfig) -> Self {
        Self {
            client,
            max_chunk_chars: config.max_chunk_chars,
        }
    }
}

#[async_trait]
impl EntityModelLoader for HubEntityModelLoader {
    async fn load(&self, model_id: &str) -> Result<Arc<dyn EntityRecognizer>> {
        ensure_pipeline_tag(&self.client, model_id, Task::Entity, NER_PIPELINE_TAGS).await?;

        let model = HubModel::new(self.client.clone(), model_id);
        Ok(Arc::new(AggregatingRecognizer::new(
            model,
            model_id,
            self.max_chunk_chars,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub;

    fn token(entity: &str, word: &str, score: f32, offsets: Option<(usize, usize)>) -> RawToken {
        RawToken {
            entity: entity.to_string(),
            score,
            word: word.to_string(),
            start: offsets.map(|o| o.0),
            end: offsets.map(|o| o.1),
        }
    }

    #[test]
    fn test_new_york_is_one_location() {
        let text = "I moved to New York last year";
        let tokens = vec![
            token("B-LOC", "New", 0.99, Some((11, 14))),
            token("I-LOC", "York", 0.97, Some((15, 19))),
        ];

        let spans = aggregate_simple(text, &tokens);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].word, "New York");
        assert_eq!(spans[0].entity_group, "LOC");
        assert!((spans[0].score - 0.98).abs() < 1e-6);
    }

    #[test]
    fn test_wordpiece_tokens_joined_without_offsets() {
        let tokens = vec![
            token("B-PER", "Ha", 0.9, None),
            token("I-PER", "##kan", 0.9, None),
            token("I-PER", "Şükür", 0.9, None),
        ];

        let spans = aggregate_simple("", &tokens);
        assert_eq!(spans[0].word, "Hakan Şükür");
    }

    #[test]
    fn test_sentencepiece_tokens_joined_without_offsets() {
        let tokens = vec![
            token("B-ORG", "▁Hug", 0.8, None),
            token("I-ORG", "ging", 0.8, None),
            token("I-ORG", "▁Face", 0.8, None),
        ];

        let spans = aggregate_simple("", &tokens);
        assert_eq!(spans[0].word, "Hugging Face");
    }

    #[test]
    fn test_begin_prefix_starts_new_group() {
        let text = "Paris London";
        let tokens = vec![
            token("B-LOC", "Paris", 0.9, Some((0, 5))),
            token("B-LOC", "London", 0.8, Some((6, 12))),
        ];

        let spans = aggregate_simple(text, &tokens);
        let words: Vec<_> = spans.iter().map(|s| s.word.as_str()).collect();
        assert_eq!(words, vec!["Paris", "London"]);
    }

    #[test]
    fn test_wordpiece_continuation_joins_despite_begin_tag() {
        let text = "Hakan";
        let tokens = vec![
            token("B-PER", "Ha", 0.9, Some((0, 2))),
            token("B-PER", "##kan", 0.7, Some((2, 5))),
        ];

        let spans = aggregate_simple(text, &tokens);
        let words: Vec<_> = spans.iter().map(|s| s.word.as_str()).collect();
        assert_eq!(words, vec!["Hakan"]);
        assert!((spans[0].score - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_sentencepiece_continuation_joins_despite_begin_tag() {
        let tokens = vec![
            token("B-LOC", "▁İstan", 0.9, None),
            token("B-LOC", "bul", 0.9, None),
            token("B-LOC", "▁Ankara", 0.9, None),
        ];

        let spans = aggregate_simple("", &tokens);
        let words: Vec<_> = spans.iter().map(|s| s.word.as_str()).collect();
        assert_eq!(words, vec!["İstanbul", "Ankara"]);
    }

    #[test]
    fn test_single_prefix_keeps_adjacent_entities_apart() {
        let text = "Paris London";
        let tokens = vec![
            token("S-LOC", "Paris", 0.9, Some((0, 5))),
            token("S-LOC", "London", 0.8, Some((6, 12))),
        ];

        let spans = aggregate_simple(text, &tokens);
        let words: Vec<_> = spans.iter().map(|s| s.word.as_str()).collect();
        assert_eq!(words, vec!["Paris", "London"]);
    }

    #[test]
    fn test_end_prefix_closes_group() {
        let text = "New York Boston";
        let tokens = vec![
            token("B-LOC", "New", 0.9, Some((0, 3))),
            token("E-LOC", "York", 0.9, Some((4, 8))),
            token("I-LOC", "Boston", 0.9, Some((9, 15))),
        ];

        let spans = aggregate_simple(text, &tokens);
        let words: Vec<_> = spans.iter().map(|s| s.word.as_str()).collect();
        assert_eq!(words, vec!["New York", "Boston"]);
    }

    #[test]
    fn test_outside_tokens_dropped_and_separate_groups() {
        let text = "Ali and Veli";
        let tokens = vec![
            token("I-PER", "Ali", 0.9, Some((0, 3))),
            token("O", "and", 0.99, Some((4, 7))),
            token("I-PER", "Veli", 0.7, Some((8, 12))),
        ];

        let spans = aggregate_simple(text, &tokens);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[1].word, "Veli");
        assert!(spans.iter().all(|s| s.entity_group == "PER"));
    }

    #[test]
    fn test_category_change_starts_new_group() {
        let tokens = vec![
            token("I-ORG", "Google", 0.9, None),
            token("I-LOC", "Ankara", 0.9, None),
        ];

        let spans = aggregate_simple("", &tokens);
        assert_eq!(spans[0].entity_group, "ORG");
        assert_eq!(spans[1].entity_group, "LOC");
    }

    #[test]
    fn test_char_offsets_on_non_ascii_text() {
        let text = "Dün İstanbul'a gittik";
        let tokens = vec![token("B-LOC", "İstanbul", 0.95, Some((4, 12)))];

        let spans = aggregate_simple(text, &tokens);
        assert_eq!(spans[0].word, "İstanbul");
    }

    #[test]
    fn test_split_label() {
        assert_eq!(split_label("B-PER"), (Some('B'), "PER"));
        assert_eq!(split_label("I-MISC"), (Some('I'), "MISC"));
        assert_eq!(split_label("LOC"), (None, "LOC"));
        assert_eq!(split_label("O"), (None, "O"));
    }

    #[test]
    fn test_split_chunks_at_whitespace() {
        let chunks = split_chunks("aaa bbb ccc", 7);
        assert_eq!(chunks, vec!["aaa", "bbb ccc"]);
    }

    #[test]
    fn test_split_chunks_short_and_empty() {
        assert_eq!(split_chunks("  short text ", 100), vec!["short text"]);
        assert!(split_chunks("   ", 100).is_empty());
    }

    #[test]
    fn test_split_chunks_respects_limit() {
        let text = "kelime ".repeat(500);
        let chunks = split_chunks(&text, 64);

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 64));
        assert_eq!(
            chunks.join(" ").split_whitespace().count(),
            text.split_whitespace().count()
        );
    }

    #[test]
    fn test_split_chunks_hard_cut_without_whitespace() {
        let chunks = split_chunks("abcdefghij", 4);
        assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
    }

    struct FakeTokens;

    #[async_trait]
    impl TokenClassifier for FakeTokens {
        async fn classify_tokens(&self, text: &str) -> hub::Result<Vec<RawToken>> {
            // tag every occurrence of "Ankara" as a location
            Ok(text
                .match_indices("Ankara")
                .map(|(i, w)| {
                    let start = text[..i].chars().count();
                    token("B-LOC", w, 0.9, Some((start, start + w.chars().count())))
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_recognizer_keeps_document_order_across_chunks() {
        let recognizer = AggregatingRecognizer::new(FakeTokens, "fake/ner", 16);
        let text = "Ankara is big. Then Ankara again. And Ankara.";

        let spans = recognizer.predict(text).await.unwrap();
        assert_eq!(spans.len(), 3);
        assert!(spans.iter().all(|s| s.word == "Ankara"));
        assert_eq!(recognizer.model_id(), "fake/ner");
    }

    #[tokio::test]
    async fn test_recognizer_empty_text() {
        let recognizer = AggregatingRecognizer::new(FakeTokens, "fake/ner", 16);
        assert!(recognizer.predict("  ").await.unwrap().is_empty());
    }
}
