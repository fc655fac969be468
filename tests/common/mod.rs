//! Shared fixtures for integration tests
#![allow(dead_code)]

use earshot::embedding::{BatchProcessor, EmbeddingError, EmbeddingProvider};
use earshot::fragment::Fragment;
use earshot::Corpus;
use std::sync::Arc;

pub const DIMENSION: usize = 256;

// Words mapped onto a shared dimension so paraphrases land close together
const CONCEPTS: &[&[&str]] = &[
    &["car", "cars", "automobile", "automobiles", "vehicle", "vehicles"],
    &["budget", "funding", "money", "spend", "spending"],
    &["launch", "release", "ship", "shipping", "rollout"],
    &["delay", "delayed", "postponed", "slip", "slipped"],
    &["hire", "hiring", "recruit", "recruiting", "headcount"],
    &["bug", "bugs", "defect", "defects", "regression"],
    &["weather", "rain", "storm", "forecast"],
    &["lunch", "food", "catering", "dinner"],
];

/// Deterministic embedder: synonyms share a dimension, other words hash
/// into the remaining ones
pub struct ConceptProvider;

impl ConceptProvider {
    fn bucket(word: &str) -> usize {
        for (i, group) in CONCEPTS.iter().enumerate() {
            if group.contains(&word) {
                return i;
            }
        }
        let hash = word
            .bytes()
            .fold(2166136261u32, |h, b| (h ^ b as u32).wrapping_mul(16777619));
        CONCEPTS.len() + hash as usize % (DIMENSION - CONCEPTS.len())
    }
}

impl EmbeddingProvider for ConceptProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0.0; DIMENSION];
        for raw in text.split_whitespace() {
            let word = raw
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if !word.is_empty() {
                vector[Self::bucket(&word)] += 1.0;
            }
        }
        if vector.iter().all(|v| *v == 0.0) {
            return Err(EmbeddingError::InvalidInput("no words".to_string()));
        }
        Ok(vector)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }

    fn model_name(&self) -> &str {
        "concept-test"
    }
}

/// Provider that is always down
pub struct UnavailableProvider;

impl EmbeddingProvider for UnavailableProvider {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Unavailable("service offline".to_string()))
    }

    fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::Unavailable("service offline".to_string()))
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }

    fn model_name(&self) -> &str {
        "unavailable"
    }
}

/// Provider returning vectors of the wrong size
pub struct WrongDimensionProvider;

impl EmbeddingProvider for WrongDimensionProvider {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(vec![1.0; DIMENSION / 2])
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|_| vec![1.0; DIMENSION / 2]).collect())
    }

    fn dimension(&self) -> usize {
        DIMENSION / 2
    }

    fn model_name(&self) -> &str {
        "wrong-dimension"
    }
}

pub fn concept_provider() -> Arc<dyn EmbeddingProvider> {
    Arc::new(ConceptProvider)
}

/// One timed fragment per sentence, 15 seconds apart
pub fn transcript(document_id: &str, speaker: &str, sentences: &[&str]) -> Vec<Fragment> {
    sentences
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let start = i as f64 * 15.0;
            Fragment::builder(format!("{}-{:03}", document_id, i), document_id, *text)
                .speaker(speaker)
                .time_range(start, start + 14.0)
                .position(i as u32)
                .source_path(format!("transcripts/{}.json", document_id))
                .build()
                .unwrap()
        })
        .collect()
}

pub const STANDUP: &[&str] = &[
    "Good morning everyone, let's get started with the weekly sync.",
    "The mobile launch slipped by two weeks because of the payment defects.",
    "Marketing asked whether the rollout date is final.",
    "We agreed to freeze new features until the regression suite is green.",
    "Finance approved extra funding for the automobile telemetry pilot.",
    "Catering for the offsite will be handled by the events team.",
    "Recruiting opened two backend positions this week.",
    "The forecast says heavy rain on Thursday so the outdoor demo moves inside.",
];

pub const PLANNING: &[&str] = &[
    "Quarterly planning starts with a review of last quarter's spending.",
    "Project Wurlitzer control structure was approved by the steering board.",
    "The vehicle fleet integration is blocked on vendor credentials.",
    "Headcount for next quarter stays flat.",
    "Design will share new onboarding mockups on Friday.",
    "Support tickets about login failures dropped by half.",
];

/// Ingest fragments into a fresh corpus
pub async fn build_corpus(
    fragments: Vec<Fragment>,
    provider: Option<Arc<dyn EmbeddingProvider>>,
) -> Corpus {
    let processor = BatchProcessor::new(provider, 4, 2);
    let mut corpus = Corpus::default();
    let result = processor.process(&mut corpus, fragments).await.unwrap();
    assert_eq!(result.failed, 0);
    corpus
}

/// Standup and planning transcripts together
pub fn meeting_fragments() -> Vec<Fragment> {
    let mut fragments = transcript("standup", "alice", STANDUP);
    fragments.extend(transcript("planning", "bob", PLANNING));
    fragments
}
