//! Fragment records: the atomic retrievable unit
//!
//! Fragments are produced by an external preprocessing stage (transcription,
//! speaker segmentation, chunking) and are immutable once built.

mod store;

pub use store::{FragmentStore, FragmentStoreError};

use crate::context::estimate_tokens;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FragmentError {
    #[error("Fragment is missing required field: {0}")]
    MissingField(&'static str),

    #[error("Fragment {fragment_id} has end_time {end} before start_time {start}")]
    InvalidTimeRange {
        fragment_id: String,
        start: f64,
        end: f64,
    },
}

/// A time-coded transcript fragment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    fragment_id: String,
    document_id: String,
    speaker_id: Option<String>,
    start_time: Option<f64>,
    end_time: Option<f64>,
    normalized_text: String,
    verbatim_text: String,
    token_count: usize,
    position_in_document: u32,
    source_path: String,
    metadata: Value,
}

impl Fragment {
    /// Start building a fragment from its required fields
    pub fn builder(
        fragment_id: impl Into<String>,
        document_id: impl Into<String>,
        normalized_text: impl Into<String>,
    ) -> FragmentBuilder {
        FragmentBuilder {
            fragment_id: fragment_id.into(),
            document_id: document_id.into(),
            normalized_text: normalized_text.into(),
            speaker_id: None,
            start_time: None,
            end_time: None,
            verbatim_text: None,
            token_count: None,
            position_in_document: 0,
            source_path: String::new(),
            metadata: Value::Null,
        }
    }

    pub fn fragment_id(&self) -> &str {
        &self.fragment_id
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn speaker_id(&self) -> Option<&str> {
        self.speaker_id.as_deref()
    }

    pub fn start_time(&self) -> Option<f64> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<f64> {
        self.end_time
    }

    pub fn normalized_text(&self) -> &str {
        &self.normalized_text
    }

    pub fn verbatim_text(&self) -> &str {
        &self.verbatim_text
    }

    pub fn token_count(&self) -> usize {
        self.token_count
    }

    pub fn position_in_document(&self) -> u32 {
        self.position_in_document
    }

    pub fn source_path(&self) -> &str {
        &self.source_path
    }

    pub fn metadata(&self) -> &Value {
        &self.metadata
    }

    /// BLAKE3 hash over every field except the id.
    ///
    /// Used to tell an idempotent re-ingestion apart from an attempt to
    /// mutate an existing fragment.
    pub fn content_hash(&self) -> String {
        fn optional_time(hasher: &mut blake3::Hasher, time: Option<f64>) {
            match time {
                Some(t) => hasher.update(&[1]).update(&t.to_bits().to_le_bytes()),
                None => hasher.update(&[0]),
            };
        }

        let mut hasher = blake3::Hasher::new();
        hasher.update(self.document_id.as_bytes());
        hasher.update(&[0]);
        hasher.update(&self.position_in_document.to_le_bytes());
        match &self.speaker_id {
            Some(speaker) => hasher.update(&[1]).update(speaker.as_bytes()).update(&[0]),
            None => hasher.update(&[0]),
        };
        optional_time(&mut hasher, self.start_time);
        optional_time(&mut hasher, self.end_time);
        hasher.update(&(self.token_count as u64).to_le_bytes());
        hasher.update(self.normalized_text.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.verbatim_text.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.source_path.as_bytes());
        hasher.update(&[0]);
        // serde_json maps are sorted, so equal values serialize identically
        hasher.update(self.metadata.to_string().as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

/// Builder for [`Fragment`] with constructor-level validation
#[derive(Debug, Clone)]
pub struct FragmentBuilder {
    fragment_id: String,
    document_id: String,
    normalized_text: String,
    speaker_id: Option<String>,
    start_time: Option<f64>,
    end_time: Option<f64>,
    verbatim_text: Option<String>,
    token_count: Option<usize>,
    position_in_document: u32,
    source_path: String,
    metadata: Value,
}

impl FragmentBuilder {
    pub fn speaker(mut self, speaker_id: impl Into<String>) -> Self {
        self.speaker_id = Some(speaker_id.into());
        self
    }

    pub fn maybe_speaker(mut self, speaker_id: Option<String>) -> Self {
        self.speaker_id = speaker_id;
        self
    }

    pub fn time_range(mut self, start: f64, end: f64) -> Self {
        self.start_time = Some(start);
        self.end_time = Some(end);
        self
    }

    pub fn start_time(mut self, start: Option<f64>) -> Self {
        self.start_time = start;
        self
    }

    pub fn end_time(mut self, end: Option<f64>) -> Self {
        self.end_time = end;
        self
    }

    pub fn verbatim(mut self, text: impl Into<String>) -> Self {
        self.verbatim_text = Some(text.into());
        self
    }

    pub fn token_count(mut self, count: usize) -> Self {
        self.token_count = Some(count);
        self
    }

    pub fn position(mut self, position: u32) -> Self {
        self.position_in_document = position;
        self
    }

    pub fn source_path(mut self, path: impl Into<String>) -> Self {
        self.source_path = path.into();
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn build(self) -> Result<Fragment, FragmentError> {
        if self.fragment_id.trim().is_empty() {
            return Err(FragmentError::MissingField("fragment_id"));
        }
        if self.document_id.trim().is_empty() {
            return Err(FragmentError::MissingField("document_id"));
        }
        if self.normalized_text.trim().is_empty() {
            return Err(FragmentError::MissingField("normalized_text"));
        }
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if end < start {
                return Err(FragmentError::InvalidTimeRange {
                    fragment_id: self.fragment_id,
                    start,
                    end,
                });
            }
        }

        let verbatim_text = self
            .verbatim_text
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| self.normalized_text.clone());
        let token_count = self
            .token_count
            .unwrap_or_else(|| estimate_tokens(&verbatim_text));

        Ok(Fragment {
            fragment_id: self.fragment_id,
            document_id: self.document_id,
            speaker_id: self.speaker_id.filter(|s| !s.trim().is_empty()),
            start_time: self.start_time,
            end_time: self.end_time,
            normalized_text: self.normalized_text,
            verbatim_text,
            token_count,
            position_in_document: self.position_in_document,
            source_path: self.source_path,
            metadata: self.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_minimal() {
        let fragment = Fragment::builder("f1", "doc1", "hello world").build().unwrap();

        assert_eq!(fragment.fragment_id(), "f1");
        assert_eq!(fragment.verbatim_text(), "hello world");
        assert_eq!(fragment.token_count(), 2);
        assert!(fragment.speaker_id().is_none());
        assert!(fragment.start_time().is_none());
    }

    #[test]
    fn test_missing_required_fields() {
        assert_eq!(
            Fragment::builder("", "doc1", "text").build().unwrap_err(),
            FragmentError::MissingField("fragment_id")
        );
        assert_eq!(
            Fragment::builder("f1", " ", "text").build().unwrap_err(),
            FragmentError::MissingField("document_id")
        );
        assert_eq!(
            Fragment::builder("f1", "doc1", "").build().unwrap_err(),
            FragmentError::MissingField("normalized_text")
        );
    }

    #[test]
    fn test_inverted_time_range_rejected() {
        let result = Fragment::builder("f1", "doc1", "text")
            .time_range(10.0, 5.0)
            .build();
        assert!(matches!(result, Err(FragmentError::InvalidTimeRange { .. })));
    }

    #[test]
    fn test_content_hash_tracks_text() {
        let a = Fragment::builder("f1", "doc1", "alpha").build().unwrap();
        let b = Fragment::builder("f1", "doc1", "alpha").build().unwrap();
        let c = Fragment::builder("f1", "doc1", "beta").build().unwrap();

        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), c.content_hash());
    }

    #[test]
    fn test_content_hash_covers_every_field() {
        let base = || {
            Fragment::builder("f1", "doc1", "alpha")
                .speaker("alice")
                .time_range(1.0, 2.0)
                .source_path("a.json")
                .metadata(serde_json::json!({"lang": "en", "conf": 0.9}))
        };
        let hash = base().build().unwrap().content_hash();

        let variants = [
            base().speaker("bob").build().unwrap(),
            base().maybe_speaker(None).build().unwrap(),
            base().time_range(1.0, 3.0).build().unwrap(),
            base().start_time(None).build().unwrap(),
            base().token_count(7).build().unwrap(),
            base().source_path("b.json").build().unwrap(),
            base().metadata(serde_json::json!({"lang": "de"})).build().unwrap(),
            base().verbatim("Alpha!").build().unwrap(),
        ];
        for variant in &variants {
            assert_ne!(variant.content_hash(), hash);
        }

        // Key order in metadata does not matter
        let reordered = base()
            .metadata(serde_json::json!({"conf": 0.9, "lang": "en"}))
            .build()
            .unwrap();
        assert_eq!(reordered.content_hash(), hash);
    }

    #[test]
    fn test_explicit_token_count_wins() {
        let fragment = Fragment::builder("f1", "doc1", "one two three")
            .token_count(40)
            .build()
            .unwrap();
        assert_eq!(fragment.token_count(), 40);
    }
}
