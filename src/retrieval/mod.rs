//! Hybrid retrieval and diversity-aware selection
//!
//! Lexical and vector candidates are merged by summed score, filtered,
//! re-ranked with Maximal Marginal Relevance and handed to context assembly.

mod hybrid;
mod merger;
mod mmr;
mod provenance;

pub use hybrid::{CandidatePool, HybridSearcher, SearchError};
pub use merger::merge_candidates;
pub use mmr::{InvalidLambda, MmrSelector, RankedItem};
pub use provenance::{Candidate, Provenance};

use crate::context::AssemblerConfig;
use crate::fragment::Fragment;
use serde::{Deserialize, Serialize};

/// Search query with optional filters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Query text
    pub text: String,

    /// Number of excerpts to select; `None` uses the configured final count
    pub limit: Option<usize>,

    /// Optional document filter
    pub document_id: Option<String>,

    /// Optional speaker filter
    pub speaker_id: Option<String>,

    /// Optional time window in seconds; fragments must overlap it
    pub time_range: Option<(f64, f64)>,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            limit: None,
            document_id: None,
            speaker_id: None,
            time_range: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn in_document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    pub fn by_speaker(mut self, speaker_id: impl Into<String>) -> Self {
        self.speaker_id = Some(speaker_id.into());
        self
    }

    pub fn within(mut self, start: f64, end: f64) -> Self {
        self.time_range = Some((start, end));
        self
    }

    pub fn has_filters(&self) -> bool {
        self.document_id.is_some() || self.speaker_id.is_some() || self.time_range.is_some()
    }

    /// Whether a fragment passes every filter set on this query
    ///
    /// Untimed fragments never match a time window.
    pub fn matches(&self, fragment: &Fragment) -> bool {
        if let Some(document_id) = &self.document_id {
            if fragment.document_id() != document_id {
                return false;
            }
        }

        if let Some(speaker_id) = &self.speaker_id {
            if fragment.speaker_id() != Some(speaker_id.as_str()) {
                return false;
            }
        }

        if let Some((window_start, window_end)) = self.time_range {
            let (Some(start), Some(end)) = (fragment.start_time(), fragment.end_time()) else {
                return false;
            };
            if start > window_end || end < window_start {
                return false;
            }
        }

        true
    }
}

/// Runtime settings for the query pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Candidates requested from the lexical index
    pub lexical_top_k: usize,
    /// Candidates requested from the vector index
    pub vector_top_k: usize,
    /// Excerpts selected by MMR
    pub final_count: usize,
    /// MMR relevance/diversity trade-off
    pub mmr_lambda: f32,
    pub assembler: AssemblerConfig,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            lexical_top_k: 50,
            vector_top_k: 50,
            final_count: 8,
            mmr_lambda: MmrSelector::DEFAULT_LAMBDA,
            assembler: AssemblerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(speaker: &str, start: f64, end: f64) -> Fragment {
        Fragment::builder("f1", "meeting-7", "we reviewed the budget")
            .speaker(speaker)
            .time_range(start, end)
            .build()
            .unwrap()
    }

    #[test]
    fn test_filters() {
        let f = fragment("alice", 60.0, 75.0);

        assert!(SearchQuery::new("budget").matches(&f));
        assert!(SearchQuery::new("budget").in_document("meeting-7").matches(&f));
        assert!(!SearchQuery::new("budget").in_document("meeting-8").matches(&f));
        assert!(SearchQuery::new("budget").by_speaker("alice").matches(&f));
        assert!(!SearchQuery::new("budget").by_speaker("bob").matches(&f));
    }

    #[test]
    fn test_time_window_overlap() {
        let f = fragment("alice", 60.0, 75.0);

        assert!(SearchQuery::new("q").within(70.0, 120.0).matches(&f));
        assert!(SearchQuery::new("q").within(0.0, 60.0).matches(&f));
        assert!(!SearchQuery::new("q").within(76.0, 90.0).matches(&f));

        let untimed = Fragment::builder("f2", "meeting-7", "no timing").build().unwrap();
        assert!(!SearchQuery::new("q").within(0.0, 1000.0).matches(&untimed));
        assert!(SearchQuery::new("q").matches(&untimed));
    }
}
