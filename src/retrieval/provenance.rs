//! Candidate records and which retriever found them

use serde::{Deserialize, Serialize};

/// Which retrieval branch produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    Lexical,
    Vector,
    Both,
}

impl Provenance {
    pub fn found_by_lexical(self) -> bool {
        matches!(self, Provenance::Lexical | Provenance::Both)
    }

    pub fn found_by_vector(self) -> bool {
        matches!(self, Provenance::Vector | Provenance::Both)
    }
}

/// A query-scoped retrieval candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    fragment_id: String,
    combined_score: f32,
    provenance: Provenance,
    lexical_score: Option<f32>,
    vector_score: Option<f32>,
}

impl Candidate {
    /// Candidate found by BM25 search
    pub fn lexical(fragment_id: impl Into<String>, score: f32) -> Self {
        Self {
            fragment_id: fragment_id.into(),
            combined_score: score,
            provenance: Provenance::Lexical,
            lexical_score: Some(score),
            vector_score: None,
        }
    }

    /// Candidate found by vector search
    pub fn vector(fragment_id: impl Into<String>, score: f32) -> Self {
        Self {
            fragment_id: fragment_id.into(),
            combined_score: score,
            provenance: Provenance::Vector,
            lexical_score: None,
            vector_score: Some(score),
        }
    }

    /// Fold a vector hit for the same fragment into a lexical hit (or the
    /// reverse); the combined score is the plain sum of both.
    pub(crate) fn absorb(&mut self, other: Candidate) {
        debug_assert_eq!(self.fragment_id, other.fragment_id);
        self.lexical_score = self.lexical_score.or(other.lexical_score);
        self.vector_score = self.vector_score.or(other.vector_score);
        self.combined_score =
            self.lexical_score.unwrap_or(0.0) + self.vector_score.unwrap_or(0.0);
        self.provenance = match (self.lexical_score, self.vector_score) {
            (Some(_), Some(_)) => Provenance::Both,
            (None, Some(_)) => Provenance::Vector,
            _ => Provenance::Lexical,
        };
    }

    pub fn fragment_id(&self) -> &str {
        &self.fragment_id
    }

    /// Ordinal score: BM25 plus cosine, not a calibrated probability
    pub fn combined_score(&self) -> f32 {
        self.combined_score
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn lexical_score(&self) -> Option<f32> {
        self.lexical_score
    }

    pub fn vector_score(&self) -> Option<f32> {
        self.vector_score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absorb_sums_scores() {
        let mut candidate = Candidate::lexical("f1", 4.5);
        candidate.absorb(Candidate::vector("f1", 0.5));

        assert_eq!(candidate.provenance(), Provenance::Both);
        assert_eq!(candidate.combined_score(), 5.0);
        assert_eq!(candidate.lexical_score(), Some(4.5));
        assert_eq!(candidate.vector_score(), Some(0.5));
        assert!(candidate.provenance().found_by_lexical());
        assert!(candidate.provenance().found_by_vector());
    }
}
