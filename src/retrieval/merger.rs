//! Hybrid merge of lexical and vector result lists

use crate::embedding::{KeywordSearchResult, VectorSearchResult};
use crate::retrieval::Candidate;
use ahash::{HashMap, HashMapExt};
use std::cmp::Ordering;

/// Union two ranked lists into one candidate pool
///
/// A fragment found by both retrievers gets the sum of its two scores, which
/// rewards agreement; a fragment found by one keeps that score. The two
/// scales (unbounded BM25, cosine in [-1, 1]) are not calibrated against
/// each other, so the combined score is only meaningful for ranking.
///
/// # Returns
/// Candidates sorted by combined score descending, ties broken by fragment
/// ID ascending. Fragment IDs are unique.
pub fn merge_candidates(
    lexical: &[KeywordSearchResult],
    vector: &[VectorSearchResult],
) -> Vec<Candidate> {
    let mut pool: HashMap<String, Candidate> = HashMap::with_capacity(lexical.len() + vector.len());

    let hits = lexical
        .iter()
        .map(|r| Candidate::lexical(r.fragment_id.clone(), r.score))
        .chain(
            vector
                .iter()
                .map(|r| Candidate::vector(r.fragment_id.clone(), r.score)),
        );

    for hit in hits {
        match pool.get_mut(hit.fragment_id()) {
            Some(existing) => existing.absorb(hit),
            None => {
                pool.insert(hit.fragment_id().to_string(), hit);
            }
        }
    }

    let mut candidates: Vec<Candidate> = pool.into_values().collect();
    candidates.sort_by(|a, b| {
        b.combined_score()
            .partial_cmp(&a.combined_score())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.fragment_id().cmp(b.fragment_id()))
    });

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::Provenance;

    fn lex(id: &str, score: f32) -> KeywordSearchResult {
        KeywordSearchResult {
            fragment_id: id.to_string(),
            score,
        }
    }

    fn vec_hit(id: &str, score: f32) -> VectorSearchResult {
        VectorSearchResult {
            fragment_id: id.to_string(),
            score,
        }
    }

    #[test]
    fn test_union_and_sum() {
        let lexical = vec![lex("a", 3.0), lex("b", 2.0)];
        let vector = vec![vec_hit("b", 0.9), vec_hit("c", 0.8)];

        let merged = merge_candidates(&lexical, &vector);
        assert_eq!(merged.len(), 3);

        assert_eq!(merged[0].fragment_id(), "a");
        assert_eq!(merged[0].provenance(), Provenance::Lexical);
        assert_eq!(merged[0].combined_score(), 3.0);

        assert_eq!(merged[1].fragment_id(), "b");
        assert_eq!(merged[1].provenance(), Provenance::Both);
        assert!((merged[1].combined_score() - 2.9).abs() < 1e-6);

        assert_eq!(merged[2].fragment_id(), "c");
        assert_eq!(merged[2].provenance(), Provenance::Vector);
        assert_eq!(merged[2].combined_score(), 0.8);
    }

    #[test]
    fn test_agreement_outranks_single_list() {
        let lexical = vec![lex("solo", 1.0), lex("shared", 0.7)];
        let vector = vec![vec_hit("shared", 0.6)];

        let merged = merge_candidates(&lexical, &vector);
        assert_eq!(merged[0].fragment_id(), "shared");
    }

    #[test]
    fn test_vector_only_fragment_survives() {
        let lexical = vec![lex("x", 5.0), lex("y", 4.0)];
        let vector = vec![vec_hit("paraphrase", 0.4)];

        let merged = merge_candidates(&lexical, &vector);
        assert!(merged.iter().any(|c| c.fragment_id() == "paraphrase"));
    }

    #[test]
    fn test_ties_and_empty() {
        let merged = merge_candidates(&[lex("b", 1.0), lex("a", 1.0)], &[]);
        assert_eq!(merged[0].fragment_id(), "a");

        assert!(merge_candidates(&[], &[]).is_empty());
    }
}
