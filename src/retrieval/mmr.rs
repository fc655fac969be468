//! Maximal Marginal Relevance selection

use std::cmp::Ordering;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
#[error("MMR lambda must be within [0, 1], got {0}")]
pub struct InvalidLambda(pub f32);

/// A candidate as seen by the selector
#[derive(Debug, Clone, PartialEq)]
pub struct RankedItem {
    pub fragment_id: String,
    /// Relevance to the query in [0, 1]
    pub relevance: f32,
}

impl RankedItem {
    pub fn new(fragment_id: impl Into<String>, relevance: f32) -> Self {
        Self {
            fragment_id: fragment_id.into(),
            relevance,
        }
    }
}

/// Greedy diversity-aware re-ranker
///
/// Each round picks the item maximizing
/// `lambda * relevance - (1 - lambda) * max similarity to already picked`.
/// `lambda = 1` is plain relevance order; `lambda = 0` ignores relevance
/// after the first pick and maximizes spread.
#[derive(Debug, Clone, Copy)]
pub struct MmrSelector {
    lambda: f32,
}

impl MmrSelector {
    pub const DEFAULT_LAMBDA: f32 = 0.6;

    pub fn new(lambda: f32) -> Result<Self, InvalidLambda> {
        if !(0.0..=1.0).contains(&lambda) {
            return Err(InvalidLambda(lambda));
        }
        Ok(Self { lambda })
    }

    pub fn lambda(&self) -> f32 {
        self.lambda
    }

    /// Pick `count` items from `pool`
    ///
    /// `similarity(a, b)` receives fragment IDs. A pool with fewer than
    /// `count` items is returned as is.
    pub fn select<F>(&self, pool: Vec<RankedItem>, count: usize, similarity: F) -> Vec<RankedItem>
    where
        F: Fn(&str, &str) -> f32,
    {
        if pool.len() < count {
            return pool;
        }

        let mut remaining = pool;
        // Highest similarity of each remaining item to anything selected so
        // far; None until the first pick
        let mut max_similarity: Vec<Option<f32>> = vec![None; remaining.len()];
        let mut selected: Vec<RankedItem> = Vec::with_capacity(count);

        while selected.len() < count && !remaining.is_empty() {
            let best = (0..remaining.len())
                .max_by(|&a, &b| self.compare(&remaining, &max_similarity, a, b))
                .unwrap_or(0);

            let picked = remaining.swap_remove(best);
            max_similarity.swap_remove(best);

            for (item, max_sim) in remaining.iter().zip(max_similarity.iter_mut()) {
                let sim = similarity(&item.fragment_id, &picked.fragment_id);
                *max_sim = Some(max_sim.map_or(sim, |current| current.max(sim)));
            }

            selected.push(picked);
        }

        selected
    }

    fn score(&self, item: &RankedItem, max_similarity: Option<f32>) -> f32 {
        self.lambda * item.relevance - (1.0 - self.lambda) * max_similarity.unwrap_or(0.0)
    }

    // Ordering where the greater item wins: MMR score, then relevance, then
    // the smaller fragment ID
    fn compare(
        &self,
        items: &[RankedItem],
        max_similarity: &[Option<f32>],
        a: usize,
        b: usize,
    ) -> Ordering {
        let (left, right) = (&items[a], &items[b]);
        self.score(left, max_similarity[a])
            .partial_cmp(&self.score(right, max_similarity[b]))
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                left.relevance
                    .partial_cmp(&right.relevance)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| right.fragment_id.cmp(&left.fragment_id))
    }
}

impl Default for MmrSelector {
    fn default() -> Self {
        Self {
            lambda: Self::DEFAULT_LAMBDA,
        }
    }
}
