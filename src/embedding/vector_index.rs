/// Vector index for similarity search over normalized embeddings
use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};
use hnsw_rs::prelude::*;
use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;
use tracing::{debug, info};

// hnsw_rs caps the layer count at 16
const HNSW_MAX_LAYER: usize = 16;

#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Batch has {ids} fragment IDs but {vectors} vectors")]
    BatchLengthMismatch { ids: usize, vectors: usize },

    #[error("Vector for {0} has zero length or non-finite components")]
    InvalidVector(String),

    #[error("Fragment already has an embedding: {0}")]
    DuplicateFragment(String),

    #[error("Search failed: {0}")]
    SearchError(String),
}

/// Search result with fragment ID and cosine similarity
#[derive(Debug, Clone, PartialEq)]
pub struct VectorSearchResult {
    pub fragment_id: String,
    /// Cosine similarity (-1.0 to 1.0, higher is more similar)
    pub score: f32,
}

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndexConfig {
    /// Fixed dimension, or `None` to infer it from the first batch
    pub dimension: Option<usize>,
    /// Largest corpus searched exhaustively; above it an HNSW graph is used
    pub exact_search_threshold: usize,
    /// HNSW M parameter (number of connections per layer)
    pub hnsw_m: usize,
    /// HNSW construction parameter (higher = better recall, slower build)
    pub hnsw_ef_construction: usize,
    /// HNSW search parameter (higher = better recall, slower search)
    pub hnsw_ef_search: usize,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            dimension: None,
            exact_search_threshold: 20_000,
            hnsw_m: 16,
            hnsw_ef_construction: 200,
            hnsw_ef_search: 64,
        }
    }
}

/// L2-normalize a vector, or `None` if it has zero length or non-finite values
pub fn normalize(vector: &[f32]) -> Option<Vec<f32>> {
    if vector.iter().any(|x| !x.is_finite()) {
        return None;
    }
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }
    Some(vector.iter().map(|x| x / norm).collect())
}

/// Inner product; equals cosine similarity for normalized inputs
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Nearest-neighbor index over externally supplied embeddings
///
/// Vectors are L2-normalized on insert so inner product equals cosine
/// similarity. Small corpora are scanned exhaustively (exact). Once the
/// index grows past `exact_search_threshold`, an HNSW graph answers the
/// candidate search and the hits are re-scored exactly against the stored
/// vectors, so scores stay exact while recall becomes approximate.
pub struct VectorIndex {
    config: VectorIndexConfig,
    dimension: Option<usize>,
    ids: Vec<String>,
    slots: HashMap<String, usize>,
    // Row-major, `ids.len() * dimension` normalized components
    vectors: Vec<f32>,
    graph: Option<Hnsw<'static, f32, DistCosine>>,
}

impl VectorIndex {
    /// Create a new, empty vector index
    pub fn new(config: VectorIndexConfig) -> Self {
        Self {
            dimension: config.dimension,
            config,
            ids: Vec::new(),
            slots: HashMap::new(),
            vectors: Vec::new(),
            graph: None,
        }
    }

    /// Create an index with a fixed dimension and default search settings
    pub fn with_dimension(dimension: usize) -> Self {
        Self::new(VectorIndexConfig {
            dimension: Some(dimension),
            ..VectorIndexConfig::default()
        })
    }

    /// Add a batch of embeddings
    ///
    /// The whole batch is validated before anything is stored, so a rejected
    /// batch leaves previously stored vectors untouched.
    pub fn add_embeddings(
        &mut self,
        fragment_ids: &[String],
        vectors: &[Vec<f32>],
    ) -> Result<(), VectorIndexError> {
        if fragment_ids.len() != vectors.len() {
            return Err(VectorIndexError::BatchLengthMismatch {
                ids: fragment_ids.len(),
                vectors: vectors.len(),
            });
        }
        let Some(first) = vectors.first() else {
            return Ok(());
        };

        let expected = self.dimension.unwrap_or(first.len());
        let mut seen = HashSet::new();
        let mut normalized = Vec::with_capacity(vectors.len());

        for (id, vector) in fragment_ids.iter().zip(vectors) {
            if vector.len() != expected {
                return Err(VectorIndexError::InvalidDimension {
                    expected,
                    actual: vector.len(),
                });
            }
            if self.slots.contains_key(id) || !seen.insert(id.as_str()) {
                return Err(VectorIndexError::DuplicateFragment(id.clone()));
            }
            let unit = normalize(vector).ok_or_else(|| VectorIndexError::InvalidVector(id.clone()))?;
            normalized.push(unit);
        }

        self.dimension = Some(expected);
        let first_new_slot = self.ids.len();

        for (id, unit) in fragment_ids.iter().zip(normalized) {
            self.slots.insert(id.clone(), self.ids.len());
            self.ids.push(id.clone());
            self.vectors.extend_from_slice(&unit);
        }

        self.update_graph(first_new_slot);

        debug!(
            "Added {} embeddings ({} total, {}D)",
            fragment_ids.len(),
            self.ids.len(),
            expected
        );

        Ok(())
    }

    fn update_graph(&mut self, first_new_slot: usize) {
        if self.ids.len() <= self.config.exact_search_threshold {
            return;
        }

        let start = if self.graph.is_none() {
            info!(
                "Vector index exceeded {} entries, building HNSW graph",
                self.config.exact_search_threshold
            );
            self.graph = Some(Hnsw::<f32, DistCosine>::new(
                self.config.hnsw_m,
                (self.ids.len() * 2).max(self.config.exact_search_threshold * 2),
                HNSW_MAX_LAYER,
                self.config.hnsw_ef_construction,
                DistCosine,
            ));
            0
        } else {
            first_new_slot
        };

        if let Some(graph) = &self.graph {
            for slot in start..self.ids.len() {
                graph.insert((self.row(slot), slot));
            }
        }
    }

    fn row(&self, slot: usize) -> &[f32] {
        let dim = self.dimension.unwrap_or(0);
        &self.vectors[slot * dim..(slot + 1) * dim]
    }

    /// Search for the `top_k` most similar fragments
    ///
    /// # Returns
    /// Results sorted by cosine similarity descending, ties broken by
    /// fragment ID ascending
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorSearchResult>, VectorIndexError> {
        let Some(dim) = self.dimension else {
            return Ok(Vec::new());
        };
        if query.len() != dim {
            return Err(VectorIndexError::InvalidDimension {
                expected: dim,
                actual: query.len(),
            });
        }
        if top_k == 0 || self.ids.is_empty() {
            return Ok(Vec::new());
        }

        let query = normalize(query).ok_or_else(|| VectorIndexError::InvalidVector("query".into()))?;

        let mut scored: Vec<(usize, f32)> = match &self.graph {
            Some(graph) => {
                let ef = self.config.hnsw_ef_search.max(top_k);
                graph
                    .search(&query, top_k, ef)
                    .into_iter()
                    .filter(|neighbour| neighbour.d_id < self.ids.len())
                    .map(|neighbour| (neighbour.d_id, dot(&query, self.row(neighbour.d_id))))
                    .collect()
            }
            None => self.exact_scores(&query, dim)?,
        };

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| self.ids[a.0].cmp(&self.ids[b.0]))
        });
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(slot, score)| VectorSearchResult {
                fragment_id: self.ids[slot].clone(),
                score,
            })
            .collect())
    }

    fn exact_scores(&self, query: &[f32], dim: usize) -> Result<Vec<(usize, f32)>, VectorIndexError> {
        let matrix = ArrayView2::from_shape((self.ids.len(), dim), &self.vectors)
            .map_err(|e| VectorIndexError::SearchError(e.to_string()))?;
        let similarities = matrix.dot(&ArrayView1::from(query));

        Ok(similarities.iter().copied().enumerate().collect())
    }

    /// Stored (normalized) embedding for a fragment
    pub fn get(&self, fragment_id: &str) -> Option<&[f32]> {
        self.slots.get(fragment_id).map(|&slot| self.row(slot))
    }

    pub fn contains(&self, fragment_id: &str) -> bool {
        self.slots.contains_key(fragment_id)
    }

    /// All stored (fragment_id, normalized vector) pairs in insertion order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &[f32])> + '_ {
        self.ids
            .iter()
            .enumerate()
            .map(move |(slot, id)| (id.as_str(), self.row(slot)))
    }

    /// Whether searches go through the approximate HNSW graph
    pub fn is_approximate(&self) -> bool {
        self.graph.is_some()
    }

    /// Get the number of vectors in the index
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Check if index is empty
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Vector dimension, once fixed or inferred
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn config(&self) -> &VectorIndexConfig {
        &self.config
    }
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new(VectorIndexConfig::default())
    }
}
