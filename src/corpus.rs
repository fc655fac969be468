//! The three ingestion targets kept side by side

use crate::embedding::{Bm25Params, EmbeddingProvider, KeywordIndex, VectorIndex, VectorIndexConfig};
use crate::fragment::FragmentStore;
use crate::retrieval::{HybridSearcher, RetrievalConfig, SearchError};
use std::sync::Arc;

/// Fragment store plus both indexes
///
/// Mutated only through `&mut` during ingestion; `into_searcher` freezes it
/// behind `Arc`s for concurrent queries.
#[derive(Default)]
pub struct Corpus {
    pub store: FragmentStore,
    pub keyword_index: KeywordIndex,
    pub vector_index: VectorIndex,
}

impl Corpus {
    pub fn new(bm25: Bm25Params, vectors: VectorIndexConfig) -> Self {
        Self {
            store: FragmentStore::new(),
            keyword_index: KeywordIndex::with_params(bm25),
            vector_index: VectorIndex::new(vectors),
        }
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Freeze the corpus and build a searcher over it
    pub fn into_searcher(
        self,
        provider: Option<Arc<dyn EmbeddingProvider>>,
        config: RetrievalConfig,
    ) -> Result<HybridSearcher, SearchError> {
        HybridSearcher::new(
            Arc::new(self.store),
            Arc::new(self.keyword_index),
            Arc::new(self.vector_index),
            provider,
            config,
        )
    }
}
