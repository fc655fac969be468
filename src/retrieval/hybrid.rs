//! Hybrid search combining lexical and semantic retrieval

use crate::context::{AssemblyError, ContextAssembler, EvidenceBlock};
use crate::embedding::{
    dot, normalize, tokenize, EmbeddingProvider, KeywordIndex, KeywordIndexError,
    KeywordSearchResult, VectorIndex, VectorSearchResult,
};
use crate::fragment::{Fragment, FragmentStore};
use crate::retrieval::{
    merge_candidates, Candidate, InvalidLambda, MmrSelector, RankedItem, RetrievalConfig,
    SearchQuery,
};
use ahash::{HashMap, HashMapExt, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error(transparent)]
    InvalidLambda(#[from] InvalidLambda),

    #[error("Keyword search failed: {0}")]
    KeywordSearch(#[from] KeywordIndexError),

    #[error("Context assembly failed: {0}")]
    Assembly(#[from] AssemblyError),

    #[error("Search task failed: {0}")]
    Task(String),
}

/// Merged, filtered candidates for one query, before selection
#[derive(Debug, Clone)]
pub struct CandidatePool {
    pub query_id: Uuid,
    pub candidates: Vec<Candidate>,
    /// Unit-length query embedding, when vector retrieval ran
    pub query_embedding: Option<Vec<f32>>,
    /// Vector retrieval was skipped because the provider was missing or failed
    pub degraded: bool,
}

/// Hybrid searcher combining lexical and semantic retrieval
///
/// Every component is shared read-only, so one searcher serves any number
/// of concurrent queries.
pub struct HybridSearcher {
    store: Arc<FragmentStore>,
    keyword_index: Arc<KeywordIndex>,
    vector_index: Arc<VectorIndex>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    selector: MmrSelector,
    assembler: ContextAssembler,
    config: RetrievalConfig,
}

impl HybridSearcher {
    /// Create a new hybrid searcher
    ///
    /// Fails if the keyword index has not been finalized or the MMR lambda
    /// is out of range.
    pub fn new(
        store: Arc<FragmentStore>,
        keyword_index: Arc<KeywordIndex>,
        vector_index: Arc<VectorIndex>,
        embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
        config: RetrievalConfig,
    ) -> Result<Self, SearchError> {
        if !keyword_index.is_finalized() {
            return Err(KeywordIndexError::NotFinalized.into());
        }

        let selector = MmrSelector::new(config.mmr_lambda)?;
        let assembler = ContextAssembler::new(config.assembler.clone());

        if embedding_provider.is_none() {
            info!("No embedding provider configured, searches will be lexical-only");
        }

        Ok(Self {
            store,
            keyword_index,
            vector_index,
            embedding_provider,
            selector,
            assembler,
            config,
        })
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn store(&self) -> &FragmentStore {
        &self.store
    }

    /// Run the full pipeline and return a cited evidence block
    ///
    /// An empty corpus or an empty candidate pool yields a block with no
    /// excerpts rather than an error.
    pub async fn search(&self, query: &SearchQuery) -> Result<EvidenceBlock, SearchError> {
        let query_id = Uuid::new_v4();
        let span = info_span!("search", %query_id);

        async move {
            let pool = self.collect_candidates(query_id, query).await?;
            let count = query.limit.unwrap_or(self.config.final_count);

            let selected = self.select(&pool, count);
            debug!("Selected {} of {} candidates", selected.len(), pool.candidates.len());

            let mut block = self
                .assembler
                .assemble(query_id, &query.text, &selected, &self.store)?;
            block.degraded = pool.degraded;

            info!(
                "Query answered with {} excerpts ({} tokens{})",
                block.excerpts.len(),
                block.total_tokens,
                if block.degraded { ", lexical-only" } else { "" }
            );

            Ok::<_, SearchError>(block)
        }
        .instrument(span)
        .await
    }

    /// Retrieve, merge and filter candidates without selecting or assembling
    pub async fn candidates(&self, query: &SearchQuery) -> Result<CandidatePool, SearchError> {
        let query_id = Uuid::new_v4();
        self.collect_candidates(query_id, query)
            .instrument(info_span!("candidates", %query_id))
            .await
    }

    async fn collect_candidates(
        &self,
        query_id: Uuid,
        query: &SearchQuery,
    ) -> Result<CandidatePool, SearchError> {
        if query.text.trim().is_empty() {
            return Err(SearchError::InvalidQuery(
                "Query text cannot be empty".to_string(),
            ));
        }

        let (query_embedding, degraded) = self.embed_query(&query.text).await;

        // Step 1: Parallel keyword + vector search
        let (keyword_results, vector_results) = tokio::join!(
            self.keyword_search(&query.text),
            self.vector_search(query_embedding.clone())
        );
        let keyword_results = keyword_results?;
        let (vector_results, vector_failed) = match vector_results {
            Ok(results) => (results, false),
            Err(reason) => {
                warn!("Vector search failed, continuing lexical-only: {}", reason);
                (Vec::new(), true)
            }
        };

        debug!(
            "Retrieved {} lexical and {} vector candidates",
            keyword_results.len(),
            vector_results.len()
        );

        // Step 2: Merge by summed score
        let mut candidates = merge_candidates(&keyword_results, &vector_results);

        // Step 3: Apply filters if specified
        let before = candidates.len();
        candidates.retain(|candidate| match self.store.get(candidate.fragment_id()) {
            Some(fragment) => query.matches(fragment),
            None => {
                warn!("Candidate {} missing from fragment store", candidate.fragment_id());
                false
            }
        });
        if candidates.len() != before {
            debug!("Filters kept {} of {} candidates", candidates.len(), before);
        }

        let query_embedding = if vector_failed {
            None
        } else {
            query_embedding.as_deref().and_then(normalize)
        };

        Ok(CandidatePool {
            query_id,
            candidates,
            query_embedding,
            degraded: degraded || vector_failed,
        })
    }

    /// Embed the query on the blocking pool
    ///
    /// Returns the embedding, if any, and whether the query is degraded to
    /// lexical-only because the provider is missing or failed.
    async fn embed_query(&self, text: &str) -> (Option<Vec<f32>>, bool) {
        let Some(provider) = self.embedding_provider.clone() else {
            return (None, true);
        };
        if self.vector_index.is_empty() {
            debug!("Vector index is empty, skipping query embedding");
            return (None, false);
        }

        let text = text.to_string();
        match tokio::task::spawn_blocking(move || provider.embed(&text)).await {
            Ok(Ok(embedding)) => (Some(embedding), false),
            Ok(Err(e)) => {
                warn!("Query embedding failed, falling back to lexical-only: {}", e);
                (None, true)
            }
            Err(e) => {
                warn!("Query embedding task failed, falling back to lexical-only: {}", e);
                (None, true)
            }
        }
    }

    async fn keyword_search(&self, text: &str) -> Result<Vec<KeywordSearchResult>, SearchError> {
        let keyword_index = Arc::clone(&self.keyword_index);
        let text = text.to_string();
        let top_k = self.config.lexical_top_k;

        let results = tokio::task::spawn_blocking(move || keyword_index.search(&text, top_k))
            .await
            .map_err(|e| SearchError::Task(e.to_string()))??;

        Ok(results)
    }

    async fn vector_search(
        &self,
        embedding: Option<Vec<f32>>,
    ) -> Result<Vec<VectorSearchResult>, String> {
        let Some(embedding) = embedding else {
            return Ok(Vec::new());
        };
        let vector_index = Arc::clone(&self.vector_index);
        let top_k = self.config.vector_top_k;

        tokio::task::spawn_blocking(move || vector_index.search(&embedding, top_k))
            .await
            .map_err(|e| e.to_string())?
            .map_err(|e| e.to_string())
    }

    /// MMR over the pool, returning fragments best-first
    fn select(&self, pool: &CandidatePool, count: usize) -> Vec<Arc<Fragment>> {
        if pool.candidates.is_empty() || count == 0 {
            return Vec::new();
        }

        let max_combined = pool
            .candidates
            .iter()
            .map(Candidate::combined_score)
            .fold(0.0f32, f32::max);

        let ranked: Vec<RankedItem> = pool
            .candidates
            .iter()
            .map(|candidate| {
                let relevance = match (&pool.query_embedding, self.vector_index.get(candidate.fragment_id())) {
                    (Some(query), Some(vector)) => dot(query, vector).clamp(0.0, 1.0),
                    _ if max_combined > 0.0 => {
                        (candidate.combined_score() / max_combined).clamp(0.0, 1.0)
                    }
                    _ => 0.0,
                };
                RankedItem::new(candidate.fragment_id(), relevance)
            })
            .collect();

        let token_sets = self.token_sets(&pool.candidates);
        let similarity = |a: &str, b: &str| -> f32 {
            match (self.vector_index.get(a), self.vector_index.get(b)) {
                (Some(x), Some(y)) => dot(x, y),
                _ => match (token_sets.get(a), token_sets.get(b)) {
                    (Some(x), Some(y)) => jaccard(x, y),
                    _ => 0.0,
                },
            }
        };

        self.selector
            .select(ranked, count, similarity)
            .into_iter()
            .filter_map(|item| self.store.get(&item.fragment_id).cloned())
            .collect()
    }

    // Every candidate needs a term set: a pair falls back to Jaccard as soon
    // as either side lacks a stored vector
    fn token_sets(&self, candidates: &[Candidate]) -> HashMap<String, HashSet<String>> {
        let mut sets = HashMap::new();
        for candidate in candidates {
            if let Some(fragment) = self.store.get(candidate.fragment_id()) {
                sets.insert(
                    candidate.fragment_id().to_string(),
                    tokenize(fragment.normalized_text()).into_iter().collect(),
                );
            }
        }
        sets
    }
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    let union = a.len() + b.len() - shared;
    shared as f32 / union as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(words: &[&str]) -> HashSet<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_jaccard() {
        assert_eq!(jaccard(&set(&["a", "b"]), &set(&["a", "b"])), 1.0);
        assert_eq!(jaccard(&set(&["a", "b"]), &set(&["b", "c"])), 1.0 / 3.0);
        assert_eq!(jaccard(&set(&["a"]), &set(&["b"])), 0.0);
        assert_eq!(jaccard(&set(&[]), &set(&[])), 0.0);
    }
}
