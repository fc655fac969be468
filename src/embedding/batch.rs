/// Batch ingestion into the fragment store and both indexes
use super::{check_batch, EmbeddingError, EmbeddingProvider};
use crate::corpus::Corpus;
use crate::error::Result;
use crate::fragment::Fragment;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Result of batch processing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    /// Fragments newly stored and lexically indexed
    pub processed: usize,
    /// Fragments identical to ones already stored
    pub skipped: usize,
    /// Fragments that received a vector
    pub embedded: usize,
    /// Fragments rejected by the store (changed content, position clash)
    pub failed: usize,
    /// Fragments left without a vector because their embedding batch failed
    pub embedding_failures: usize,
    pub duration_ms: u64,
}

type EmbeddedBatch = (usize, Vec<String>, std::result::Result<Vec<Vec<f32>>, EmbeddingError>);

/// Batch processor for ingestion
///
/// Lexical indexing happens inline. Embedding is batched, runs on the
/// blocking pool with at most `max_concurrent` batches in flight, and always
/// completes before the vector index is touched. A failed embedding batch is
/// logged and counted; its fragments stay lexically searchable.
pub struct BatchProcessor {
    provider: Option<Arc<dyn EmbeddingProvider>>,
    batch_size: usize,
    max_concurrent: usize,
}

impl BatchProcessor {
    /// Create a new batch processor
    ///
    /// # Arguments
    /// * `provider` - Embedding provider, or `None` for lexical-only ingestion
    /// * `batch_size` - Number of texts to embed in one call
    /// * `max_concurrent` - Maximum embedding batches in flight
    pub fn new(
        provider: Option<Arc<dyn EmbeddingProvider>>,
        batch_size: usize,
        max_concurrent: usize,
    ) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Ingest fragments and finalize the keyword index
    pub async fn process(&self, corpus: &mut Corpus, fragments: Vec<Fragment>) -> Result<BatchResult> {
        let start = std::time::Instant::now();
        let total = fragments.len();

        info!("Starting batch processing of {} fragments", total);

        let mut result = BatchResult::default();
        // (fragment_id, verbatim_text) of fragments still needing a vector
        let mut pending: Vec<(String, String)> = Vec::new();

        for fragment in fragments {
            let fragment_id = fragment.fragment_id().to_string();
            let normalized = fragment.normalized_text().to_string();
            let verbatim = fragment.verbatim_text().to_string();

            match corpus.store.insert(fragment) {
                Ok(true) => {
                    corpus.keyword_index.add_fragment(&fragment_id, &normalized)?;
                    result.processed += 1;
                    pending.push((fragment_id, verbatim));
                }
                Ok(false) => {
                    debug!("Fragment {} already stored, skipping", fragment_id);
                    result.skipped += 1;
                    if !corpus.vector_index.contains(&fragment_id) {
                        pending.push((fragment_id, verbatim));
                    }
                }
                Err(e) => {
                    warn!("Rejected fragment {}: {}", fragment_id, e);
                    result.failed += 1;
                }
            }
        }

        corpus.keyword_index.finalize();

        match &self.provider {
            Some(provider) if !pending.is_empty() => {
                self.embed_pending(provider, corpus, pending, &mut result).await?;
            }
            Some(_) => {}
            None => {
                debug!("No embedding provider, {} fragments indexed lexically only", pending.len());
            }
        }

        result.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Batch processing complete: {} processed, {} skipped, {} embedded, {} failed, {}ms",
            result.processed, result.skipped, result.embedded, result.failed, result.duration_ms
        );

        Ok(result)
    }

    async fn embed_pending(
        &self,
        provider: &Arc<dyn EmbeddingProvider>,
        corpus: &mut Corpus,
        pending: Vec<(String, String)>,
        result: &mut BatchResult,
    ) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks: JoinSet<EmbeddedBatch> = JoinSet::new();

        for (batch_no, chunk) in pending.chunks(self.batch_size).enumerate() {
            let (ids, texts): (Vec<String>, Vec<String>) = chunk.iter().cloned().unzip();
            let provider = Arc::clone(provider);
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(anyhow::Error::from)?;

            tasks.spawn(async move {
                let embedded = tokio::task::spawn_blocking(move || {
                    let embeddings = provider.embed_batch(&texts)?;
                    check_batch(texts.len(), provider.dimension(), &embeddings)?;
                    Ok::<_, EmbeddingError>(embeddings)
                })
                .await
                .unwrap_or_else(|e| Err(EmbeddingError::GenerationError(e.to_string())));
                drop(permit);
                (batch_no, ids, embedded)
            });
        }

        let mut batches = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(batch) => batches.push(batch),
                Err(e) => warn!("Embedding task failed to complete: {}", e),
            }
        }
        // Apply in submission order so slot layout does not depend on timing
        batches.sort_by_key(|(batch_no, _, _)| *batch_no);

        let submitted: usize = pending.len();
        let mut applied = 0;

        for (batch_no, ids, embedded) in batches {
            match embedded {
                Ok(vectors) => match corpus.vector_index.add_embeddings(&ids, &vectors) {
                    Ok(()) => {
                        result.embedded += ids.len();
                        applied += ids.len();
                    }
                    Err(e) => {
                        warn!("Vector index rejected batch {}: {}", batch_no, e);
                    }
                },
                Err(e) => {
                    warn!("Embedding batch {} ({} fragments) failed: {}", batch_no, ids.len(), e);
                }
            }
        }

        result.embedding_failures += submitted - applied;
        Ok(())
    }
}
