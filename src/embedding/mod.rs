/// Indexing: BM25 lexical index, vector index and batch ingestion
///
/// Architecture:
/// - EmbeddingProvider trait for abstraction (injected, never constructed here)
/// - FastEmbedProvider for local embedding (all-MiniLM-L6-v2, 384-dim)
/// - Exact cosine scan for small corpora, HNSW above a size threshold
/// - In-memory BM25 over normalized fragment text
/// - Batch processing for ingestion
mod batch;
mod keyword_index;
mod provider;
mod vector_index;

pub use batch::{BatchProcessor, BatchResult};
pub use keyword_index::{
    tokenize, Bm25Params, KeywordIndex, KeywordIndexError, KeywordSearchResult, Posting,
};
pub use provider::{check_batch, EmbeddingError, EmbeddingProvider, FastEmbedProvider};
pub use vector_index::{
    dot, normalize, VectorIndex, VectorIndexConfig, VectorIndexError, VectorSearchResult,
};
