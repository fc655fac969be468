//! Storage layer for Earshot
//!
//! Persists the fragment store and both indexes in SQLite so a corpus can be
//! reloaded without re-tokenizing or re-embedding.

pub mod database;

use crate::corpus::Corpus;
use crate::embedding::{Bm25Params, KeywordIndex, VectorIndex, VectorIndexConfig};
use crate::error::{EarshotError, Result};
use crate::fragment::{Fragment, FragmentStore};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub use database::{decode_vector, encode_vector, Database, DbPool, DbStats, StoredEmbedding};

/// Storage manager for a data directory
pub struct StorageManager {
    pub database: Database,
    base_path: PathBuf,
}

impl StorageManager {
    /// Create a new storage manager
    ///
    /// Creates `<base_path>/store/` and opens `store/earshot.sqlite`.
    pub fn new(base_path: PathBuf) -> Result<Self> {
        let store_dir = base_path.join("store");
        std::fs::create_dir_all(&store_dir).map_err(|e| EarshotError::Io {
            source: e,
            context: format!("Failed to create store directory: {}", store_dir.display()),
        })?;

        let database = Database::new(&store_dir.join("earshot.sqlite"))?;

        Ok(Self {
            database,
            base_path,
        })
    }

    /// Directory holding the database
    pub fn store_dir(&self) -> PathBuf {
        self.base_path.join("store")
    }

    /// Persist fragments; identical re-saves are no-ops
    pub fn save_fragments<'a>(&self, fragments: impl IntoIterator<Item = &'a Fragment>) -> Result<usize> {
        let inserted = self.database.insert_fragments(fragments)?;
        info!("Saved {} new fragments", inserted);
        Ok(inserted)
    }

    /// Replace the stored postings and document lengths
    pub fn save_keyword_index(&self, index: &KeywordIndex) -> Result<()> {
        let (docs, postings) = self.database.replace_lexical(index.fragments(), index.postings())?;
        info!("Saved keyword index: {} fragments, {} postings", docs, postings);
        Ok(())
    }

    /// Replace the stored embeddings
    pub fn save_vector_index(&self, index: &VectorIndex, model: &str) -> Result<()> {
        let count = self.database.replace_embeddings(index.entries(), model)?;
        info!("Saved {} embeddings ({})", count, model);
        Ok(())
    }

    pub fn load_fragment_store(&self) -> Result<FragmentStore> {
        let mut store = FragmentStore::new();
        for fragment in self.database.load_fragments()? {
            store.insert(fragment)?;
        }
        Ok(store)
    }

    /// Rebuild a finalized keyword index from stored postings
    pub fn load_keyword_index(&self, params: Bm25Params) -> Result<KeywordIndex> {
        let (lengths, postings) = self.database.load_lexical()?;
        Ok(KeywordIndex::from_postings(params, lengths, postings)?)
    }

    /// Rebuild the vector index from stored embeddings
    pub fn load_vector_index(&self, config: VectorIndexConfig) -> Result<VectorIndex> {
        let stored = self.database.load_embeddings()?;
        let mut index = VectorIndex::new(config);

        if let Some(first) = stored.first() {
            if stored.iter().any(|e| e.model != first.model) {
                warn!("Stored embeddings come from more than one model");
            }
        }

        let (ids, vectors): (Vec<String>, Vec<Vec<f32>>) = stored
            .into_iter()
            .map(|e| (e.fragment_id, e.vector))
            .unzip();
        index.add_embeddings(&ids, &vectors)?;

        Ok(index)
    }

    /// Persist the whole corpus
    pub fn save_corpus(&self, corpus: &Corpus, model: &str) -> Result<()> {
        self.save_fragments(corpus.store.iter().map(|f| f.as_ref()))?;
        self.save_keyword_index(&corpus.keyword_index)?;
        self.save_vector_index(&corpus.vector_index, model)?;
        Ok(())
    }

    /// Reload a corpus saved with [`StorageManager::save_corpus`]
    pub fn load_corpus(&self, bm25: Bm25Params, vectors: VectorIndexConfig) -> Result<Corpus> {
        let corpus = Corpus {
            store: self.load_fragment_store()?,
            keyword_index: self.load_keyword_index(bm25)?,
            vector_index: self.load_vector_index(vectors)?,
        };

        info!(
            "Loaded corpus: {} fragments, {} embeddings",
            corpus.store.len(),
            corpus.vector_index.len()
        );
        Ok(corpus)
    }

    /// Get combined storage statistics
    pub fn stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            db: self.database.stats()?,
            store_size: Self::dir_size(&self.store_dir())?,
        })
    }

    /// Calculate directory size recursively
    fn dir_size(path: &Path) -> Result<u64> {
        let mut size = 0u64;

        if path.is_dir() {
            for entry in std::fs::read_dir(path).map_err(|e| EarshotError::Io {
                source: e,
                context: format!("Failed to read directory: {}", path.display()),
            })? {
                let entry = entry.map_err(|e| EarshotError::Io {
                    source: e,
                    context: "Failed to read directory entry".to_string(),
                })?;
                let path = entry.path();

                if path.is_dir() {
                    size += Self::dir_size(&path)?;
                } else {
                    size += entry
                        .metadata()
                        .map_err(|e| EarshotError::Io {
                            source: e,
                            context: format!("Failed to get file metadata: {}", path.display()),
                        })?
                        .len();
                }
            }
        }

        Ok(size)
    }
}

/// Combined storage statistics
#[derive(Debug)]
pub struct StorageStats {
    pub db: DbStats,
    pub store_size: u64,
}

impl StorageStats {
    /// Format size as human-readable string
    pub fn format_size(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fragment(id: &str, position: u32, text: &str) -> Fragment {
        Fragment::builder(id, "doc-1", text)
            .position(position)
            .build()
            .unwrap()
    }

    #[test]
    fn test_storage_manager_creation() {
        let temp_dir = TempDir::new().unwrap();
        let storage = StorageManager::new(temp_dir.path().to_path_buf()).unwrap();

        assert!(storage.store_dir().exists());
        assert!(storage.store_dir().join("earshot.sqlite").exists());
    }

    #[test]
    fn test_keyword_index_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let storage = StorageManager::new(temp_dir.path().to_path_buf()).unwrap();

        let fragments = vec![
            fragment("f1", 0, "the quarterly budget review"),
            fragment("f2", 1, "budget cuts for the design team"),
            fragment("f3", 2, "lunch plans"),
        ];
        let mut index = KeywordIndex::new();
        for f in &fragments {
            index.add_fragment(f.fragment_id(), f.normalized_text()).unwrap();
        }
        index.finalize();

        storage.save_fragments(&fragments).unwrap();
        storage.save_keyword_index(&index).unwrap();

        let reloaded = storage.load_keyword_index(Bm25Params::default()).unwrap();
        assert!(reloaded.is_finalized());
        assert_eq!(
            reloaded.search("budget design", 3).unwrap(),
            index.search("budget design", 3).unwrap()
        );
    }

    #[test]
    fn test_vector_index_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let storage = StorageManager::new(temp_dir.path().to_path_buf()).unwrap();

        let fragments = vec![fragment("f1", 0, "alpha"), fragment("f2", 1, "beta")];
        storage.save_fragments(&fragments).unwrap();

        let mut index = VectorIndex::with_dimension(3);
        index
            .add_embeddings(
                &["f1".to_string(), "f2".to_string()],
                &[vec![1.0, 0.0, 0.0], vec![0.0, 3.0, 4.0]],
            )
            .unwrap();
        storage.save_vector_index(&index, "test-model").unwrap();

        let reloaded = storage
            .load_vector_index(VectorIndexConfig::default())
            .unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.dimension(), Some(3));
        let (before, after) = (index.get("f2").unwrap(), reloaded.get("f2").unwrap());
        for (a, b) in before.iter().zip(after) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_stats() {
        let temp_dir = TempDir::new().unwrap();
        let storage = StorageManager::new(temp_dir.path().to_path_buf()).unwrap();
        storage
            .save_fragments(&[fragment("f1", 0, "alpha")])
            .unwrap();

        let stats = storage.stats().unwrap();
        assert_eq!(stats.db.fragment_count, 1);
        assert!(stats.store_size > 0);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(StorageStats::format_size(512), "512.00 B");
        assert_eq!(StorageStats::format_size(2048), "2.00 KB");
        assert_eq!(StorageStats::format_size(5 * 1024 * 1024), "5.00 MB");
    }
}
