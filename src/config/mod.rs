//! Configuration management for Earshot
//!
//! TOML file with one section per component, environment overrides of the
//! form `EARSHOT_SECTION__KEY=value`, and validation that reports every
//! problem at once.

use crate::context::AssemblerConfig;
use crate::corpus::Corpus;
use crate::embedding::{
    BatchProcessor, Bm25Params, EmbeddingProvider, FastEmbedProvider, VectorIndexConfig,
};
use crate::error::{EarshotError, Result};
use crate::retrieval::RetrievalConfig;
use crate::storage::StorageManager;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

mod validator;

pub use validator::ConfigValidator;

pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub indexing: IndexingConfig,
    pub retrieval: RetrievalSettings,
    pub context: AssemblerConfig,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub enabled: bool,
    pub model: String,
    pub batch_size: usize,
    pub max_concurrent: usize,
}

/// Indexing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// 0 infers the dimension from the first embedding batch
    pub vector_dim: usize,
    pub exact_search_threshold: usize,
    pub hnsw_m: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_ef_search: usize,
    pub bm25_k1: f32,
    pub bm25_b: f32,
}

/// Query pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalSettings {
    pub lexical_top_k: usize,
    pub vector_top_k: usize,
    pub final_count: usize,
    pub mmr_lambda: f32,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(EarshotError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| EarshotError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        // Apply environment variable overrides
        config.apply_env_overrides();

        // Validate configuration
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file, stamping `last_modified`
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.meta.last_modified = current_timestamp();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EarshotError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| EarshotError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: EARSHOT_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    fn apply_overrides(&mut self, vars: impl IntoIterator<Item = (String, String)>) {
        for (key, value) in vars {
            if let Some(config_key) = key.strip_prefix("EARSHOT_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__DATA_DIR" => self.storage.data_dir = PathBuf::from(value),
            "EMBEDDING__ENABLED" => self.embedding.enabled = parse(path, value)?,
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "EMBEDDING__BATCH_SIZE" => self.embedding.batch_size = parse(path, value)?,
            "EMBEDDING__MAX_CONCURRENT" => self.embedding.max_concurrent = parse(path, value)?,
            "INDEXING__VECTOR_DIM" => self.indexing.vector_dim = parse(path, value)?,
            "INDEXING__EXACT_SEARCH_THRESHOLD" => {
                self.indexing.exact_search_threshold = parse(path, value)?
            }
            "INDEXING__HNSW_EF_SEARCH" => self.indexing.hnsw_ef_search = parse(path, value)?,
            "INDEXING__BM25_K1" => self.indexing.bm25_k1 = parse(path, value)?,
            "INDEXING__BM25_B" => self.indexing.bm25_b = parse(path, value)?,
            "RETRIEVAL__LEXICAL_TOP_K" => self.retrieval.lexical_top_k = parse(path, value)?,
            "RETRIEVAL__VECTOR_TOP_K" => self.retrieval.vector_top_k = parse(path, value)?,
            "RETRIEVAL__FINAL_COUNT" => self.retrieval.final_count = parse(path, value)?,
            "RETRIEVAL__MMR_LAMBDA" => self.retrieval.mmr_lambda = parse(path, value)?,
            "CONTEXT__EXCERPT_TOKEN_CAP" => self.context.excerpt_token_cap = parse(path, value)?,
            "CONTEXT__TOTAL_TOKEN_BUDGET" => {
                self.context.total_token_budget = parse(path, value)?
            }
            "CONTEXT__RESERVED_ANSWER_TOKENS" => {
                self.context.reserved_answer_tokens = parse(path, value)?
            }
            "CONTEXT__EXPAND_NEIGHBORS" => self.context.expand_neighbors = parse(path, value)?,
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// BM25 parameters for the keyword index
    pub fn bm25_params(&self) -> Bm25Params {
        Bm25Params {
            k1: self.indexing.bm25_k1,
            b: self.indexing.bm25_b,
        }
    }

    /// Vector index settings
    pub fn vector_index_config(&self) -> VectorIndexConfig {
        VectorIndexConfig {
            dimension: (self.indexing.vector_dim > 0).then_some(self.indexing.vector_dim),
            exact_search_threshold: self.indexing.exact_search_threshold,
            hnsw_m: self.indexing.hnsw_m,
            hnsw_ef_construction: self.indexing.hnsw_ef_construction,
            hnsw_ef_search: self.indexing.hnsw_ef_search,
        }
    }

    /// Runtime view consumed by the hybrid searcher
    pub fn retrieval_config(&self) -> RetrievalConfig {
        RetrievalConfig {
            lexical_top_k: self.retrieval.lexical_top_k,
            vector_top_k: self.retrieval.vector_top_k,
            final_count: self.retrieval.final_count,
            mmr_lambda: self.retrieval.mmr_lambda,
            assembler: self.context.clone(),
        }
    }

    /// Open the storage under `storage.data_dir`
    pub fn storage_manager(&self) -> Result<StorageManager> {
        StorageManager::new(self.storage.data_dir.clone())
    }

    /// Build the configured embedding provider, or `None` when embedding is
    /// disabled
    ///
    /// Loads the model, so call once at startup. A fixed `indexing.vector_dim`
    /// must match the model's dimension.
    pub fn embedding_provider(&self) -> Result<Option<Arc<dyn EmbeddingProvider>>> {
        if !self.embedding.enabled {
            tracing::info!("Embedding disabled, running lexical-only");
            return Ok(None);
        }

        let provider = FastEmbedProvider::new(&self.embedding.model)?;
        let vector_dim = self.indexing.vector_dim;
        if vector_dim > 0 && vector_dim != provider.dimension() {
            return Err(EarshotError::InvalidConfigValue {
                path: "indexing.vector_dim".to_string(),
                message: format!(
                    "Model {} produces {} dimensions, config says {}",
                    self.embedding.model,
                    provider.dimension(),
                    vector_dim
                ),
            });
        }

        Ok(Some(Arc::new(provider)))
    }

    /// Batch processor using the embedding batch size and concurrency
    pub fn batch_processor(&self, provider: Option<Arc<dyn EmbeddingProvider>>) -> BatchProcessor {
        BatchProcessor::new(
            provider,
            self.embedding.batch_size,
            self.embedding.max_concurrent,
        )
    }

    /// Empty corpus with the configured index parameters
    pub fn corpus(&self) -> Corpus {
        Corpus::new(self.bm25_params(), self.vector_index_config())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| EarshotError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("earshot").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| EarshotError::Config("Cannot determine home directory".to_string()))?;

        Ok(home_dir.join(".earshot"))
    }
}

fn parse<T: FromStr>(path: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| EarshotError::InvalidConfigValue {
        path: path.to_string(),
        message: format!(
            "Cannot parse '{}' as {}",
            value,
            std::any::type_name::<T>()
        ),
    })
}

impl Default for Config {
    fn default() -> Self {
        let retrieval = RetrievalConfig::default();
        let vectors = VectorIndexConfig::default();
        let bm25 = Bm25Params::default();

        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: Self::default_data_dir().unwrap_or_else(|_| PathBuf::from(".earshot")),
            },
            embedding: EmbeddingConfig {
                enabled: true,
                model: "all-MiniLM-L6-v2".to_string(),
                batch_size: 32,
                max_concurrent: 4,
            },
            indexing: IndexingConfig {
                vector_dim: 0,
                exact_search_threshold: vectors.exact_search_threshold,
                hnsw_m: vectors.hnsw_m,
                hnsw_ef_construction: vectors.hnsw_ef_construction,
                hnsw_ef_search: vectors.hnsw_ef_search,
                bm25_k1: bm25.k1,
                bm25_b: bm25.b,
            },
            retrieval: RetrievalSettings {
                lexical_top_k: retrieval.lexical_top_k,
                vector_top_k: retrieval.vector_top_k,
                final_count: retrieval.final_count,
                mmr_lambda: retrieval.mmr_lambda,
            },
            context: retrieval.assembler,
        }
    }
}
