use crate::context::AssemblyError;
use crate::embedding::{EmbeddingError, KeywordIndexError, VectorIndexError};
use crate::fragment::{FragmentError, FragmentStoreError};
use crate::retrieval::SearchError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Earshot
#[derive(Error, Debug)]
pub enum EarshotError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// Fragment failed structural validation
    #[error(transparent)]
    Fragment(#[from] FragmentError),

    /// Fragment store rejected an operation
    #[error(transparent)]
    FragmentStore(#[from] FragmentStoreError),

    /// Lexical index errors
    #[error(transparent)]
    KeywordIndex(#[from] KeywordIndexError),

    /// Vector index errors
    #[error(transparent)]
    VectorIndex(#[from] VectorIndexError),

    /// Embedding provider errors
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    /// Query pipeline errors
    #[error(transparent)]
    Search(#[from] SearchError),

    /// Context assembly errors
    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    /// Persisted data could not be decoded
    #[error("Corrupt stored data: {0}")]
    Corrupt(String),

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for Earshot operations
pub type Result<T> = std::result::Result<T, EarshotError>;
