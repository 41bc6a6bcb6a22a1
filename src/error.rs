/// Error types shared by the configuration, storage, and query layers.
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reading configuration or touching the store.
#[derive(Error, Debug)]
pub enum LoreError {
    /// No configuration document exists yet. Recoverable by running `lore init`.
    #[error("no configuration found at {}", .0.display())]
    ConfigAbsent(PathBuf),

    #[error("source not found: {0}")]
    SourceNotFound(String),

    /// Stored vector width differs from the one in use. Never truncated or padded.
    #[error("embedding dimension mismatch: collection expects {expected}, got {found}")]
    SchemaMismatch { expected: usize, found: usize },

    /// Embedding with no direction: all zeros, NaN, or infinite components.
    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),

    #[error("unsupported reranking method: {0}")]
    UnsupportedFusionMethod(String),

    #[error("invalid configuration value for `{key}`: {reason}")]
    InvalidConfig { key: String, reason: String },

    #[error("invalid schema for collection `{collection}`: {reason}")]
    InvalidSchema { collection: String, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("metadata encode error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LoreError>;
