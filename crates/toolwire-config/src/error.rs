//! Error types for configuration and persistence.

use thiserror::Error;

/// Failure writing or encoding the persisted documents.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure merging an externally supplied server document.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("Invalid server document: {0}")]
    Format(String),

    #[error("Server document contains no servers")]
    Empty,

    #[error("Merged servers could not be saved: {0}")]
    Persist(#[from] StoreError),
}

/// Errors from settings resolution.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file parse error at {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}
