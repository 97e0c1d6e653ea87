//! Error types for Harvestr
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in Harvestr
#[derive(Debug, Error)]
pub enum HarvestrError {
    /// Job id not present in the catalog
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Catalog source could not be read or parsed
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Executor could not be resolved or started
    #[error("Executor error: {0}")]
    Executor(String),

    /// Storage/persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Filter expression could not be parsed
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// Invalid configuration value
    #[error("Config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// SQLite index error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type alias for Harvestr operations
pub type Result<T> = std::result::Result<T, HarvestrError>;
