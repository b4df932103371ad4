//! Error types for constitution and parameter documents.

use std::path::PathBuf;

/// Error types for rulebook operations.
#[derive(Debug, thiserror::Error)]
pub enum ConstitutionError {
    /// Document could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Document could not be parsed
    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// Two articles share an identifier
    #[error("Duplicate article id: {0}")]
    DuplicateArticle(String),

    /// Article declared without an identifier
    #[error("Article without article_id in title '{0}'")]
    MissingArticleId(String),

    /// Document could not be serialized for hashing
    #[error("Failed to serialize document: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Parameters are out of range
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
}

pub type Result<T> = std::result::Result<T, ConstitutionError>;
