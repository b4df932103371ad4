//! Error types for the agent state store.

use std::path::PathBuf;

use constitution::ConstitutionError;

/// Error types for state store operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// A required argument was empty
    #[error("{operation} requires {argument}")]
    MissingArgument {
        operation: &'static str,
        argument: &'static str,
    },

    /// An argument was present but unusable
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Registry failed schema validation
    #[error("Invalid state: {location} {reason}")]
    InvalidState { location: String, reason: String },

    /// The lock marker could not be acquired within the retry budget
    #[error("State lock timeout after {attempts} attempts on {path}")]
    LockTimeout { path: PathBuf, attempts: u32 },

    /// Filesystem failure
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Registry or log line could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Parameters document failure
    #[error("Parameters error: {0}")]
    Parameters(#[from] ConstitutionError),
}

impl StateError {
    /// Lock contention is the only transient failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidState {
            location: location.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for StateError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StateError>;
