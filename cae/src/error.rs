//! Error types for the alignment engine.

use constitution::ConstitutionError;

use crate::audit::AuditError;
use crate::state::StateError;

/// Error types for CAE operations.
#[derive(Debug, thiserror::Error)]
pub enum CaeError {
    /// Event is missing required fields or carries unparsable values
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// Preflight request rejected before evaluation
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Agent state store failure
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Audit bundle could not be written
    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),

    /// Constitution or parameters document failure
    #[error("Constitution error: {0}")]
    Constitution(#[from] ConstitutionError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl CaeError {
    /// Only lock contention is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::State(e) if e.is_retryable())
    }
}

pub type Result<T> = std::result::Result<T, CaeError>;
