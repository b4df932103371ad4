//! Audit bundles: content-addressed records of every decision.
//!
//! A bundle holds the event and the decision (with its audit hash still
//! pending). Its hash is the SHA-256 of the bundle's canonical JSON, and the
//! file is named after that hash.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use constitution::compute_hash;
use constitution::digest::canonical_json;

use crate::decision::Decision;
use crate::event::CanonicalEvent;
use crate::persist::write_atomic;

/// Error types for audit bundle handling.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Audit I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Audit serialization error: {0}")]
    Serialization(String),

    /// Stored bundle no longer matches its recorded hash
    #[error("Audit hash mismatch: recorded {recorded}, computed {computed}")]
    HashMismatch { recorded: String, computed: String },

    /// Writer refused the bundle
    #[error("Audit write rejected: {0}")]
    Rejected(String),
}

impl From<serde_json::Error> for AuditError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// What gets hashed and persisted for one decision.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AuditBundle<'a> {
    pub event: &'a CanonicalEvent,
    pub decision: &'a Decision,
}

impl AuditBundle<'_> {
    /// Content hash of this bundle.
    pub fn content_hash(&self) -> Result<String, AuditError> {
        Ok(compute_hash(&canonical_json(self)?))
    }
}

/// Where a bundle ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReceipt {
    pub audit_hash: String,
    pub audit_file: PathBuf,
}

/// Persists audit bundles.
#[async_trait]
pub trait AuditWriter: Send + Sync {
    /// Persist a bundle and return its content hash and location.
    async fn write(&self, bundle: AuditBundle<'_>) -> Result<AuditReceipt, AuditError>;
}

/// Writes each bundle as `<audit_dir>/<hash>.json`.
#[derive(Debug, Clone)]
pub struct FileAuditWriter {
    audit_dir: PathBuf,
}

/// On-disk shape of a bundle.
#[derive(Serialize)]
struct StoredBundle<'a> {
    audit_hash: &'a str,
    event: &'a CanonicalEvent,
    decision: &'a Decision,
}

impl FileAuditWriter {
    pub fn new(audit_dir: impl Into<PathBuf>) -> Self {
        Self {
            audit_dir: audit_dir.into(),
        }
    }

    pub fn audit_dir(&self) -> &Path {
        &self.audit_dir
    }

    /// Recompute a stored bundle's hash and compare it with the recorded one.
    pub async fn verify(audit_file: &Path) -> Result<String, AuditError> {
        let raw = tokio::fs::read_to_string(audit_file)
            .await
            .map_err(|e| AuditError::Io {
                path: audit_file.to_path_buf(),
                source: e,
            })?;
        let mut stored: Value = serde_json::from_str(&raw)?;

        let recorded = stored
            .as_object_mut()
            .and_then(|o| o.remove("audit_hash"))
            .and_then(|h| h.as_str().map(String::from))
            .ok_or_else(|| AuditError::Serialization("bundle has no audit_hash".to_string()))?;

        let computed = compute_hash(&canonical_json(&stored)?);
        if computed != recorded {
            return Err(AuditError::HashMismatch { recorded, computed });
        }
        Ok(recorded)
    }
}

#[async_trait]
impl AuditWriter for FileAuditWriter {
    async fn write(&self, bundle: AuditBundle<'_>) -> Result<AuditReceipt, AuditError> {
        let audit_hash = bundle.content_hash()?;

        tokio::fs::create_dir_all(&self.audit_dir)
            .await
            .map_err(|e| AuditError::Io {
                path: self.audit_dir.clone(),
                source: e,
            })?;

        let audit_file = self.audit_dir.join(format!("{audit_hash}.json"));
        let stored = StoredBundle {
            audit_hash: &audit_hash,
            event: bundle.event,
            decision: bundle.decision,
        };
        let mut body = serde_json::to_string_pretty(&stored)?;
        body.push('\n');

        write_atomic(&audit_file, body.as_bytes())
            .await
            .map_err(|e| AuditError::Io {
                path: audit_file.clone(),
                source: e,
            })?;

        tracing::debug!(audit_hash = %audit_hash, file = %audit_file.display(), "Audit bundle written");

        Ok(AuditReceipt {
            audit_hash,
            audit_file,
        })
    }
}
