//! Cross-process exclusive lock built on a create-if-absent marker file.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::{Result, StateError};

/// Lock marker with a bounded retry budget and fixed backoff.
///
/// No staleness detection: a marker left behind by a crashed holder blocks
/// every acquirer until removed by hand.
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
    retries: u32,
    wait: Duration,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>, retries: u32, wait: Duration) -> Self {
        Self {
            path: path.into(),
            retries: retries.max(1),
            wait,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the lock. The marker is removed when the guard drops.
    pub async fn acquire(&self) -> Result<LockGuard> {
        for attempt in 1..=self.retries {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
                .await
            {
                Ok(_) => {
                    return Ok(LockGuard {
                        path: self.path.clone(),
                        held: true,
                    })
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    tracing::debug!(
                        path = %self.path.display(),
                        attempt,
                        "State lock busy, retrying"
                    );
                    tokio::time::sleep(self.wait).await;
                }
                Err(e) => return Err(StateError::io(&self.path, e)),
            }
        }

        tracing::warn!(
            path = %self.path.display(),
            attempts = self.retries,
            "State lock retries exhausted"
        );
        Err(StateError::LockTimeout {
            path: self.path.clone(),
            attempts: self.retries,
        })
    }
}

/// Held lock. Release it with [`LockGuard::release`]; dropping it unreleased
/// removes the marker synchronously.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    held: bool,
}

impl LockGuard {
    /// Remove the marker without blocking the runtime.
    pub async fn release(mut self) {
        self.held = false;
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            log_release_failure(&self.path, e);
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        // Reached on early return or unwind; async removal is unavailable
        // here and a single unlink is short enough to block on.
        if let Err(e) = std::fs::remove_file(&self.path) {
            log_release_failure(&self.path, e);
        }
    }
}

fn log_release_failure(path: &Path, e: io::Error) {
    if e.kind() != io::ErrorKind::NotFound {
        tracing::warn!(path = %path.display(), error = %e, "Failed to release state lock");
    }
}
