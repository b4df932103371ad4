//! Content hashing for rulebooks and audit bundles.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Compute SHA256 hash of content, hex encoded.
pub fn compute_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Canonical JSON bytes of a value.
///
/// The value goes through `serde_json::Value` first so every object, typed
/// struct or not, serializes with sorted keys. A document read back from
/// disk therefore hashes the same as the value it was written from.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&serde_json::to_value(value)?)
}

/// Hash of a value's canonical JSON form.
pub fn hash_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    Ok(compute_hash(&canonical_json(value)?))
}
