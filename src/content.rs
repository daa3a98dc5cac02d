//! Content-addressed body storage.
//!
//! Bodies are keyed by the SHA-256 digest of the bytes actually stored,
//! so identical payloads share one entry regardless of how many metadata
//! records reference them. The store is format-agnostic; whether the bytes
//! were compressed is recorded in the metadata, not here.

use std::sync::Arc;

use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::backend::{CacheBackend, TierHint};
use crate::error::BackendError;
use crate::metadata::{ContentDigest, hex_encode};

#[derive(Clone)]
pub(crate) struct ContentStore {
    backend: Arc<dyn CacheBackend>,
    key_prefix: String,
}

impl ContentStore {
    pub(crate) fn new(backend: Arc<dyn CacheBackend>, key_prefix: String) -> Self {
        Self {
            backend,
            key_prefix,
        }
    }

    /// Writes `bytes` under their own digest and returns it. Two callers
    /// writing identical bytes share one entry.
    pub(crate) async fn put(&self, bytes: Bytes) -> Result<ContentDigest, BackendError> {
        let digest = digest_of(&bytes);
        self.backend
            .set(&self.key_for(&digest), bytes, TierHint::L2)
            .await?;
        Ok(digest)
    }

    pub(crate) async fn get(&self, digest: &ContentDigest) -> Result<Option<Bytes>, BackendError> {
        self.backend.get(&self.key_for(digest)).await
    }

    pub(crate) async fn remove(&self, digest: &ContentDigest) -> Result<(), BackendError> {
        self.backend.remove(&self.key_for(digest)).await
    }

    fn key_for(&self, digest: &ContentDigest) -> String {
        format!("{}{}", self.key_prefix, hex_encode(digest))
    }
}

/// SHA-256 over the stored bytes.
pub(crate) fn digest_of(bytes: &[u8]) -> ContentDigest {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}
