//! Error types for the caching layer.
//!
//! Recoverable cache conditions (missing entries, backend failures) are
//! modelled as values, not errors: the pipeline degrades to origin traffic
//! when the backing store misbehaves. `CacheError` only carries failures
//! that must reach the caller.

use std::sync::Arc;

use thiserror::Error;

/// Failure surfaced to the caller of [`crate::HttpCache`].
#[derive(Debug, Error)]
pub enum CacheError {
    /// The lower transport failed. Surfaced unchanged; the cache never
    /// converts an origin failure into a different one.
    #[error("transport error: {0}")]
    Transport(#[source] anyhow::Error),

    /// A coalesced origin call failed; every waiter observes the same
    /// leader error through a shared handle.
    #[error(transparent)]
    Shared(SharedError),

    /// A stored body could not be decompressed. The entry is purged and the
    /// request retried against the origin before this is ever returned, so
    /// callers only see it if the retry path itself is unavailable.
    #[error("stored content is corrupt: {0}")]
    CorruptContent(String),
}

impl CacheError {
    /// Wraps an arbitrary transport failure.
    pub fn transport(err: impl Into<anyhow::Error>) -> Self {
        CacheError::Transport(err.into())
    }
}

/// Cheaply cloneable wrapper distributed to coalesced waiters when the
/// leader's origin call fails.
#[derive(Debug, Clone, Error)]
#[error(transparent)]
pub struct SharedError(pub Arc<CacheError>);

/// Failure reported by a [`crate::CacheBackend`] implementation.
///
/// The pipeline never propagates these to the caller: reads degrade to
/// misses, writes are skipped, removals are retried by natural expiry.
#[derive(Debug, Error)]
#[error("cache backend error: {0}")]
pub struct BackendError(#[from] pub anyhow::Error);

impl BackendError {
    /// Builds a backend error from a plain message.
    pub fn message(msg: impl Into<String>) -> Self {
        BackendError(anyhow::anyhow!(msg.into()))
    }
}
