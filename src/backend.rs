//! Backing key→bytes store contract and the in-process default.
//!
//! The cache engine proper (tiering, cross-process replication, eviction
//! policy) lives outside this crate; the pipeline only needs `get`, `set`,
//! and `remove`, all of which may fail without failing a request.

use std::num::NonZeroUsize;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;

use crate::error::BackendError;

/// Advisory placement hint for a write. `L1` is the fast in-process tier,
/// `L2` the cross-process tier; backends without tiers ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierHint {
    L1,
    L2,
}

/// Generic key→bytes store with value semantics.
#[async_trait]
pub trait CacheBackend: Send + Sync + 'static {
    /// Reads a value, `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, BackendError>;

    /// Writes a value. `tier` is advisory.
    async fn set(&self, key: &str, value: Bytes, tier: TierHint) -> Result<(), BackendError>;

    /// Removes a value; removing an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<(), BackendError>;
}

/// In-process LRU backend with a total byte cap.
///
/// Suitable for tests and single-process deployments; anything bigger
/// should plug in a real tiered cache engine.
pub struct MemoryBackend {
    inner: Mutex<MemoryInner>,
    max_bytes: u64,
}

struct MemoryInner {
    lru: LruCache<String, Bytes>,
    bytes_in_use: u64,
}

impl MemoryBackend {
    /// Creates a backend holding at most `capacity` entries and
    /// `max_bytes` total value bytes.
    pub fn new(capacity: usize, max_bytes: u64) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least one");
        Self {
            inner: Mutex::new(MemoryInner {
                lru: LruCache::new(capacity),
                bytes_in_use: 0,
            }),
            max_bytes,
        }
    }

    /// Number of live entries, for tests and introspection.
    pub fn len(&self) -> usize {
        self.inner.lock().lru.len()
    }

    /// `true` when the backend holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, BackendError> {
        Ok(self.inner.lock().lru.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Bytes, _tier: TierHint) -> Result<(), BackendError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        inner.bytes_in_use = inner.bytes_in_use.saturating_add(value.len() as u64);
        if let Some((_key, removed)) = inner.lru.push(key.to_string(), value) {
            inner.bytes_in_use = inner.bytes_in_use.saturating_sub(removed.len() as u64);
        }
        while inner.bytes_in_use > self.max_bytes {
            match inner.lru.pop_lru() {
                Some((_key, removed)) => {
                    inner.bytes_in_use = inner.bytes_in_use.saturating_sub(removed.len() as u64);
                }
                None => break,
            }
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), BackendError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if let Some(removed) = inner.lru.pop(key) {
            inner.bytes_in_use = inner.bytes_in_use.saturating_sub(removed.len() as u64);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_remove_round_trip() {
        let backend = MemoryBackend::new(8, 1024);
        backend
            .set("k", Bytes::from_static(b"v"), TierHint::L1)
            .await
            .unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(Bytes::from_static(b"v")));
        backend.remove("k").await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), None);
        // Removing again is not an error.
        backend.remove("k").await.unwrap();
    }

    #[tokio::test]
    async fn byte_cap_evicts_least_recently_used() {
        let backend = MemoryBackend::new(8, 6);
        backend
            .set("a", Bytes::from_static(b"aaaa"), TierHint::L1)
            .await
            .unwrap();
        backend
            .set("b", Bytes::from_static(b"bbbb"), TierHint::L1)
            .await
            .unwrap();
        assert_eq!(backend.get("a").await.unwrap(), None);
        assert!(backend.get("b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn replacing_a_key_releases_its_bytes() {
        let backend = MemoryBackend::new(8, 10);
        backend
            .set("a", Bytes::from_static(b"aaaaaaaa"), TierHint::L1)
            .await
            .unwrap();
        backend
            .set("a", Bytes::from_static(b"aa"), TierHint::L1)
            .await
            .unwrap();
        backend
            .set("b", Bytes::from_static(b"bbbbbbbb"), TierHint::L1)
            .await
            .unwrap();
        assert!(backend.get("a").await.unwrap().is_some());
        assert!(backend.get("b").await.unwrap().is_some());
    }
}
