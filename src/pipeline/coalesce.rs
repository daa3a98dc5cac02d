//! Per-key single-flight coalescing of origin fetches.
//!
//! The first request to miss a key becomes the leader and runs the
//! fetch-and-store future; every concurrent request for the same key
//! awaits the same shared future and receives the same `Arc`'d outcome,
//! from which each builds its own response. Guarantees at most one
//! in-flight origin request per key per process.

use std::sync::Arc;

use dashmap::DashMap;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use crate::error::{CacheError, SharedError};

type SharedFetch<O> = Shared<BoxFuture<'static, Result<Arc<O>, SharedError>>>;

pub(crate) struct SingleFlight<O: Send + Sync + 'static> {
    inflight: DashMap<String, SharedFetch<O>>,
}

impl<O: Send + Sync + 'static> SingleFlight<O> {
    pub(crate) fn new() -> Self {
        Self {
            inflight: DashMap::new(),
        }
    }

    /// Runs `factory` for `key`, or joins an already in-flight run.
    /// Returns the shared outcome and whether this caller was the leader.
    pub(crate) async fn run<F>(&self, key: &str, factory: F) -> (Result<Arc<O>, SharedError>, bool)
    where
        F: Future<Output = Result<O, CacheError>> + Send + 'static,
    {
        // The map guard must not be held across an await.
        let (shared, leader) = match self.inflight.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => (occupied.get().clone(), false),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let shared = factory
                    .map(|result| {
                        result
                            .map(Arc::new)
                            .map_err(|err| SharedError(Arc::new(err)))
                    })
                    .boxed()
                    .shared();
                vacant.insert(shared.clone());
                (shared, true)
            }
        };

        let outcome = shared.await;
        if leader {
            self.inflight.remove(key);
        }
        (outcome, leader)
    }

    #[cfg(test)]
    pub(crate) fn inflight_len(&self) -> usize {
        self.inflight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn concurrent_callers_share_one_factory_run() {
        let flight = Arc::new(SingleFlight::<u64>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(tokio::sync::Notify::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flight = flight.clone();
            let calls = calls.clone();
            let gate = gate.clone();
            handles.push(tokio::spawn(async move {
                let (outcome, _) = flight
                    .run("k", async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        gate.notified().await;
                        Ok(42u64)
                    })
                    .await;
                *outcome.unwrap()
            }));
        }

        // Let every task reach the shared future before releasing it.
        tokio::task::yield_now().await;
        gate.notify_waiters();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flight.inflight_len(), 0);
    }

    #[tokio::test]
    async fn errors_fan_out_to_every_waiter() {
        let flight = SingleFlight::<u64>::new();
        let (outcome, leader) = flight
            .run("k", async { Err(CacheError::transport(anyhow::anyhow!("boom"))) })
            .await;
        assert!(leader);
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn sequential_runs_are_independent() {
        let flight = SingleFlight::<u64>::new();
        let (first, _) = flight.run("k", async { Ok(1u64) }).await;
        let (second, _) = flight.run("k", async { Ok(2u64) }).await;
        assert_eq!(*first.unwrap(), 1);
        assert_eq!(*second.unwrap(), 2);
    }
}
