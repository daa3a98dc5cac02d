//! Background revalidation worker.
//!
//! Stale-while-revalidate hits enqueue a job and return immediately; a
//! dedicated worker task runs each job detached from the caller, so caller
//! cancellation never reaches a background fetch. The worker stops on
//! shutdown or once every handle to the cache is gone, draining jobs that
//! already started.

use std::sync::Weak;

use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::debug;

use super::{Inner, RequestSnapshot};
use crate::transport::Transport;

/// Queued background revalidation for one cache key.
#[derive(Debug)]
pub(crate) struct RevalidationJob {
    pub(crate) key: String,
    pub(crate) snapshot: RequestSnapshot,
}

/// Jobs waiting for the worker beyond this count are dropped; the stale
/// entry stays valid, so shedding load here is safe.
pub(crate) const REVALIDATION_QUEUE_DEPTH: usize = 64;

pub(crate) fn spawn_worker<T: Transport>(
    inner: Weak<Inner<T>>,
    mut rx: mpsc::Receiver<RevalidationJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut running = JoinSet::new();
        loop {
            tokio::select! {
                maybe_job = rx.recv() => {
                    let Some(job) = maybe_job else {
                        break;
                    };
                    // The worker holds only a weak handle; when the last
                    // cache handle is dropped the worker winds down instead
                    // of keeping the pipeline alive.
                    let Some(inner) = inner.upgrade() else {
                        break;
                    };
                    running.spawn(async move {
                        inner.run_background_revalidation(job).await;
                    });
                }
                _ = shutdown_rx.recv() => {
                    debug!("revalidation worker shutting down");
                    break;
                }
                Some(_) = running.join_next(), if !running.is_empty() => {}
            }
        }
        // Drain jobs that already started before reporting shutdown done.
        while running.join_next().await.is_some() {}
    })
}
