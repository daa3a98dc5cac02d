//! Injected metrics sink.
//!
//! The pipeline reports exactly two counters, `cache.hits` and
//! `cache.misses`, through whatever sink is passed at construction. No
//! process-wide registry is touched unless the embedder wires one in.

use std::sync::atomic::{AtomicU64, Ordering};

use prometheus::{IntCounter, Opts, Registry};

/// Stable counter name: final decisions whose token starts with `HIT-`.
pub const CACHE_HITS: &str = "cache.hits";
/// Stable counter name: `MISS`, `MISS-REVALIDATED`, `MISS-CACHE-ERROR`,
/// and `MISS-ONLY-IF-CACHED` decisions.
pub const CACHE_MISSES: &str = "cache.misses";

/// Receiver for the two cache counters.
pub trait MetricsSink: Send + Sync + 'static {
    /// One more `cache.hits`.
    fn record_hit(&self);
    /// One more `cache.misses`.
    fn record_miss(&self);
}

/// Discards everything. The default sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_hit(&self) {}
    fn record_miss(&self) {}
}

/// Plain atomic counters, readable in-process.
#[derive(Debug, Default)]
pub struct AtomicMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl AtomicMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total `cache.hits` recorded so far.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Total `cache.misses` recorded so far.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl MetricsSink for AtomicMetrics {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }
}

/// Prometheus-backed sink registered on a caller-supplied registry.
///
/// Prometheus metric names cannot contain dots, so the counters surface as
/// `cache_hits` and `cache_misses`.
#[derive(Debug, Clone)]
pub struct PrometheusMetrics {
    hits: IntCounter,
    misses: IntCounter,
}

impl PrometheusMetrics {
    /// Creates the two counters and registers them on `registry`.
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let hits = IntCounter::with_opts(Opts::new(
            prometheus_name(CACHE_HITS),
            "Responses served from cache",
        ))?;
        let misses = IntCounter::with_opts(Opts::new(
            prometheus_name(CACHE_MISSES),
            "Requests that reached the origin or failed the cache",
        ))?;
        registry.register(Box::new(hits.clone()))?;
        registry.register(Box::new(misses.clone()))?;
        Ok(Self { hits, misses })
    }
}

impl MetricsSink for PrometheusMetrics {
    fn record_hit(&self) {
        self.hits.inc();
    }

    fn record_miss(&self) {
        self.misses.inc();
    }
}

fn prometheus_name(name: &str) -> String {
    name.replace('.', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_metrics_count_independently() {
        let metrics = AtomicMetrics::new();
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_miss();
        assert_eq!(metrics.hits(), 2);
        assert_eq!(metrics.misses(), 1);
    }

    #[test]
    fn prometheus_sink_registers_both_counters() {
        let registry = Registry::new();
        let metrics = PrometheusMetrics::new(&registry).unwrap();
        metrics.record_hit();
        metrics.record_miss();
        metrics.record_miss();
        let families = registry.gather();
        assert_eq!(families.len(), 2);
        let total: u64 = families
            .iter()
            .flat_map(|f| f.get_metric())
            .map(|m| m.get_counter().get_value() as u64)
            .sum();
        assert_eq!(total, 3);
    }
}
