//! Client-side HTTP caching layer implementing RFC 9111 with the RFC 5861
//! `stale-while-revalidate` and `stale-if-error` extensions.
//!
//! [`HttpCache`] sits between a caller and a lower HTTP transport. It stores
//! responses in a consumer-supplied [`CacheBackend`] (content-addressed body
//! storage plus serialized metadata records), serves fresh responses without
//! contacting the origin, revalidates stale ones with conditional requests,
//! and coalesces concurrent misses into a single origin call.
//!
//! The layer is a plain composition: it consumes anything implementing
//! [`Transport`] and implements [`Transport`] itself, so caching stacks with
//! other request decorators.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use staleguard::{CacheOptions, HttpCache, MemoryBackend};
//! # fn wire<T: staleguard::Transport>(transport: T) {
//! let backend = Arc::new(MemoryBackend::new(1024, 64 * 1024 * 1024));
//! let cache = HttpCache::new(transport, backend, CacheOptions::default());
//! # }
//! ```

pub mod backend;
pub mod body;
pub mod clock;
pub mod config;
pub mod diagnostics;
pub mod directives;
pub mod error;
pub mod freshness;
pub mod key;
pub mod metadata;
pub mod metrics;
pub mod pipeline;
pub mod policy;
pub mod transport;

mod content;

pub use backend::{CacheBackend, MemoryBackend, TierHint};
pub use body::Body;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheMode, CacheOptions};
pub use diagnostics::DiagnosticToken;
pub use directives::{CacheControl, Vary};
pub use error::{BackendError, CacheError};
pub use metadata::ResponseMetadata;
pub use metrics::{AtomicMetrics, MetricsSink, NoopMetrics, PrometheusMetrics};
pub use pipeline::HttpCache;
pub use transport::Transport;
