//! Cache configuration surface.
//!
//! All options are plain data with sensible defaults; wiring them from a
//! config file or CLI is the embedding application's concern.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::{HeaderMap, Method, Uri};

/// Default upper bound on stored body size: 10 MiB.
pub const DEFAULT_MAX_CACHEABLE_CONTENT_SIZE: u64 = 10 * 1024 * 1024;

/// Default minimum body size before storage compression kicks in.
pub const DEFAULT_COMPRESSION_THRESHOLD: u64 = 1024;

/// Default multiplier for heuristic freshness derived from `Last-Modified`.
pub const DEFAULT_HEURISTIC_FRESHNESS_PERCENT: f64 = 0.1;

/// Replacement for the built-in vary-aware key construction.
pub type KeyGenerator = dyn Fn(&Method, &Uri, &HeaderMap) -> String + Send + Sync;

/// Selects between private (browser-like) and shared (proxy-like)
/// storability rules from RFC 9111.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Single-user cache: `private` responses are storable, `s-maxage` is
    /// ignored.
    #[default]
    Private,
    /// Shared cache: `private` responses are rejected, `s-maxage` takes
    /// precedence over `max-age`.
    Shared,
}

/// Tunables for [`crate::HttpCache`].
#[derive(Clone)]
pub struct CacheOptions {
    /// Private vs shared storability rules.
    pub mode: CacheMode,
    /// Upper bound on stored body size; `None` disables the cap.
    pub max_cacheable_content_size: Option<u64>,
    /// Fallback freshness applied when a response carries no explicit
    /// freshness signal at all.
    pub default_cache_duration: Option<Duration>,
    /// Multiplier applied to `cached_at - last_modified` when heuristic
    /// freshness applies.
    pub heuristic_freshness_percent: f64,
    /// Minimum body size to trigger storage compression; `None` disables
    /// compression entirely.
    pub compression_threshold: Option<u64>,
    /// Media types eligible for storage compression. Entries are exact
    /// types or `type/*` prefixes.
    pub compressible_content_types: Vec<String>,
    /// When set, only responses whose media type matches are storable.
    pub cacheable_content_types: Option<Vec<String>>,
    /// Request headers folded into the cache key when no custom generator
    /// is supplied.
    pub vary_headers: Vec<String>,
    /// Opaque replacement for the default key construction.
    pub cache_key_generator: Option<Arc<KeyGenerator>>,
    /// Emit `X-Cache-*` headers on responses.
    pub include_diagnostic_headers: bool,
    /// Prefix applied to content-entry keys in the backing store.
    pub content_key_prefix: String,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            mode: CacheMode::Private,
            max_cacheable_content_size: Some(DEFAULT_MAX_CACHEABLE_CONTENT_SIZE),
            default_cache_duration: None,
            heuristic_freshness_percent: DEFAULT_HEURISTIC_FRESHNESS_PERCENT,
            compression_threshold: Some(DEFAULT_COMPRESSION_THRESHOLD),
            compressible_content_types: vec![
                "text/*".to_string(),
                "application/json".to_string(),
                "application/xml".to_string(),
                "application/javascript".to_string(),
                "application/xhtml+xml".to_string(),
            ],
            cacheable_content_types: None,
            vary_headers: vec![
                "accept".to_string(),
                "accept-encoding".to_string(),
                "accept-language".to_string(),
                "user-agent".to_string(),
            ],
            cache_key_generator: None,
            include_diagnostic_headers: false,
            content_key_prefix: "content/".to_string(),
        }
    }
}

impl CacheOptions {
    /// Switches to shared-cache storability rules.
    pub fn with_mode(mut self, mode: CacheMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets or disables the stored-body size cap.
    pub fn with_max_cacheable_content_size(mut self, limit: Option<u64>) -> Self {
        self.max_cacheable_content_size = limit;
        self
    }

    /// Sets the fallback freshness for responses without freshness signals.
    pub fn with_default_cache_duration(mut self, duration: Duration) -> Self {
        self.default_cache_duration = Some(duration);
        self
    }

    /// Sets the heuristic freshness multiplier.
    pub fn with_heuristic_freshness_percent(mut self, percent: f64) -> Self {
        self.heuristic_freshness_percent = percent;
        self
    }

    /// Sets or disables the compression threshold.
    pub fn with_compression_threshold(mut self, threshold: Option<u64>) -> Self {
        self.compression_threshold = threshold;
        self
    }

    /// Restricts caching to the given media types.
    pub fn with_cacheable_content_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cacheable_content_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    /// Replaces the vary-header set folded into cache keys.
    pub fn with_vary_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.vary_headers = headers
            .into_iter()
            .map(|h| h.into().to_ascii_lowercase())
            .collect();
        self
    }

    /// Installs a custom cache-key generator, replacing the vary-aware key
    /// construction entirely.
    pub fn with_cache_key_generator(
        mut self,
        generator: impl Fn(&Method, &Uri, &HeaderMap) -> String + Send + Sync + 'static,
    ) -> Self {
        self.cache_key_generator = Some(Arc::new(generator));
        self
    }

    /// Enables `X-Cache-*` diagnostic headers.
    pub fn with_diagnostic_headers(mut self) -> Self {
        self.include_diagnostic_headers = true;
        self
    }

    /// Sets the backing-store prefix for content entries.
    pub fn with_content_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.content_key_prefix = prefix.into();
        self
    }
}

impl fmt::Debug for CacheOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOptions")
            .field("mode", &self.mode)
            .field("max_cacheable_content_size", &self.max_cacheable_content_size)
            .field("default_cache_duration", &self.default_cache_duration)
            .field("heuristic_freshness_percent", &self.heuristic_freshness_percent)
            .field("compression_threshold", &self.compression_threshold)
            .field("compressible_content_types", &self.compressible_content_types)
            .field("cacheable_content_types", &self.cacheable_content_types)
            .field("vary_headers", &self.vary_headers)
            .field(
                "cache_key_generator",
                &self.cache_key_generator.as_ref().map(|_| "<custom>"),
            )
            .field("include_diagnostic_headers", &self.include_diagnostic_headers)
            .field("content_key_prefix", &self.content_key_prefix)
            .finish()
    }
}

/// Matches a media type against an allowlist of exact types or `type/*`
/// prefixes. The media type is compared without parameters and
/// case-insensitively.
pub(crate) fn media_type_matches(patterns: &[String], content_type: &str) -> bool {
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    patterns.iter().any(|pattern| {
        let pattern = pattern.trim().to_ascii_lowercase();
        if let Some(prefix) = pattern.strip_suffix("/*") {
            media_type
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'))
        } else {
            media_type == pattern
        }
    })
}
