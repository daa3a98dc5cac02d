//! RFC 9111 decision procedures: what to do with a request, and whether a
//! fresh origin response may be persisted.
//!
//! Both procedures are pure over their inputs; the pipeline executes
//! exactly one enumerated outcome.

use std::collections::BTreeSet;
use std::time::{Duration, SystemTime};

use http::header::AUTHORIZATION;
use http::{HeaderMap, Method, StatusCode};

use crate::config::{CacheMode, CacheOptions, media_type_matches};
use crate::directives::{CacheControl, Vary, has_pragma_no_cache};
use crate::freshness;
use crate::metadata::ResponseMetadata;

/// Per-request outcome. The pipeline executes exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Method is not GET/HEAD: forward, store nothing.
    BypassMethod,
    /// `Pragma: no-cache` on the request: forward, store nothing.
    BypassPragmaNoCache,
    /// `Cache-Control: no-store` on the request: forward, store nothing.
    BypassNoStore,
    /// `only-if-cached` and the record is servable.
    OnlyIfCachedHit,
    /// `only-if-cached` on an empty or stale bucket: synthesize `504`.
    OnlyIfCachedMiss,
    /// No usable record: contact the origin, store per storability.
    Miss,
    /// Record is fresh: serve it.
    HitFresh,
    /// Record is stale but inside the SWR window: serve it and revalidate
    /// in the background.
    HitStaleWhileRevalidate,
    /// Conditional revalidation against the origin.
    Revalidate {
        /// Whether a 5xx outcome may fall back to the stale record
        /// (`stale-if-error`). Forced revalidation — request `no-cache` /
        /// `max-age=0` or a stored `no-cache` response — never does.
        allow_stale_on_error: bool,
    },
}

/// Decides how to satisfy one request given the cached record, if any.
pub fn request_decision(
    options: &CacheOptions,
    method: &Method,
    request_headers: &HeaderMap,
    request_cc: &CacheControl,
    record: Option<&ResponseMetadata>,
    now: SystemTime,
) -> Decision {
    if method != Method::GET && method != Method::HEAD {
        return Decision::BypassMethod;
    }
    if has_pragma_no_cache(request_headers) {
        return Decision::BypassPragmaNoCache;
    }

    let percent = options.heuristic_freshness_percent;
    if request_cc.only_if_cached {
        let servable = record.is_some_and(|record| {
            freshness::is_fresh(record, request_cc, percent, now)
                || freshness::within_stale_while_revalidate(record, percent, now)
        });
        return if servable {
            Decision::OnlyIfCachedHit
        } else {
            Decision::OnlyIfCachedMiss
        };
    }

    if request_cc.no_store {
        return Decision::BypassNoStore;
    }

    let must_revalidate_this_request =
        request_cc.no_cache || request_cc.max_age == Some(Duration::ZERO);

    let Some(record) = record else {
        return Decision::Miss;
    };

    if must_revalidate_this_request || record.no_cache_in_response {
        return Decision::Revalidate {
            allow_stale_on_error: false,
        };
    }
    if freshness::is_fresh(record, request_cc, percent, now) {
        return Decision::HitFresh;
    }
    if freshness::within_stale_while_revalidate(record, percent, now) {
        return Decision::HitStaleWhileRevalidate;
    }
    Decision::Revalidate {
        allow_stale_on_error: true,
    }
}

/// Why a response was not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Method,
    Status,
    RequestNoStore,
    ResponseNoStore,
    VaryWildcard,
    TooLarge,
    ContentTypeNotCacheable,
    AuthorizationNotPermitted,
    NoCacheWithoutValidator,
    PrivateInSharedMode,
    NoFreshnessSignal,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::Method => "method",
            SkipReason::Status => "status",
            SkipReason::RequestNoStore => "request-no-store",
            SkipReason::ResponseNoStore => "response-no-store",
            SkipReason::VaryWildcard => "vary-wildcard",
            SkipReason::TooLarge => "too-large",
            SkipReason::ContentTypeNotCacheable => "content-type",
            SkipReason::AuthorizationNotPermitted => "authorization",
            SkipReason::NoCacheWithoutValidator => "no-cache-without-validator",
            SkipReason::PrivateInSharedMode => "private-in-shared-mode",
            SkipReason::NoFreshnessSignal => "no-freshness-signal",
        }
    }
}

/// Inputs the pipeline needs to build a metadata record for a storable
/// response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePlan {
    /// Mode-selected freshness to persist as the record's `max_age`.
    pub max_age: Option<Duration>,
    /// The stored record must revalidate on every read.
    pub no_cache_in_response: bool,
    /// Header names from the response's `Vary`.
    pub vary_names: BTreeSet<String>,
}

/// Whether a fresh-from-origin response may be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreDecision {
    Store(StorePlan),
    Skip(SkipReason),
}

impl StoreDecision {
    /// A `no-store` response also tears down whatever was cached at the
    /// same key.
    pub fn invalidates_existing(&self) -> bool {
        matches!(self, StoreDecision::Skip(SkipReason::ResponseNoStore))
    }
}

/// Response statuses eligible for storage at all.
fn status_is_cacheable(status: StatusCode) -> bool {
    matches!(
        status.as_u16(),
        200 | 203 | 204 | 300 | 301 | 302 | 308 | 404 | 410
    )
}

/// The storability predicate of RFC 9111 §3, mode-aware.
#[allow(clippy::too_many_arguments)]
pub fn storability(
    options: &CacheOptions,
    method: &Method,
    request_headers: &HeaderMap,
    request_cc: &CacheControl,
    status: StatusCode,
    response_headers: &HeaderMap,
    response_cc: &CacheControl,
    body_len: u64,
) -> StoreDecision {
    if method != Method::GET && method != Method::HEAD {
        return StoreDecision::Skip(SkipReason::Method);
    }
    if !status_is_cacheable(status) {
        return StoreDecision::Skip(SkipReason::Status);
    }
    if request_cc.no_store {
        return StoreDecision::Skip(SkipReason::RequestNoStore);
    }
    if response_cc.no_store {
        return StoreDecision::Skip(SkipReason::ResponseNoStore);
    }

    let vary = Vary::parse(response_headers);
    let vary_names = match vary {
        Vary::Wildcard => return StoreDecision::Skip(SkipReason::VaryWildcard),
        Vary::Headers(names) => names,
    };

    if let Some(limit) = options.max_cacheable_content_size
        && body_len > limit
    {
        return StoreDecision::Skip(SkipReason::TooLarge);
    }

    if let Some(allowed) = &options.cacheable_content_types {
        let content_type = response_headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !media_type_matches(allowed, content_type) {
            return StoreDecision::Skip(SkipReason::ContentTypeNotCacheable);
        }
    }

    if request_headers.contains_key(AUTHORIZATION) {
        let permitted = match options.mode {
            CacheMode::Shared => response_cc.public || response_cc.shared_max_age.is_some(),
            CacheMode::Private => response_cc.public || response_cc.private,
        };
        if !permitted {
            return StoreDecision::Skip(SkipReason::AuthorizationNotPermitted);
        }
    }

    let has_validator = response_headers.contains_key(http::header::ETAG)
        || response_headers.contains_key(http::header::LAST_MODIFIED);
    if response_cc.no_cache && !has_validator {
        return StoreDecision::Skip(SkipReason::NoCacheWithoutValidator);
    }

    if options.mode == CacheMode::Shared && response_cc.private {
        return StoreDecision::Skip(SkipReason::PrivateInSharedMode);
    }

    let selected_max_age = match options.mode {
        CacheMode::Shared => response_cc.shared_max_age.or(response_cc.max_age),
        CacheMode::Private => response_cc.max_age,
    };
    let has_explicit_freshness = selected_max_age.is_some()
        || response_headers.contains_key(http::header::EXPIRES);
    let persisted_max_age = if has_explicit_freshness {
        selected_max_age
    } else {
        options.default_cache_duration
    };

    let storable = selected_max_age.is_some_and(|d| d > Duration::ZERO)
        || response_headers.contains_key(http::header::EXPIRES)
        || response_headers.contains_key(http::header::LAST_MODIFIED)
        || (!has_explicit_freshness && options.default_cache_duration.is_some());
    if !storable {
        return StoreDecision::Skip(SkipReason::NoFreshnessSignal);
    }

    StoreDecision::Store(StorePlan {
        max_age: persisted_max_age,
        no_cache_in_response: response_cc.no_cache,
        vary_names,
    })
}
