//! Header parsing: `Cache-Control`, `Pragma`, `Age`, HTTP dates, `Vary`,
//! and validators.
//!
//! Parsing never fails. Malformed directives, unparseable dates, and bogus
//! durations all degrade to "absent" so a hostile origin cannot wedge the
//! cache with a weird header.

use std::collections::BTreeSet;
use std::time::{Duration, SystemTime};

use http::header::{AGE, CACHE_CONTROL, ETAG, PRAGMA, VARY};
use http::{HeaderMap, HeaderName};

/// Durations saturate at a 63-bit signed second count.
const MAX_DIRECTIVE_SECONDS: u64 = i64::MAX as u64;

/// Typed view of the `Cache-Control` header of a request or response.
///
/// Unrecognized directives are ignored; absent values stay `None`/`false`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub no_store: bool,
    pub no_cache: bool,
    pub private: bool,
    pub public: bool,
    pub must_revalidate: bool,
    pub only_if_cached: bool,
    pub max_age: Option<Duration>,
    pub min_fresh: Option<Duration>,
    pub max_stale: Option<Duration>,
    pub shared_max_age: Option<Duration>,
    pub stale_while_revalidate: Option<Duration>,
    pub stale_if_error: Option<Duration>,
}

impl CacheControl {
    /// Parses every `Cache-Control` header value in `headers`.
    pub fn parse(headers: &HeaderMap) -> Self {
        let mut cc = Self::default();
        for value in headers.get_all(CACHE_CONTROL) {
            let Ok(s) = value.to_str() else {
                continue;
            };
            for part in s.split(',') {
                let part = part.trim();
                if let Some((name, value)) = part.split_once('=') {
                    let name = name.trim();
                    let value = value.trim().trim_matches('"');
                    if name.eq_ignore_ascii_case("max-age") {
                        cc.max_age = parse_seconds(value);
                    } else if name.eq_ignore_ascii_case("s-maxage") {
                        cc.shared_max_age = parse_seconds(value);
                    } else if name.eq_ignore_ascii_case("min-fresh") {
                        cc.min_fresh = parse_seconds(value);
                    } else if name.eq_ignore_ascii_case("max-stale") {
                        cc.max_stale = parse_seconds(value);
                    } else if name.eq_ignore_ascii_case("stale-while-revalidate") {
                        cc.stale_while_revalidate = parse_seconds(value);
                    } else if name.eq_ignore_ascii_case("stale-if-error") {
                        cc.stale_if_error = parse_seconds(value);
                    }
                } else if part.eq_ignore_ascii_case("no-store") {
                    cc.no_store = true;
                } else if part.eq_ignore_ascii_case("no-cache") {
                    cc.no_cache = true;
                } else if part.eq_ignore_ascii_case("private") {
                    cc.private = true;
                } else if part.eq_ignore_ascii_case("public") {
                    cc.public = true;
                } else if part.eq_ignore_ascii_case("must-revalidate") {
                    cc.must_revalidate = true;
                } else if part.eq_ignore_ascii_case("only-if-cached") {
                    cc.only_if_cached = true;
                } else if part.eq_ignore_ascii_case("max-stale") {
                    // Valueless max-stale: any staleness is acceptable.
                    cc.max_stale = Some(Duration::from_secs(MAX_DIRECTIVE_SECONDS));
                }
            }
        }
        cc
    }
}

/// The `Vary` header of a response, reduced to the set of trimmed,
/// case-folded header names — or the wildcard marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Vary {
    /// Named headers (empty when the response has no `Vary` at all).
    Headers(BTreeSet<String>),
    /// `Vary: *` — the response is not cacheable.
    Wildcard,
}

impl Vary {
    /// Parses every `Vary` header value in `headers`.
    pub fn parse(headers: &HeaderMap) -> Self {
        let mut names = BTreeSet::new();
        for value in headers.get_all(VARY) {
            let Ok(s) = value.to_str() else {
                continue;
            };
            for name in s.split(',') {
                let name = name.trim();
                if name == "*" {
                    return Vary::Wildcard;
                }
                if !name.is_empty() {
                    names.insert(name.to_ascii_lowercase());
                }
            }
        }
        Vary::Headers(names)
    }

    /// Returns `true` for `Vary: *`.
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Vary::Wildcard)
    }
}

/// Parses the `Age` header as whole seconds; unparseable values are absent.
pub fn parse_age(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(AGE)?.to_str().ok()?;
    parse_seconds(raw.trim())
}

/// Parses an HTTP-date header (`Date`, `Expires`, `Last-Modified`) into an
/// absolute instant; unparseable values are absent.
pub fn parse_date_header(headers: &HeaderMap, name: HeaderName) -> Option<SystemTime> {
    let raw = headers.get(name)?.to_str().ok()?;
    httpdate::parse_http_date(raw).ok()
}

/// The entity tag, preserved verbatim including the weak indicator.
pub fn parse_etag(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// `true` when the request carries `Pragma: no-cache` (HTTP/1.0 clients).
pub fn has_pragma_no_cache(headers: &HeaderMap) -> bool {
    headers.get_all(PRAGMA).iter().any(|value| {
        value
            .to_str()
            .map(|s| {
                s.split(',')
                    .any(|part| part.trim().eq_ignore_ascii_case("no-cache"))
            })
            .unwrap_or(false)
    })
}

fn parse_seconds(raw: &str) -> Option<Duration> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // A digit string too long for u64 is still a valid duration; saturate.
    let secs = raw
        .parse::<u64>()
        .unwrap_or(MAX_DIRECTIVE_SECONDS)
        .min(MAX_DIRECTIVE_SECONDS);
    Some(Duration::from_secs(secs))
}
