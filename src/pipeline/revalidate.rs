//! Conditional revalidation: building `If-None-Match` / `If-Modified-Since`
//! requests and folding a `304 Not Modified` back into the stored record.

use std::time::SystemTime;

use http::header::{CACHE_CONTROL, DATE, EXPIRES, IF_MODIFIED_SINCE, IF_NONE_MATCH};
use http::{HeaderMap, HeaderValue, Request};

use super::RequestSnapshot;
use crate::body::Body;
use crate::config::CacheMode;
use crate::directives::{CacheControl, parse_age, parse_date_header};
use crate::metadata::ResponseMetadata;

/// Clones the original request and attaches the record's validator.
/// `If-None-Match` wins when both validators are present.
pub(crate) fn conditional_request(
    snapshot: &RequestSnapshot,
    record: &ResponseMetadata,
) -> Request<Body> {
    let mut request = snapshot.to_request();
    let headers = request.headers_mut();
    if let Some(etag) = &record.etag {
        if let Ok(value) = HeaderValue::from_str(etag) {
            headers.insert(IF_NONE_MATCH, value);
        }
    } else if let Some(last_modified) = record.last_modified
        && let Ok(value) = HeaderValue::from_str(&httpdate::fmt_http_date(last_modified))
    {
        headers.insert(IF_MODIFIED_SINCE, value);
    }
    request
}

/// Folds a `304 Not Modified` into the record.
///
/// Freshness inputs (`max_age`, RFC 5861 windows, `Expires`, `Date`, `Age`)
/// are refreshed from the 304 where the 304 provides them; `cached_at` is
/// re-anchored at the validation instant so the age restarts. The content
/// digest, validators, and vary data never change.
pub(crate) fn refresh_from_304(
    record: &mut ResponseMetadata,
    headers_304: &HeaderMap,
    mode: CacheMode,
    now: SystemTime,
) {
    if headers_304.contains_key(CACHE_CONTROL) {
        let cc = CacheControl::parse(headers_304);
        record.max_age = match mode {
            CacheMode::Shared => cc.shared_max_age.or(cc.max_age),
            CacheMode::Private => cc.max_age,
        };
        record.stale_while_revalidate = cc.stale_while_revalidate;
        record.stale_if_error = cc.stale_if_error;
        record.must_revalidate = cc.must_revalidate;
        record.no_cache_in_response = cc.no_cache;
    }
    if headers_304.contains_key(EXPIRES) {
        record.expires = parse_date_header(headers_304, EXPIRES);
    }
    if headers_304.contains_key(DATE) {
        record.origin_date = parse_date_header(headers_304, DATE);
    }
    record.age_on_arrival = parse_age(headers_304);
    record.cached_at = now;
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, StatusCode, Uri};
    use std::collections::{BTreeMap, BTreeSet};
    use std::time::Duration;

    fn snapshot() -> RequestSnapshot {
        let mut headers = HeaderMap::new();
        headers.insert("accept", HeaderValue::from_static("application/json"));
        RequestSnapshot {
            method: Method::GET,
            uri: Uri::from_static("https://example.com/data"),
            headers,
        }
    }

    fn record() -> ResponseMetadata {
        ResponseMetadata {
            status: StatusCode::OK,
            response_headers: HeaderMap::new(),
            content_headers: HeaderMap::new(),
            content_digest: [9u8; 32],
            content_length_stored: 3,
            is_compressed: false,
            cached_at: SystemTime::UNIX_EPOCH + Duration::from_secs(1_000),
            origin_date: None,
            expires: None,
            age_on_arrival: None,
            max_age: Some(Duration::from_secs(1)),
            etag: Some("\"v1\"".to_string()),
            last_modified: Some(SystemTime::UNIX_EPOCH),
            vary_header_names: BTreeSet::new(),
            vary_header_values: BTreeMap::new(),
            stale_while_revalidate: None,
            stale_if_error: None,
            must_revalidate: false,
            no_cache_in_response: false,
        }
    }

    #[test]
    fn etag_takes_precedence_over_last_modified() {
        let request = conditional_request(&snapshot(), &record());
        assert_eq!(
            request.headers().get(IF_NONE_MATCH).unwrap(),
            &HeaderValue::from_static("\"v1\"")
        );
        assert!(!request.headers().contains_key(IF_MODIFIED_SINCE));
        // Original request headers ride along.
        assert!(request.headers().contains_key("accept"));
    }

    #[test]
    fn last_modified_is_used_when_no_etag_exists() {
        let mut rec = record();
        rec.etag = None;
        let request = conditional_request(&snapshot(), &rec);
        assert_eq!(
            request.headers().get(IF_MODIFIED_SINCE).unwrap(),
            &HeaderValue::from_static("Thu, 01 Jan 1970 00:00:00 GMT")
        );
    }

    #[test]
    fn refresh_updates_freshness_and_reanchors_age() {
        let mut rec = record();
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=3600"));
        headers.insert("age", HeaderValue::from_static("7"));
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(5_000);

        refresh_from_304(&mut rec, &headers, CacheMode::Private, now);

        assert_eq!(rec.max_age, Some(Duration::from_secs(3600)));
        assert_eq!(rec.age_on_arrival, Some(Duration::from_secs(7)));
        assert_eq!(rec.cached_at, now);
        // Validators and content stay untouched.
        assert_eq!(rec.etag.as_deref(), Some("\"v1\""));
        assert_eq!(rec.content_digest, [9u8; 32]);
    }

    #[test]
    fn refresh_without_cache_control_keeps_prior_freshness() {
        let mut rec = record();
        rec.stale_while_revalidate = Some(Duration::from_secs(5));
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(5_000);
        refresh_from_304(&mut rec, &HeaderMap::new(), CacheMode::Private, now);
        assert_eq!(rec.max_age, Some(Duration::from_secs(1)));
        assert_eq!(rec.stale_while_revalidate, Some(Duration::from_secs(5)));
        assert_eq!(rec.cached_at, now);
    }

    #[test]
    fn shared_mode_prefers_s_maxage_from_the_304() {
        let mut rec = record();
        let mut headers = HeaderMap::new();
        headers.insert(
            CACHE_CONTROL,
            HeaderValue::from_static("max-age=10, s-maxage=100"),
        );
        refresh_from_304(&mut rec, &headers, CacheMode::Shared, SystemTime::UNIX_EPOCH);
        assert_eq!(rec.max_age, Some(Duration::from_secs(100)));
    }
}
