//! Vary-aware cache key construction.
//!
//! The key only partitions the namespace into buckets that are likely to
//! match; the stored record's own `Vary` data is re-checked at read time
//! via [`variant_matches`].

use std::collections::{BTreeMap, BTreeSet};

use http::{HeaderMap, Method, Uri};

use crate::config::CacheOptions;
use crate::metadata::ResponseMetadata;

/// Primary key: `method + ":" + absolute URI`.
pub fn primary_key(method: &Method, uri: &Uri) -> String {
    format!("{method}:{uri}")
}

/// Full cache key for a request.
///
/// Extends the primary key with `name:normalized_value` pairs for every
/// configured vary header, in configured order. A custom generator, when
/// installed, replaces this construction entirely.
pub fn vary_aware_key(
    options: &CacheOptions,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
) -> String {
    if let Some(generator) = options.cache_key_generator.as_deref() {
        return generator(method, uri, headers);
    }
    let mut key = primary_key(method, uri);
    key.push('|');
    for name in &options.vary_headers {
        let name = name.to_ascii_lowercase();
        key.push_str(&name);
        key.push(':');
        key.push_str(&normalized_header_value(headers, &name));
        key.push(';');
    }
    key
}

/// Normalized request value for one header name: each value trimmed and
/// stripped of internal whitespace, multiple values joined with a comma.
/// A missing header yields the empty string.
pub fn normalized_header_value(headers: &HeaderMap, name: &str) -> String {
    let mut parts = Vec::new();
    for value in headers.get_all(name) {
        if let Ok(s) = value.to_str() {
            parts.push(strip_whitespace(s.trim()));
        }
    }
    parts.join(",")
}

/// Captures the normalized request values for a response's `Vary` set, for
/// storage alongside the record. Names missing from the request map to the
/// empty string, so the captured keys always equal the declared names.
pub fn captured_vary_values(
    vary_names: &BTreeSet<String>,
    headers: &HeaderMap,
) -> BTreeMap<String, String> {
    vary_names
        .iter()
        .map(|name| (name.clone(), normalized_header_value(headers, name)))
        .collect()
}

/// Re-validates a stored record against an incoming request: every header
/// the response varied on must normalize to the value captured when the
/// record was stored.
pub fn variant_matches(record: &ResponseMetadata, headers: &HeaderMap) -> bool {
    record
        .vary_header_names
        .iter()
        .all(|name| match record.vary_header_values.get(name) {
            Some(stored) => normalized_header_value(headers, name) == *stored,
            None => false,
        })
}

fn strip_whitespace(value: &str) -> String {
    value.chars().filter(|c| !c.is_whitespace()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn uri() -> Uri {
        "https://example.com/data".parse().unwrap()
    }

    fn headers_with(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.append(
                http::header::HeaderName::try_from(*name).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        headers
    }

    #[test]
    fn primary_key_contains_method_and_uri() {
        assert_eq!(
            primary_key(&Method::GET, &uri()),
            "GET:https://example.com/data"
        );
    }

    #[test]
    fn differing_vary_values_produce_different_keys() {
        let options = CacheOptions::default();
        let a = vary_aware_key(
            &options,
            &Method::GET,
            &uri(),
            &headers_with(&[("accept", "application/json")]),
        );
        let b = vary_aware_key(
            &options,
            &Method::GET,
            &uri(),
            &headers_with(&[("accept", "application/xml")]),
        );
        assert_ne!(a, b);
    }

    #[test]
    fn name_case_and_internal_whitespace_do_not_split_keys() {
        let options = CacheOptions::default();
        let a = vary_aware_key(
            &options,
            &Method::GET,
            &uri(),
            &headers_with(&[("Accept-Language", "en-US, fr;q=0.8")]),
        );
        let b = vary_aware_key(
            &options,
            &Method::GET,
            &uri(),
            &headers_with(&[("accept-language", "en-US,fr;q=0.8")]),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn missing_header_yields_empty_value_not_absent_segment() {
        let options = CacheOptions::default();
        let with = vary_aware_key(
            &options,
            &Method::GET,
            &uri(),
            &headers_with(&[("accept", "text/html")]),
        );
        let without = vary_aware_key(&options, &Method::GET, &uri(), &HeaderMap::new());
        assert_ne!(with, without);
        assert!(without.contains("accept:;"));
    }

    #[test]
    fn multiple_values_join_with_comma() {
        let headers = headers_with(&[("accept", "text/html"), ("accept", "text/plain")]);
        assert_eq!(
            normalized_header_value(&headers, "accept"),
            "text/html,text/plain"
        );
    }

    #[test]
    fn custom_generator_replaces_construction() {
        let options = CacheOptions::default()
            .with_cache_key_generator(|method, uri, _| format!("custom:{method}:{uri}"));
        let key = vary_aware_key(&options, &Method::GET, &uri(), &HeaderMap::new());
        assert_eq!(key, "custom:GET:https://example.com/data");
    }

    #[test]
    fn captured_values_cover_every_declared_name() {
        let names: BTreeSet<String> = ["accept".to_string(), "accept-language".to_string()]
            .into_iter()
            .collect();
        let captured = captured_vary_values(&names, &headers_with(&[("accept", "text/html")]));
        assert_eq!(captured.len(), 2);
        assert_eq!(captured["accept"], "text/html");
        assert_eq!(captured["accept-language"], "");
    }
}
