//! Freshness arithmetic over cached metadata (RFC 9111 §4.2, RFC 5861).
//!
//! Pure functions of a record and an instant; the caller supplies "now"
//! from the injected clock.

use std::time::{Duration, SystemTime};

use crate::directives::CacheControl;
use crate::metadata::ResponseMetadata;

/// Best-effort estimate of the time elapsed since the response was
/// produced at the origin.
///
/// `max(age_on_arrival, cached_at - origin_date)` plus resident time, with
/// each subtraction floored at zero.
pub fn current_age(record: &ResponseMetadata, now: SystemTime) -> Duration {
    let apparent_age = record
        .origin_date
        .and_then(|origin| record.cached_at.duration_since(origin).ok())
        .unwrap_or(Duration::ZERO);
    let corrected_age = record.age_on_arrival.unwrap_or(Duration::ZERO).max(apparent_age);
    let resident = now.duration_since(record.cached_at).unwrap_or(Duration::ZERO);
    corrected_age + resident
}

/// How long the record may be served without validation, if bounded.
///
/// The stored `max_age` is already mode-selected (`s-maxage` folded in for
/// shared caches at store time), so precedence here is simply
/// `max_age` > `Expires` > `Last-Modified` heuristic.
pub fn freshness_lifetime(record: &ResponseMetadata, heuristic_percent: f64) -> Option<Duration> {
    if let Some(max_age) = record.max_age
        && max_age > Duration::ZERO
    {
        return Some(max_age);
    }
    if let Some(expires) = record.expires {
        let anchor = record.origin_date.unwrap_or(record.cached_at);
        return Some(expires.duration_since(anchor).unwrap_or(Duration::ZERO));
    }
    if let Some(last_modified) = record.last_modified
        && let Ok(since_modified) = record.cached_at.duration_since(last_modified)
        && since_modified > Duration::ZERO
    {
        return Some(since_modified.mul_f64(heuristic_percent.max(0.0)));
    }
    None
}

/// `true` when the record may be served without contacting the origin.
///
/// Requires a defined lifetime, an age inside it, and — when the request
/// carries `min-fresh` — at least that much remaining freshness.
pub fn is_fresh(
    record: &ResponseMetadata,
    request_cc: &CacheControl,
    heuristic_percent: f64,
    now: SystemTime,
) -> bool {
    let Some(lifetime) = freshness_lifetime(record, heuristic_percent) else {
        return false;
    };
    let age = current_age(record, now);
    if age >= lifetime {
        return false;
    }
    if let Some(min_fresh) = request_cc.min_fresh {
        let remaining = lifetime - age;
        if remaining < min_fresh {
            return false;
        }
    }
    true
}

/// `true` while staleness is still inside the `stale-while-revalidate`
/// window.
pub fn within_stale_while_revalidate(
    record: &ResponseMetadata,
    heuristic_percent: f64,
    now: SystemTime,
) -> bool {
    let Some(swr) = record.stale_while_revalidate else {
        return false;
    };
    let Some(lifetime) = freshness_lifetime(record, heuristic_percent) else {
        return false;
    };
    current_age(record, now).saturating_sub(lifetime) <= swr
}

/// `true` while staleness is still inside the `stale-if-error` window and
/// the response did not demand revalidation.
pub fn within_stale_if_error(
    record: &ResponseMetadata,
    heuristic_percent: f64,
    now: SystemTime,
) -> bool {
    let Some(sie) = record.stale_if_error else {
        return false;
    };
    if record.must_revalidate {
        return false;
    }
    let Some(lifetime) = freshness_lifetime(record, heuristic_percent) else {
        return false;
    };
    current_age(record, now).saturating_sub(lifetime) <= sie
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, StatusCode};
    use std::collections::{BTreeMap, BTreeSet};

    const PERCENT: f64 = 0.1;

    fn record_at(cached_at: SystemTime) -> ResponseMetadata {
        ResponseMetadata {
            status: StatusCode::OK,
            response_headers: HeaderMap::new(),
            content_headers: HeaderMap::new(),
            content_digest: [0u8; 32],
            content_length_stored: 0,
            is_compressed: false,
            cached_at,
            origin_date: None,
            expires: None,
            age_on_arrival: None,
            max_age: None,
            etag: None,
            last_modified: None,
            vary_header_names: BTreeSet::new(),
            vary_header_values: BTreeMap::new(),
            stale_while_revalidate: None,
            stale_if_error: None,
            must_revalidate: false,
            no_cache_in_response: false,
        }
    }

    fn base() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000)
    }

    #[test]
    fn age_combines_arrival_age_and_resident_time() {
        let mut record = record_at(base());
        record.age_on_arrival = Some(Duration::from_secs(10));
        record.origin_date = Some(base() - Duration::from_secs(4));
        let now = base() + Duration::from_secs(30);
        // arrival age (10) dominates the apparent age (4)
        assert_eq!(current_age(&record, now), Duration::from_secs(40));
    }

    #[test]
    fn age_uses_origin_date_when_it_dominates() {
        let mut record = record_at(base());
        record.origin_date = Some(base() - Duration::from_secs(25));
        let now = base() + Duration::from_secs(5);
        assert_eq!(current_age(&record, now), Duration::from_secs(30));
    }

    #[test]
    fn age_floors_negative_terms_at_zero() {
        let mut record = record_at(base());
        // Origin clock ahead of ours: apparent age would be negative.
        record.origin_date = Some(base() + Duration::from_secs(100));
        assert_eq!(current_age(&record, base()), Duration::ZERO);
    }

    #[test]
    fn lifetime_prefers_max_age_over_expires() {
        let mut record = record_at(base());
        record.max_age = Some(Duration::from_secs(60));
        record.expires = Some(base() + Duration::from_secs(600));
        assert_eq!(
            freshness_lifetime(&record, PERCENT),
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn lifetime_from_expires_is_anchored_at_origin_date() {
        let mut record = record_at(base());
        record.origin_date = Some(base() - Duration::from_secs(10));
        record.expires = Some(base() + Duration::from_secs(50));
        assert_eq!(
            freshness_lifetime(&record, PERCENT),
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn lifetime_from_past_expires_is_zero() {
        let mut record = record_at(base());
        record.expires = Some(base() - Duration::from_secs(50));
        assert_eq!(freshness_lifetime(&record, PERCENT), Some(Duration::ZERO));
    }

    #[test]
    fn heuristic_lifetime_scales_modification_age() {
        let mut record = record_at(base());
        record.last_modified = Some(base() - Duration::from_secs(1_000));
        assert_eq!(
            freshness_lifetime(&record, PERCENT),
            Some(Duration::from_secs(100))
        );
    }

    #[test]
    fn undefined_lifetime_is_never_fresh() {
        let record = record_at(base());
        assert_eq!(freshness_lifetime(&record, PERCENT), None);
        assert!(!is_fresh(&record, &CacheControl::default(), PERCENT, base()));
    }

    #[test]
    fn freshness_partitions_around_lifetime() {
        let mut record = record_at(base());
        record.max_age = Some(Duration::from_secs(60));
        let cc = CacheControl::default();
        assert!(is_fresh(&record, &cc, PERCENT, base() + Duration::from_secs(59)));
        assert!(!is_fresh(&record, &cc, PERCENT, base() + Duration::from_secs(60)));
    }

    #[test]
    fn min_fresh_rejects_nearly_stale_records() {
        let mut record = record_at(base());
        record.max_age = Some(Duration::from_secs(30));
        let mut cc = CacheControl::default();
        cc.min_fresh = Some(Duration::from_secs(30));
        // At +10s the remaining lifetime is 20s, below the requested 30s.
        assert!(!is_fresh(&record, &cc, PERCENT, base() + Duration::from_secs(10)));
        cc.min_fresh = Some(Duration::from_secs(15));
        assert!(is_fresh(&record, &cc, PERCENT, base() + Duration::from_secs(10)));
    }

    #[test]
    fn swr_window_extends_past_lifetime() {
        let mut record = record_at(base());
        record.max_age = Some(Duration::from_secs(1));
        record.stale_while_revalidate = Some(Duration::from_secs(5));
        assert!(within_stale_while_revalidate(
            &record,
            PERCENT,
            base() + Duration::from_secs(4)
        ));
        assert!(!within_stale_while_revalidate(
            &record,
            PERCENT,
            base() + Duration::from_secs(7)
        ));
    }

    #[test]
    fn sie_window_respects_must_revalidate() {
        let mut record = record_at(base());
        record.max_age = Some(Duration::from_secs(1));
        record.stale_if_error = Some(Duration::from_secs(10));
        let stale_now = base() + Duration::from_secs(5);
        assert!(within_stale_if_error(&record, PERCENT, stale_now));
        record.must_revalidate = true;
        assert!(!within_stale_if_error(&record, PERCENT, stale_now));
    }
}
