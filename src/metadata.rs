//! Response metadata records and their persisted form.
//!
//! A record describes one cached response: status, headers split into
//! response and content groups, freshness inputs, validators, and the
//! SHA-256 digest of the stored body. Bodies are never embedded; content
//! entries live separately so identical bodies are stored once and can be
//! evicted independently.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};

use crate::backend::{CacheBackend, TierHint};
use crate::error::BackendError;

/// SHA-256 digest of the stored (possibly compressed) body bytes.
pub type ContentDigest = [u8; 32];

/// Runtime view of a cached response's metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseMetadata {
    pub status: StatusCode,
    /// Response headers other than the `content-*` group.
    pub response_headers: HeaderMap,
    /// `content-*` headers, replayed verbatim on cache hits.
    pub content_headers: HeaderMap,
    pub content_digest: ContentDigest,
    /// Stored size, after compression when `is_compressed`.
    pub content_length_stored: u64,
    pub is_compressed: bool,
    /// Instant the record was written (or last refreshed by a 304).
    pub cached_at: SystemTime,
    pub origin_date: Option<SystemTime>,
    pub expires: Option<SystemTime>,
    pub age_on_arrival: Option<Duration>,
    /// Mode-selected freshness: `s-maxage` in shared mode when present,
    /// otherwise `max-age`; the configured default when the response had
    /// no explicit freshness.
    pub max_age: Option<Duration>,
    pub etag: Option<String>,
    pub last_modified: Option<SystemTime>,
    /// Header names declared by the response's `Vary` (never `*`).
    pub vary_header_names: BTreeSet<String>,
    /// Normalized values of those headers as seen on the storing request.
    pub vary_header_values: BTreeMap<String, String>,
    pub stale_while_revalidate: Option<Duration>,
    pub stale_if_error: Option<Duration>,
    pub must_revalidate: bool,
    pub no_cache_in_response: bool,
}

impl ResponseMetadata {
    /// Merged header map served to the caller on a hit.
    pub fn merged_headers(&self) -> HeaderMap {
        let mut merged = self.response_headers.clone();
        for (name, value) in self.content_headers.iter() {
            merged.append(name, value.clone());
        }
        merged
    }

    /// `true` when a conditional request can be built from this record.
    pub fn has_validator(&self) -> bool {
        self.etag.is_some() || self.last_modified.is_some()
    }
}

/// Serialized form of [`ResponseMetadata`]. Instants are epoch
/// milliseconds, durations are seconds, digests are hex — every field of
/// the runtime record round-trips.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedMetadata {
    status: u16,
    response_headers: Vec<(String, String)>,
    content_headers: Vec<(String, String)>,
    content_digest: String,
    content_length_stored: u64,
    is_compressed: bool,
    cached_at_ms: u64,
    origin_date_ms: Option<u64>,
    expires_ms: Option<u64>,
    age_on_arrival_secs: Option<u64>,
    max_age_secs: Option<u64>,
    etag: Option<String>,
    last_modified_ms: Option<u64>,
    vary_header_names: Vec<String>,
    vary_header_values: Vec<(String, String)>,
    swr_secs: Option<u64>,
    sie_secs: Option<u64>,
    must_revalidate: bool,
    no_cache_in_response: bool,
}

impl PersistedMetadata {
    fn from_metadata(record: &ResponseMetadata) -> Self {
        Self {
            status: record.status.as_u16(),
            response_headers: headermap_to_vec(&record.response_headers),
            content_headers: headermap_to_vec(&record.content_headers),
            content_digest: hex_encode(&record.content_digest),
            content_length_stored: record.content_length_stored,
            is_compressed: record.is_compressed,
            cached_at_ms: epoch_millis(record.cached_at),
            origin_date_ms: record.origin_date.map(epoch_millis),
            expires_ms: record.expires.map(epoch_millis),
            age_on_arrival_secs: record.age_on_arrival.map(|d| d.as_secs()),
            max_age_secs: record.max_age.map(|d| d.as_secs()),
            etag: record.etag.clone(),
            last_modified_ms: record.last_modified.map(epoch_millis),
            vary_header_names: record.vary_header_names.iter().cloned().collect(),
            vary_header_values: record
                .vary_header_values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            swr_secs: record.stale_while_revalidate.map(|d| d.as_secs()),
            sie_secs: record.stale_if_error.map(|d| d.as_secs()),
            must_revalidate: record.must_revalidate,
            no_cache_in_response: record.no_cache_in_response,
        }
    }

    fn into_metadata(self) -> Result<ResponseMetadata, BackendError> {
        let digest = hex_decode(&self.content_digest)
            .ok_or_else(|| BackendError::message("metadata record has a malformed digest"))?;
        Ok(ResponseMetadata {
            status: StatusCode::from_u16(self.status)
                .map_err(|_| BackendError::message("metadata record has an invalid status"))?,
            response_headers: to_headermap(&self.response_headers),
            content_headers: to_headermap(&self.content_headers),
            content_digest: digest,
            content_length_stored: self.content_length_stored,
            is_compressed: self.is_compressed,
            cached_at: from_epoch_millis(self.cached_at_ms),
            origin_date: self.origin_date_ms.map(from_epoch_millis),
            expires: self.expires_ms.map(from_epoch_millis),
            age_on_arrival: self.age_on_arrival_secs.map(Duration::from_secs),
            max_age: self.max_age_secs.map(Duration::from_secs),
            etag: self.etag,
            last_modified: self.last_modified_ms.map(from_epoch_millis),
            vary_header_names: self.vary_header_names.into_iter().collect(),
            vary_header_values: self.vary_header_values.into_iter().collect(),
            stale_while_revalidate: self.swr_secs.map(Duration::from_secs),
            stale_if_error: self.sie_secs.map(Duration::from_secs),
            must_revalidate: self.must_revalidate,
            no_cache_in_response: self.no_cache_in_response,
        })
    }
}

/// Metadata persistence keyed by vary-aware cache keys.
#[derive(Clone)]
pub(crate) struct MetadataStore {
    backend: Arc<dyn CacheBackend>,
}

impl MetadataStore {
    pub(crate) fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    pub(crate) async fn get(&self, key: &str) -> Result<Option<ResponseMetadata>, BackendError> {
        let Some(raw) = self.backend.get(key).await? else {
            return Ok(None);
        };
        let persisted: PersistedMetadata = serde_json::from_slice(&raw)
            .map_err(|err| BackendError(anyhow::Error::new(err)))?;
        persisted.into_metadata().map(Some)
    }

    pub(crate) async fn set(
        &self,
        key: &str,
        record: &ResponseMetadata,
    ) -> Result<(), BackendError> {
        let raw = serde_json::to_vec(&PersistedMetadata::from_metadata(record))
            .map_err(|err| BackendError(anyhow::Error::new(err)))?;
        self.backend.set(key, Bytes::from(raw), TierHint::L1).await
    }

    pub(crate) async fn remove(&self, key: &str) -> Result<(), BackendError> {
        self.backend.remove(key).await
    }
}

pub(crate) fn hex_encode(digest: &ContentDigest) -> String {
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push(char::from_digit((byte >> 4) as u32, 16).unwrap_or('0'));
        out.push(char::from_digit((byte & 0xf) as u32, 16).unwrap_or('0'));
    }
    out
}

fn hex_decode(raw: &str) -> Option<ContentDigest> {
    if raw.len() != 64 {
        return None;
    }
    let mut digest = [0u8; 32];
    for (i, chunk) in raw.as_bytes().chunks_exact(2).enumerate() {
        let high = (chunk[0] as char).to_digit(16)?;
        let low = (chunk[1] as char).to_digit(16)?;
        digest[i] = ((high << 4) | low) as u8;
    }
    Some(digest)
}

fn epoch_millis(instant: SystemTime) -> u64 {
    instant
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn from_epoch_millis(millis: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_millis(millis)
}

fn headermap_to_vec(map: &HeaderMap) -> Vec<(String, String)> {
    let mut items = Vec::new();
    for (name, value) in map.iter() {
        if let Ok(value_str) = value.to_str() {
            items.push((name.as_str().to_string(), value_str.to_string()));
        }
    }
    items
}

fn to_headermap(items: &[(String, String)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in items {
        if let (Ok(name), Ok(value)) = (
            http::header::HeaderName::try_from(name.as_str()),
            http::HeaderValue::from_str(value),
        ) {
            map.append(name, value);
        }
    }
    map
}
