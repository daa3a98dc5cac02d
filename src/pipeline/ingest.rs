//! Response body ingestion and storage compression.
//!
//! Bodies are drained chunk by chunk so oversized responses are rejected
//! as soon as the cap is crossed, with every already-read byte handed back
//! to the caller. Buffers are plain owned values; every exit path releases
//! them through normal drop.

use std::io::{Read, Write};

use bytes::{Bytes, BytesMut};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use http::HeaderMap;

use crate::body::Body;
use crate::config::{CacheOptions, media_type_matches};
use crate::error::CacheError;

/// Upper bound on the bytes copied per ingestion step.
pub(crate) const INGEST_CHUNK_SIZE: usize = 64 * 1024;

/// Outcome of draining a response body under a size cap.
pub(crate) enum IngestedBody {
    /// The whole body, ready for storability checks and storage.
    Complete(Bytes),
    /// The cap was crossed mid-read. `body` replays the already-read
    /// prefix followed by the unread remainder; nothing was stored.
    TooLarge { body: Body },
}

/// Drains `body`, stopping as soon as `limit` is exceeded.
pub(crate) async fn ingest(mut body: Body, limit: Option<u64>) -> Result<IngestedBody, CacheError> {
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut total: u64 = 0;

    while let Some(mut chunk) = body.chunk().await? {
        // Bound the step size so one giant chunk cannot blow past the cap
        // by more than the chunk granularity.
        while !chunk.is_empty() {
            let step = chunk.split_to(chunk.len().min(INGEST_CHUNK_SIZE));
            total += step.len() as u64;
            chunks.push(step);
            if let Some(limit) = limit
                && total > limit
            {
                return Ok(IngestedBody::TooLarge {
                    body: Body::from_prefix_and_rest(chunks, body),
                });
            }
        }
    }

    let mut buf = BytesMut::with_capacity(total as usize);
    for chunk in &chunks {
        buf.extend_from_slice(chunk);
    }
    Ok(IngestedBody::Complete(buf.freeze()))
}

/// Applies storage compression when the body qualifies: configured
/// threshold reached and media type on the compressible list. Returns the
/// bytes to store and whether they are compressed.
pub(crate) fn maybe_compress(
    options: &CacheOptions,
    response_headers: &HeaderMap,
    bytes: &Bytes,
) -> (Bytes, bool) {
    let Some(threshold) = options.compression_threshold else {
        return (bytes.clone(), false);
    };
    if (bytes.len() as u64) < threshold {
        return (bytes.clone(), false);
    }
    let content_type = response_headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !media_type_matches(&options.compressible_content_types, content_type) {
        return (bytes.clone(), false);
    }

    let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len() / 2), Compression::fast());
    if encoder.write_all(bytes).is_err() {
        return (bytes.clone(), false);
    }
    match encoder.finish() {
        // Keep the raw bytes when compression does not pay for itself;
        // this also keeps the stored size within the admission cap.
        Ok(compressed) if compressed.len() < bytes.len() => (Bytes::from(compressed), true),
        Ok(_) | Err(_) => (bytes.clone(), false),
    }
}

/// Inflates a stored compressed body.
pub(crate) fn decompress(bytes: &Bytes) -> Result<Bytes, CacheError> {
    let mut decoder = GzDecoder::new(bytes.as_ref());
    let mut out = Vec::with_capacity(bytes.len() * 2);
    decoder
        .read_to_end(&mut out)
        .map_err(|err| CacheError::CorruptContent(err.to_string()))?;
    Ok(Bytes::from(out))
}
