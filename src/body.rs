//! Request/response body representation.
//!
//! Bodies are either fully buffered (`Bytes`, the common case for cache
//! hits) or a stream of chunks handed over by the lower transport. The
//! pipeline drains bodies chunk by chunk so a size-capped ingest can stop
//! buffering early and still hand the caller the complete stream.

use std::fmt;
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, Stream, StreamExt};

use crate::error::CacheError;

/// A response (or request) body.
pub struct Body {
    inner: BodyInner,
}

enum BodyInner {
    Full(Bytes),
    Stream(BoxStream<'static, Result<Bytes, CacheError>>),
}

impl Body {
    /// An empty body.
    pub fn empty() -> Self {
        Self::full(Bytes::new())
    }

    /// A fully buffered body.
    pub fn full(bytes: impl Into<Bytes>) -> Self {
        Self {
            inner: BodyInner::Full(bytes.into()),
        }
    }

    /// A body backed by a chunk stream from the lower transport.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, CacheError>> + Send + 'static,
    {
        Self {
            inner: BodyInner::Stream(stream.boxed()),
        }
    }

    /// Pulls the next chunk, or `None` once the body is exhausted.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, CacheError> {
        match &mut self.inner {
            BodyInner::Full(bytes) => {
                if bytes.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(std::mem::take(bytes)))
                }
            }
            BodyInner::Stream(stream) => stream.next().await.transpose(),
        }
    }

    /// Drains the body into a single contiguous buffer.
    pub async fn collect(mut self) -> Result<Bytes, CacheError> {
        if let BodyInner::Full(bytes) = &mut self.inner {
            return Ok(std::mem::take(bytes));
        }
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    /// The buffered bytes, when the body is not streaming.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match &self.inner {
            BodyInner::Full(bytes) => Some(bytes),
            BodyInner::Stream(_) => None,
        }
    }

    /// Rebuilds a body from already-read chunks followed by the unread
    /// remainder. Used when a size-capped ingest aborts mid-stream: the
    /// caller still receives every byte.
    pub(crate) fn from_prefix_and_rest(prefix: Vec<Bytes>, rest: Body) -> Self {
        let head = stream::iter(prefix.into_iter().map(Ok));
        Self::from_stream(head.chain(rest.into_stream()))
    }

    fn into_stream(self) -> BoxStream<'static, Result<Bytes, CacheError>> {
        match self.inner {
            BodyInner::Full(bytes) => {
                if bytes.is_empty() {
                    stream::empty().boxed()
                } else {
                    stream::once(async move { Ok(bytes) }).boxed()
                }
            }
            BodyInner::Stream(stream) => stream,
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            BodyInner::Full(bytes) => f.debug_tuple("Body::Full").field(&bytes.len()).finish(),
            BodyInner::Stream(_) => f.debug_tuple("Body::Stream").finish(),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::full(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::full(Bytes::from(bytes))
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Self::full(Bytes::from_static(s.as_bytes()))
    }
}

impl From<&'static [u8]> for Body {
    fn from(bytes: &'static [u8]) -> Self {
        Self::full(Bytes::from_static(bytes))
    }
}

impl Stream for Body {
    type Item = Result<Bytes, CacheError>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match &mut this.inner {
            BodyInner::Full(bytes) => {
                if bytes.is_empty() {
                    std::task::Poll::Ready(None)
                } else {
                    std::task::Poll::Ready(Some(Ok(std::mem::take(bytes))))
                }
            }
            BodyInner::Stream(stream) => stream.as_mut().poll_next(cx),
        }
    }
}
