//! Contract between the caching layer and the lower HTTP transport.

use std::sync::Arc;

use async_trait::async_trait;
use http::{Request, Response};

use crate::body::Body;
use crate::error::CacheError;

/// A callable HTTP hop: `send(request) -> response`.
///
/// Implementations must deliver bodies already decoded of transport-level
/// content encodings and surface `Cache-Control`, `Vary`, `ETag`,
/// `Last-Modified`, `Date`, `Expires`, and `Age` unmodified. Dropping the
/// returned future cancels the request.
///
/// [`crate::HttpCache`] implements `Transport` itself, so caching composes
/// with other request decorators.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Performs one HTTP exchange.
    async fn send(&self, request: Request<Body>) -> Result<Response<Body>, CacheError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: Request<Body>) -> Result<Response<Body>, CacheError> {
        (**self).send(request).await
    }
}
