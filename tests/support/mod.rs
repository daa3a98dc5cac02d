//! Shared fixtures: a scripted origin transport and a deterministic
//! cache harness.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use parking_lot::Mutex;

use staleguard::{
    AtomicMetrics, Body, CacheError, CacheOptions, HttpCache, ManualClock, MemoryBackend,
    Transport,
};

/// One canned origin response.
#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// Returns scripted responses in order and records every request it sees.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    requests: Mutex<Vec<RecordedRequest>>,
    calls: AtomicUsize,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, response: ScriptedResponse) {
        self.responses.lock().push_back(response);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> RecordedRequest {
        self.requests
            .lock()
            .last()
            .cloned()
            .expect("no request was recorded")
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: Request<Body>) -> Result<Response<Body>, CacheError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(RecordedRequest {
            method: request.method().clone(),
            uri: request.uri().clone(),
            headers: request.headers().clone(),
        });

        let scripted = self
            .responses
            .lock()
            .pop_front()
            .ok_or_else(|| CacheError::transport(anyhow::anyhow!("origin script exhausted")))?;

        let mut response = Response::new(Body::full(scripted.body));
        *response.status_mut() = StatusCode::from_u16(scripted.status).expect("scripted status");
        for (name, value) in &scripted.headers {
            response.headers_mut().append(
                http::header::HeaderName::try_from(name.as_str()).expect("scripted header name"),
                http::HeaderValue::from_str(value).expect("scripted header value"),
            );
        }
        Ok(response)
    }
}

/// Builds a scripted response.
pub fn origin_response(status: u16, headers: &[(&str, &str)], body: &[u8]) -> ScriptedResponse {
    ScriptedResponse {
        status,
        headers: headers
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect(),
        body: Bytes::copy_from_slice(body),
    }
}

/// A cache wired to a scripted origin, a manual clock, atomic metrics, and
/// a fresh in-memory backend, with diagnostics on.
pub struct Harness {
    pub cache: HttpCache<Arc<ScriptedTransport>>,
    pub transport: Arc<ScriptedTransport>,
    pub clock: Arc<ManualClock>,
    pub metrics: Arc<AtomicMetrics>,
    pub backend: Arc<MemoryBackend>,
}

impl Harness {
    pub fn new(options: CacheOptions) -> Self {
        Self::with_start(options, SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000))
    }

    pub fn with_start(options: CacheOptions, start: SystemTime) -> Self {
        let transport = ScriptedTransport::new();
        let clock = Arc::new(ManualClock::new(start));
        let metrics = Arc::new(AtomicMetrics::new());
        let backend = Arc::new(MemoryBackend::new(1024, 64 * 1024 * 1024));
        let cache = HttpCache::with_parts(
            transport.clone(),
            backend.clone(),
            options.with_diagnostic_headers(),
            clock.clone(),
            metrics.clone(),
        );
        Self {
            cache,
            transport,
            clock,
            metrics,
            backend,
        }
    }

    pub fn advance(&self, delta: Duration) {
        self.clock.advance(delta);
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.request(Method::GET, uri, &[]).await
    }

    pub async fn get_with(&self, uri: &str, headers: &[(&str, &str)]) -> Response<Body> {
        self.request(Method::GET, uri, headers).await
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        headers: &[(&str, &str)],
    ) -> Response<Body> {
        let mut request = Request::new(Body::empty());
        *request.method_mut() = method;
        *request.uri_mut() = uri.parse().expect("test uri");
        for (name, value) in headers {
            request.headers_mut().append(
                http::header::HeaderName::try_from(*name).expect("test header name"),
                http::HeaderValue::from_str(value).expect("test header value"),
            );
        }
        self.cache.execute(request).await.expect("request failed")
    }
}

/// The `X-Cache-Diagnostic` value of a response.
pub fn diagnostic(response: &Response<Body>) -> String {
    response
        .headers()
        .get("x-cache-diagnostic")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

/// Header value as a string, empty when absent.
pub fn header(response: &Response<Body>, name: &str) -> String {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

/// Collects a response body.
pub async fn body_bytes(response: Response<Body>) -> Bytes {
    response.into_body().collect().await.expect("body collect")
}

/// Polls `condition` until it holds or the timeout elapses.
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
