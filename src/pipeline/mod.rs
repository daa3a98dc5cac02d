//! The request pipeline: orchestrates the policy engine, the stores, the
//! coalescer, and the background revalidation worker around the lower
//! transport.

mod background;
mod coalesce;
mod ingest;
mod revalidate;

use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use dashmap::DashMap;
use http::header::{DATE, EXPIRES, LAST_MODIFIED};
use http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode, Uri};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backend::CacheBackend;
use crate::body::Body;
use crate::clock::{Clock, SystemClock};
use crate::config::CacheOptions;
use crate::content::ContentStore;
use crate::diagnostics::{
    DiagnosticToken, X_CACHE_AGE, X_CACHE_COMPRESSED, X_CACHE_DIAGNOSTIC, X_CACHE_MAX_AGE,
};
use crate::directives::{CacheControl, has_pragma_no_cache, parse_age, parse_date_header, parse_etag};
use crate::error::CacheError;
use crate::freshness;
use crate::key;
use crate::metadata::{MetadataStore, ResponseMetadata};
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::policy::{self, Decision, StoreDecision, StorePlan};
use crate::transport::Transport;

use background::{REVALIDATION_QUEUE_DEPTH, RevalidationJob, spawn_worker};
use coalesce::SingleFlight;
use ingest::{IngestedBody, decompress, ingest, maybe_compress};
use revalidate::{conditional_request, refresh_from_304};

/// The caching interceptor.
///
/// Wraps a lower [`Transport`] and satisfies GET/HEAD requests from the
/// backing cache whenever RFC 9111 allows it. Construction spawns the
/// background revalidation worker, so it must happen inside a Tokio
/// runtime. Cloning is cheap; clones share every store and counter.
pub struct HttpCache<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for HttpCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Transport> HttpCache<T> {
    /// Creates a cache with the system clock and no metrics.
    pub fn new(transport: T, backend: Arc<dyn CacheBackend>, options: CacheOptions) -> Self {
        Self::with_parts(
            transport,
            backend,
            options,
            Arc::new(SystemClock),
            Arc::new(NoopMetrics),
        )
    }

    /// Creates a cache with an injected clock and metrics sink.
    pub fn with_parts(
        transport: T,
        backend: Arc<dyn CacheBackend>,
        options: CacheOptions,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let (revalidation_tx, revalidation_rx) = mpsc::channel(REVALIDATION_QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let inner = Arc::new(Inner {
            transport,
            metadata: MetadataStore::new(backend.clone()),
            content: ContentStore::new(backend, options.content_key_prefix.clone()),
            options,
            clock,
            metrics,
            misses_inflight: SingleFlight::new(),
            revalidation_tx,
            revalidations_inflight: DashMap::new(),
            shutdown_tx,
            worker: Mutex::new(None),
        });
        let worker = spawn_worker(Arc::downgrade(&inner), revalidation_rx, shutdown_rx);
        *inner.worker.lock() = Some(worker);
        Self { inner }
    }

    /// Satisfies one request, from cache or origin.
    pub async fn execute(&self, request: Request<Body>) -> Result<Response<Body>, CacheError> {
        self.inner.clone().execute(request).await
    }

    /// Stops the background revalidation worker and waits for jobs that
    /// already started. Further stale-while-revalidate hits are served
    /// without scheduling revalidations.
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(());
        let worker = self.inner.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

#[async_trait::async_trait]
impl<T: Transport> Transport for HttpCache<T> {
    async fn send(&self, request: Request<Body>) -> Result<Response<Body>, CacheError> {
        self.execute(request).await
    }
}

/// Method, URI, and headers of the original request, kept for conditional
/// and coalesced refetches. Cacheable methods carry no body.
#[derive(Debug, Clone)]
pub(crate) struct RequestSnapshot {
    pub(crate) method: Method,
    pub(crate) uri: Uri,
    pub(crate) headers: HeaderMap,
}

impl RequestSnapshot {
    fn from_parts(parts: &http::request::Parts) -> Self {
        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            headers: parts.headers.clone(),
        }
    }

    pub(crate) fn to_request(&self) -> Request<Body> {
        let mut request = Request::new(Body::empty());
        *request.method_mut() = self.method.clone();
        *request.uri_mut() = self.uri.clone();
        *request.headers_mut() = self.headers.clone();
        request
    }
}

/// Result of one coalesced origin fetch, shared among all waiters.
pub(crate) struct FetchOutcome {
    status: StatusCode,
    headers: HeaderMap,
    body: OutcomeBody,
}

enum OutcomeBody {
    /// Buffered body; every waiter clones its own view.
    Bytes(Bytes),
    /// The body exceeded the buffering cap and was left streaming. Only
    /// the leader holds it (through the out-of-band slot); other waiters
    /// re-dispatch to the origin.
    Unshareable,
}

/// Out-of-band slot carrying the leader's streaming response out of the
/// coalesced factory.
type ResponseSlot = Arc<Mutex<Option<Response<Body>>>>;

enum ServeOutcome {
    Served(Response<Body>),
    /// Metadata pointed at a missing or corrupt content entry; the
    /// metadata was dropped.
    Orphan,
    /// The backing store failed to read.
    ReadError,
}

pub(crate) struct Inner<T: Transport> {
    transport: T,
    options: CacheOptions,
    metadata: MetadataStore,
    content: ContentStore,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
    misses_inflight: SingleFlight<FetchOutcome>,
    revalidation_tx: mpsc::Sender<RevalidationJob>,
    revalidations_inflight: DashMap<String, ()>,
    shutdown_tx: broadcast::Sender<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport> Inner<T> {
    async fn execute(self: Arc<Self>, request: Request<Body>) -> Result<Response<Body>, CacheError> {
        let (parts, request_body) = request.into_parts();
        let request_cc = CacheControl::parse(&parts.headers);
        let now = self.clock.now();

        let cacheable_method = parts.method == Method::GET || parts.method == Method::HEAD;
        let skip_lookup = !cacheable_method || has_pragma_no_cache(&parts.headers);

        let cache_key = key::vary_aware_key(&self.options, &parts.method, &parts.uri, &parts.headers);
        let (record, lookup_failed) = if skip_lookup {
            (None, false)
        } else {
            self.load_record(&cache_key, &parts.headers).await
        };
        let miss_token = if lookup_failed {
            DiagnosticToken::MissCacheError
        } else {
            DiagnosticToken::Miss
        };

        let decision = policy::request_decision(
            &self.options,
            &parts.method,
            &parts.headers,
            &request_cc,
            record.as_ref(),
            now,
        );
        debug!(key = %cache_key, decision = ?decision, "cache decision");

        let snapshot = RequestSnapshot::from_parts(&parts);
        match decision {
            Decision::BypassMethod => {
                self.forward(parts, request_body, DiagnosticToken::BypassMethod).await
            }
            Decision::BypassPragmaNoCache => {
                self.forward(parts, request_body, DiagnosticToken::BypassPragmaNoCache)
                    .await
            }
            Decision::BypassNoStore => {
                self.forward(parts, request_body, DiagnosticToken::BypassNoStore).await
            }
            Decision::OnlyIfCachedMiss => Ok(self.gateway_timeout()),
            Decision::OnlyIfCachedHit => {
                match record {
                    Some(record) => {
                        match self
                            .serve_hit(&cache_key, &record, DiagnosticToken::HitOnlyIfCached, now)
                            .await
                        {
                            ServeOutcome::Served(response) => Ok(response),
                            // The origin must not be contacted on this path.
                            ServeOutcome::Orphan | ServeOutcome::ReadError => {
                                Ok(self.gateway_timeout())
                            }
                        }
                    }
                    None => Ok(self.gateway_timeout()),
                }
            }
            Decision::Miss => self.miss(cache_key, snapshot, request_cc, miss_token).await,
            Decision::HitFresh => match record {
                Some(record) => {
                    match self
                        .serve_hit(&cache_key, &record, DiagnosticToken::HitFresh, now)
                        .await
                    {
                        ServeOutcome::Served(response) => Ok(response),
                        ServeOutcome::Orphan => {
                            self.miss(cache_key, snapshot, request_cc, DiagnosticToken::Miss).await
                        }
                        ServeOutcome::ReadError => {
                            self.miss(cache_key, snapshot, request_cc, DiagnosticToken::MissCacheError)
                                .await
                        }
                    }
                }
                None => self.miss(cache_key, snapshot, request_cc, miss_token).await,
            },
            Decision::HitStaleWhileRevalidate => match record {
                Some(record) => {
                    match self
                        .serve_hit(
                            &cache_key,
                            &record,
                            DiagnosticToken::HitStaleWhileRevalidate,
                            now,
                        )
                        .await
                    {
                        ServeOutcome::Served(response) => {
                            self.schedule_revalidation(&cache_key, &snapshot);
                            Ok(response)
                        }
                        ServeOutcome::Orphan => {
                            self.miss(cache_key, snapshot, request_cc, DiagnosticToken::Miss).await
                        }
                        ServeOutcome::ReadError => {
                            self.miss(cache_key, snapshot, request_cc, DiagnosticToken::MissCacheError)
                                .await
                        }
                    }
                }
                None => self.miss(cache_key, snapshot, request_cc, miss_token).await,
            },
            Decision::Revalidate { allow_stale_on_error } => match record {
                Some(record) => {
                    self.revalidate(cache_key, snapshot, request_cc, record, allow_stale_on_error, now)
                        .await
                }
                None => self.miss(cache_key, snapshot, request_cc, miss_token).await,
            },
        }
    }

    /// Reads the record for `key`, re-validating its stored vary values
    /// against the incoming request. Returns the record (if usable) and
    /// whether the read itself failed.
    async fn load_record(
        &self,
        cache_key: &str,
        request_headers: &HeaderMap,
    ) -> (Option<ResponseMetadata>, bool) {
        match self.metadata.get(cache_key).await {
            Ok(Some(record)) => {
                if key::variant_matches(&record, request_headers) {
                    (Some(record), false)
                } else {
                    debug!(key = %cache_key, "stored variant does not match request headers");
                    (None, false)
                }
            }
            Ok(None) => (None, false),
            Err(err) => {
                warn!(key = %cache_key, error = %err, "cache read failed; treating as miss");
                (None, true)
            }
        }
    }

    /// Builds the caller-visible response for a cache hit. Failure modes
    /// degrade: orphaned or corrupt entries are dropped and reported so
    /// the caller can fall back to the origin.
    async fn serve_hit(
        &self,
        cache_key: &str,
        record: &ResponseMetadata,
        token: DiagnosticToken,
        now: SystemTime,
    ) -> ServeOutcome {
        let stored = match self.content.get(&record.content_digest).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                warn!(key = %cache_key, "content entry missing for metadata record; dropping it");
                self.remove_metadata_quietly(cache_key).await;
                return ServeOutcome::Orphan;
            }
            Err(err) => {
                warn!(key = %cache_key, error = %err, "cache read failed; treating as miss");
                return ServeOutcome::ReadError;
            }
        };
        match self.response_from_record(record, stored, token, now) {
            Ok(response) => ServeOutcome::Served(response),
            Err(err) => {
                warn!(key = %cache_key, error = %err, "stored content unusable; dropping entry");
                self.remove_metadata_quietly(cache_key).await;
                self.remove_content_quietly(record).await;
                ServeOutcome::Orphan
            }
        }
    }

    /// Assembles a response from a record and its stored bytes,
    /// decompressing when needed. Counts and tags the outcome.
    fn response_from_record(
        &self,
        record: &ResponseMetadata,
        stored: Bytes,
        token: DiagnosticToken,
        now: SystemTime,
    ) -> Result<Response<Body>, CacheError> {
        let body = if record.is_compressed {
            decompress(&stored)?
        } else {
            stored
        };
        let mut response = Response::new(Body::full(body));
        *response.status_mut() = record.status;
        *response.headers_mut() = record.merged_headers();
        Ok(self.finalize(response, token, Some((record, now))))
    }

    /// Forwards a request untouched; bypass decisions store nothing and
    /// count nothing.
    async fn forward(
        &self,
        parts: http::request::Parts,
        body: Body,
        token: DiagnosticToken,
    ) -> Result<Response<Body>, CacheError> {
        let mut request = Request::new(body);
        *request.method_mut() = parts.method;
        *request.uri_mut() = parts.uri;
        *request.headers_mut() = parts.headers;
        let response = self.transport.send(request).await?;
        Ok(self.finalize(response, token, None))
    }

    /// The one place the cache synthesizes a non-origin failure:
    /// `only-if-cached` without a servable record.
    fn gateway_timeout(&self) -> Response<Body> {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::GATEWAY_TIMEOUT;
        self.finalize(response, DiagnosticToken::MissOnlyIfCached, None)
    }

    /// Cache miss: fetch from the origin with per-key single-flight, store
    /// when storable, and hand every waiter its own response.
    async fn miss(
        self: Arc<Self>,
        cache_key: String,
        snapshot: RequestSnapshot,
        request_cc: CacheControl,
        token: DiagnosticToken,
    ) -> Result<Response<Body>, CacheError> {
        let slot: ResponseSlot = Arc::new(Mutex::new(None));
        let factory = {
            let inner = self.clone();
            let cache_key = cache_key.clone();
            let snapshot = snapshot.clone();
            let request_cc = request_cc.clone();
            let slot = slot.clone();
            async move {
                let response = inner.transport.send(snapshot.to_request()).await?;
                inner
                    .process_origin_response(&cache_key, &snapshot, &request_cc, response, &slot)
                    .await
            }
        };

        let (outcome, leader) = self.misses_inflight.run(&cache_key, factory).await;
        let outcome = outcome.map_err(CacheError::Shared)?;
        match &outcome.body {
            OutcomeBody::Bytes(bytes) => {
                let mut response = Response::new(Body::full(bytes.clone()));
                *response.status_mut() = outcome.status;
                *response.headers_mut() = outcome.headers.clone();
                Ok(self.finalize(response, token, None))
            }
            OutcomeBody::Unshareable => {
                let parked = if leader { slot.lock().take() } else { None };
                match parked {
                    Some(response) => Ok(self.finalize(response, token, None)),
                    // Followers (and a leader whose slot was lost) fetch
                    // their own copy; the response was not cacheable anyway.
                    None => {
                        let response = self.transport.send(snapshot.to_request()).await?;
                        Ok(self.finalize(response, token, None))
                    }
                }
            }
        }
    }

    /// Drains, stores (when storable), and packages one origin response.
    /// Shared by the miss, revalidation, and background paths.
    async fn process_origin_response(
        &self,
        cache_key: &str,
        snapshot: &RequestSnapshot,
        request_cc: &CacheControl,
        response: Response<Body>,
        slot: &ResponseSlot,
    ) -> Result<FetchOutcome, CacheError> {
        let (parts, body) = response.into_parts();
        let response_cc = CacheControl::parse(&parts.headers);
        let now = self.clock.now();

        match ingest(body, self.options.max_cacheable_content_size).await? {
            IngestedBody::TooLarge { body } => {
                if response_cc.no_store {
                    self.remove_metadata_quietly(cache_key).await;
                }
                debug!(key = %cache_key, "response exceeds size cap; passing through unstored");
                let mut response = Response::new(body);
                *response.status_mut() = parts.status;
                *response.headers_mut() = parts.headers.clone();
                *slot.lock() = Some(response);
                Ok(FetchOutcome {
                    status: parts.status,
                    headers: parts.headers,
                    body: OutcomeBody::Unshareable,
                })
            }
            IngestedBody::Complete(bytes) => {
                let decision = policy::storability(
                    &self.options,
                    &snapshot.method,
                    &snapshot.headers,
                    request_cc,
                    parts.status,
                    &parts.headers,
                    &response_cc,
                    bytes.len() as u64,
                );
                match &decision {
                    StoreDecision::Store(plan) => {
                        self.store_response(
                            cache_key,
                            snapshot,
                            &parts,
                            plan.clone(),
                            &response_cc,
                            &bytes,
                            now,
                        )
                        .await;
                    }
                    StoreDecision::Skip(reason) => {
                        if decision.invalidates_existing() {
                            self.remove_metadata_quietly(cache_key).await;
                        }
                        debug!(key = %cache_key, reason = reason.as_str(), "response not storable");
                    }
                }
                Ok(FetchOutcome {
                    status: parts.status,
                    headers: parts.headers,
                    body: OutcomeBody::Bytes(bytes),
                })
            }
        }
    }

    /// Persists content then metadata. Write failures only cost the cache
    /// entry, never the request.
    #[allow(clippy::too_many_arguments)]
    async fn store_response(
        &self,
        cache_key: &str,
        snapshot: &RequestSnapshot,
        parts: &http::response::Parts,
        plan: StorePlan,
        response_cc: &CacheControl,
        raw_body: &Bytes,
        now: SystemTime,
    ) {
        let (stored_bytes, is_compressed) = maybe_compress(&self.options, &parts.headers, raw_body);
        let content_length_stored = stored_bytes.len() as u64;
        let digest = match self.content.put(stored_bytes).await {
            Ok(digest) => digest,
            Err(err) => {
                debug!(key = %cache_key, error = %err, "content write failed; response not cached");
                return;
            }
        };

        let mut response_headers = HeaderMap::new();
        let mut content_headers = HeaderMap::new();
        for (name, value) in parts.headers.iter() {
            if name.as_str().starts_with("content-") {
                content_headers.append(name.clone(), value.clone());
            } else {
                response_headers.append(name.clone(), value.clone());
            }
        }

        let vary_header_values = key::captured_vary_values(&plan.vary_names, &snapshot.headers);
        let record = ResponseMetadata {
            status: parts.status,
            response_headers,
            content_headers,
            content_digest: digest,
            content_length_stored,
            is_compressed,
            cached_at: now,
            origin_date: parse_date_header(&parts.headers, DATE),
            expires: parse_date_header(&parts.headers, EXPIRES),
            age_on_arrival: parse_age(&parts.headers),
            max_age: plan.max_age,
            etag: parse_etag(&parts.headers),
            last_modified: parse_date_header(&parts.headers, LAST_MODIFIED),
            vary_header_values,
            vary_header_names: plan.vary_names,
            stale_while_revalidate: response_cc.stale_while_revalidate,
            stale_if_error: response_cc.stale_if_error,
            must_revalidate: response_cc.must_revalidate,
            no_cache_in_response: plan.no_cache_in_response,
        };
        if let Err(err) = self.metadata.set(cache_key, &record).await {
            debug!(key = %cache_key, error = %err, "metadata write failed; response not cached");
        }
    }

    /// Foreground conditional revalidation of a stored record.
    async fn revalidate(
        self: Arc<Self>,
        cache_key: String,
        snapshot: RequestSnapshot,
        request_cc: CacheControl,
        mut record: ResponseMetadata,
        allow_stale_on_error: bool,
        now: SystemTime,
    ) -> Result<Response<Body>, CacheError> {
        let percent = self.options.heuristic_freshness_percent;
        let request = conditional_request(&snapshot, &record);
        let response = match self.transport.send(request).await {
            Ok(response) => response,
            Err(err) => {
                if allow_stale_on_error && freshness::within_stale_if_error(&record, percent, now) {
                    if let ServeOutcome::Served(response) = self
                        .serve_hit(&cache_key, &record, DiagnosticToken::HitStaleIfError, now)
                        .await
                    {
                        return Ok(response);
                    }
                }
                return Err(err);
            }
        };

        if response.status() == StatusCode::NOT_MODIFIED {
            refresh_from_304(&mut record, response.headers(), self.options.mode, now);
            match self.content.get(&record.content_digest).await {
                Ok(Some(stored)) => {
                    if let Err(err) = self.metadata.set(&cache_key, &record).await {
                        debug!(key = %cache_key, error = %err, "metadata refresh failed after 304");
                    }
                    return match self.response_from_record(
                        &record,
                        stored,
                        DiagnosticToken::HitRevalidated,
                        now,
                    ) {
                        Ok(response) => Ok(response),
                        Err(err) => {
                            warn!(key = %cache_key, error = %err, "stored content unusable after 304; refetching");
                            self.remove_metadata_quietly(&cache_key).await;
                            self.clone()
                                .miss(cache_key, snapshot, request_cc, DiagnosticToken::Miss)
                                .await
                        }
                    };
                }
                Ok(None) | Err(_) => {
                    // The validator said "unchanged" but the body is gone:
                    // drop the record and refetch a full response.
                    warn!(key = %cache_key, "content entry missing after 304; refetching full response");
                    self.remove_metadata_quietly(&cache_key).await;
                    return self
                        .clone()
                        .miss(cache_key, snapshot, request_cc, DiagnosticToken::Miss)
                        .await;
                }
            }
        }

        if response.status().is_server_error()
            && allow_stale_on_error
            && freshness::within_stale_if_error(&record, percent, now)
        {
            if let ServeOutcome::Served(stale) = self
                .serve_hit(&cache_key, &record, DiagnosticToken::HitStaleIfError, now)
                .await
            {
                return Ok(stale);
            }
        }

        // Any other response replaces the record when storable.
        let slot: ResponseSlot = Arc::new(Mutex::new(None));
        let outcome = self
            .process_origin_response(&cache_key, &snapshot, &request_cc, response, &slot)
            .await?;
        match &outcome.body {
            OutcomeBody::Bytes(bytes) => {
                let mut response = Response::new(Body::full(bytes.clone()));
                *response.status_mut() = outcome.status;
                *response.headers_mut() = outcome.headers.clone();
                Ok(self.finalize(response, DiagnosticToken::MissRevalidated, None))
            }
            OutcomeBody::Unshareable => {
                let parked = slot.lock().take();
                match parked {
                    Some(response) => {
                        Ok(self.finalize(response, DiagnosticToken::MissRevalidated, None))
                    }
                    None => {
                        let response = self.transport.send(snapshot.to_request()).await?;
                        Ok(self.finalize(response, DiagnosticToken::MissRevalidated, None))
                    }
                }
            }
        }
    }

    /// Queues a background revalidation for a stale-while-revalidate hit.
    /// At most one job per key is in flight; a full queue drops the job
    /// and keeps the stale entry.
    fn schedule_revalidation(&self, cache_key: &str, snapshot: &RequestSnapshot) {
        if self
            .revalidations_inflight
            .insert(cache_key.to_string(), ())
            .is_some()
        {
            debug!(key = %cache_key, "revalidation already in flight");
            return;
        }
        let job = RevalidationJob {
            key: cache_key.to_string(),
            snapshot: snapshot.clone(),
        };
        if let Err(err) = self.revalidation_tx.try_send(job) {
            self.revalidations_inflight.remove(cache_key);
            debug!(key = %cache_key, error = %err, "revalidation not scheduled; stale entry retained");
        }
    }

    /// Runs one queued revalidation. Every failure is absorbed: the stale
    /// entry stays valid until overwritten or evicted.
    pub(crate) async fn run_background_revalidation(self: Arc<Self>, job: RevalidationJob) {
        if let Err(err) = self.background_revalidate(&job).await {
            debug!(key = %job.key, error = %err, "background revalidation failed; stale entry retained");
        }
        self.revalidations_inflight.remove(&job.key);
    }

    async fn background_revalidate(&self, job: &RevalidationJob) -> Result<(), CacheError> {
        let now = self.clock.now();
        // Reload the record: it may have been replaced or purged since the
        // stale hit that queued this job.
        let record = match self.metadata.get(&job.key).await {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(()),
            Err(err) => {
                debug!(key = %job.key, error = %err, "cache read failed in background");
                return Ok(());
            }
        };

        let request = conditional_request(&job.snapshot, &record);
        let response = self.transport.send(request).await?;

        if response.status() == StatusCode::NOT_MODIFIED {
            let mut record = record;
            refresh_from_304(&mut record, response.headers(), self.options.mode, now);
            match self.content.get(&record.content_digest).await {
                Ok(Some(_)) => {
                    if let Err(err) = self.metadata.set(&job.key, &record).await {
                        debug!(key = %job.key, error = %err, "metadata refresh failed after 304");
                    }
                }
                Ok(None) | Err(_) => {
                    self.remove_metadata_quietly(&job.key).await;
                }
            }
            return Ok(());
        }

        let slot: ResponseSlot = Arc::new(Mutex::new(None));
        self.process_origin_response(
            &job.key,
            &job.snapshot,
            &CacheControl::default(),
            response,
            &slot,
        )
        .await?;
        Ok(())
    }

    /// Counts the outcome and attaches diagnostic headers when enabled.
    fn finalize(
        &self,
        mut response: Response<Body>,
        token: DiagnosticToken,
        hit: Option<(&ResponseMetadata, SystemTime)>,
    ) -> Response<Body> {
        if token.is_hit() {
            self.metrics.record_hit();
        } else if token.is_miss() {
            self.metrics.record_miss();
        }
        if !self.options.include_diagnostic_headers {
            return response;
        }
        let headers = response.headers_mut();
        headers.insert(X_CACHE_DIAGNOSTIC, HeaderValue::from_static(token.as_str()));
        if let Some((record, now)) = hit {
            let age = now
                .duration_since(record.cached_at)
                .unwrap_or_default()
                .as_secs();
            headers.insert(X_CACHE_AGE, HeaderValue::from(age));
            let lifetime =
                freshness::freshness_lifetime(record, self.options.heuristic_freshness_percent)
                    .unwrap_or_default()
                    .as_secs();
            headers.insert(X_CACHE_MAX_AGE, HeaderValue::from(lifetime));
            if record.is_compressed {
                headers.insert(X_CACHE_COMPRESSED, HeaderValue::from_static("true"));
            }
        }
        response
    }

    async fn remove_metadata_quietly(&self, cache_key: &str) {
        if let Err(err) = self.metadata.remove(cache_key).await {
            debug!(key = %cache_key, error = %err, "metadata remove failed; entry will expire naturally");
        }
    }

    async fn remove_content_quietly(&self, record: &ResponseMetadata) {
        if let Err(err) = self.content.remove(&record.content_digest).await {
            debug!(error = %err, "content remove failed; entry will expire naturally");
        }
    }
}
