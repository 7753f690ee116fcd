//! Cache decision protocol
//!
//! `CachingInterceptor` sits between a caller and a [`Transport`]. For every
//! request it decides whether a stored response can be served, must be
//! revalidated, or the network has to answer; successful network answers are
//! teed into the store while they stream to the caller.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};
use http::header::{
    HeaderValue, AGE, CONTENT_LOCATION, IF_MODIFIED_SINCE, IF_NONE_MATCH, LOCATION, WARNING,
};
use http::{Method, StatusCode};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::clock::{Clock, SystemClock};
use super::control::CacheControl;
use super::entry::{CacheEntry, RequestInfo, ResponseInfo};
use super::error::CacheError;
use super::headers::{self, WARNING_STALE};
use super::metadata::EntryMetadata;
use super::traits::{BodySink, Cache};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type BodyStream = BoxStream<'static, Result<Bytes, BoxError>>;

/// A response head plus its still-streaming body.
pub struct TransportResponse {
    pub info: ResponseInfo,
    pub body: BodyStream,
}

impl TransportResponse {
    pub fn new(info: ResponseInfo, body: BodyStream) -> Self {
        Self { info, body }
    }

    /// Response whose body is already in memory
    pub fn full(info: ResponseInfo, body: impl Into<Bytes>) -> Self {
        let chunk: Result<Bytes, BoxError> = Ok(body.into());
        Self::new(info, stream::iter(vec![chunk]).boxed())
    }

    pub fn empty(info: ResponseInfo) -> Self {
        Self::new(info, stream::empty().boxed())
    }
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// The network side: sends a request, returns the response as it arrives.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: RequestInfo) -> Result<TransportResponse, BoxError>;
}

/// How a response was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Fresh stored response, no network
    Hit,
    /// Stored response confirmed by a `304 Not Modified`
    Revalidated,
    /// Stale stored response served because the network failed
    StaleIfError,
    /// Network response for a cacheable request
    Miss,
    /// Network response; the request asked not to be served from the store
    Bypass,
    /// Synthetic `504`: nothing usable stored and the network was not allowed or failed
    GatewayTimeout,
    /// Request the store does not handle, sent as is
    Pass,
}

impl CacheStatus {
    pub fn is_cached(self) -> bool {
        matches!(
            self,
            CacheStatus::Hit | CacheStatus::Revalidated | CacheStatus::StaleIfError
        )
    }
}

/// A fully buffered response
#[derive(Debug, Clone)]
pub struct CacheResponse {
    pub info: ResponseInfo,
    pub status: CacheStatus,
    pub body: Bytes,
}

#[derive(Error, Debug)]
pub enum InterceptorError {
    #[error("transport failed: {0}")]
    Transport(#[source] BoxError),

    #[error("response body failed: {0}")]
    Body(#[source] BoxError),

    #[error("body sink failed: {0}")]
    Sink(#[source] CacheError),
}

/// Sink collecting the body in memory.
#[derive(Debug, Default)]
pub struct BufferSink {
    buffer: BytesMut,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Bytes {
        self.buffer.freeze()
    }
}

#[async_trait]
impl BodySink for BufferSink {
    async fn write(&mut self, chunk: Bytes) -> Result<(), CacheError> {
        self.buffer.extend_from_slice(&chunk);
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn abort(&mut self) {
        self.buffer.clear();
    }
}

/// Statuses whose responses may be stored
fn is_cacheable_status(status: StatusCode) -> bool {
    matches!(
        status.as_u16(),
        200 | 203 | 204 | 206 | 300 | 301 | 404 | 405 | 410 | 414 | 501
    )
}

fn is_cacheable_response(info: &ResponseInfo) -> bool {
    is_cacheable_status(info.status)
        && !headers::is_vary_all(&info.headers)
        && !CacheControl::of(&info.headers).no_store
}

/// Add the stored validators to a request.
fn apply_conditions(mut request: RequestInfo, metadata: &EntryMetadata) -> RequestInfo {
    if let Some(date) = metadata.date_for_revalidation() {
        if let Ok(value) = HeaderValue::from_str(&date) {
            request.headers.insert(IF_MODIFIED_SINCE, value);
        }
    }
    if let Some(etag) = metadata.etag() {
        request.headers.insert(IF_NONE_MATCH, etag);
    }
    request
}

fn gateway_timeout() -> ResponseInfo {
    ResponseInfo::new(StatusCode::GATEWAY_TIMEOUT)
}

/// A stored entry with its body already loaded.
struct Stored {
    entry: CacheEntry,
    body: Bytes,
}

pub struct CachingInterceptor {
    cache: Arc<dyn Cache>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for CachingInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingInterceptor")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl CachingInterceptor {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self::with_clock(cache, Arc::new(SystemClock))
    }

    pub fn with_clock(cache: Arc<dyn Cache>, clock: Arc<dyn Clock>) -> Self {
        Self { cache, clock }
    }

    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    /// Run `request` and buffer the response body.
    pub async fn execute(
        &self,
        transport: &dyn Transport,
        request: RequestInfo,
    ) -> Result<CacheResponse, InterceptorError> {
        let mut sink = BufferSink::new();
        let (info, status) = self.execute_into(transport, request, &mut sink).await?;
        Ok(CacheResponse {
            info,
            status,
            body: sink.into_bytes(),
        })
    }

    /// Run `request`, streaming the response body into `sink`.
    ///
    /// `sink` is finished on success and aborted when the body fails midway.
    pub async fn execute_into(
        &self,
        transport: &dyn Transport,
        request: RequestInfo,
        sink: &mut dyn BodySink,
    ) -> Result<(ResponseInfo, CacheStatus), InterceptorError> {
        if request.method != Method::GET {
            return self.pass(transport, request, sink).await;
        }

        let request_cc = request.cache_control();
        let bypass = request_cc.no_cache || request_cc.no_store;

        let mut stored = if bypass {
            None
        } else {
            self.lookup(&request).await
        };

        if request_cc.only_if_cached {
            if stored.is_none() {
                stored = self.lookup(&request).await;
            }
            return match stored.filter(|s| s.entry.metadata.is_fresh(&request_cc)) {
                Some(s) => self.serve(s, CacheStatus::Hit, sink).await,
                None => {
                    tracing::debug!(uri = %request.uri, "only-if-cached without fresh entry");
                    self.emit(gateway_timeout(), CacheStatus::GatewayTimeout, Bytes::new(), sink)
                        .await
                }
            };
        }

        if let Some(s) = stored.take() {
            if s.entry.metadata.is_fresh(&request_cc) {
                tracing::debug!(uri = %request.uri, "Cache hit");
                return self.serve(s, CacheStatus::Hit, sink).await;
            }
            stored = Some(s);
        }

        self.fetch(transport, request, request_cc, stored, bypass, sink)
            .await
    }

    /// Stored variant for `request` with its body. Store failures count as a miss.
    async fn lookup(&self, request: &RequestInfo) -> Option<Stored> {
        let entry = match self.cache.get(request).await {
            Ok(entry) => entry?,
            Err(e) => {
                tracing::warn!(uri = %request.uri, error = %e, "Cache lookup failed");
                return None;
            }
        };
        match entry.read_body().await {
            Ok(body) => Some(Stored { entry, body }),
            Err(e) => {
                tracing::warn!(uri = %request.uri, error = %e, "Stored body unreadable, evicting");
                if let Err(e) = self.cache.evict(request).await {
                    tracing::warn!(uri = %request.uri, error = %e, "Cache eviction failed");
                }
                None
            }
        }
    }

    async fn fetch(
        &self,
        transport: &dyn Transport,
        request: RequestInfo,
        request_cc: CacheControl,
        stored: Option<Stored>,
        bypass: bool,
        sink: &mut dyn BodySink,
    ) -> Result<(ResponseInfo, CacheStatus), InterceptorError> {
        let outgoing = match &stored {
            Some(s) => apply_conditions(request.clone(), &s.entry.metadata),
            None => request.clone(),
        };
        let conditional = headers::has_conditions(&outgoing.headers);

        let request_time = self.clock.millis();
        let response = match transport.send(outgoing).await {
            Ok(response) => response,
            Err(err) => {
                if let Some(s) = stored {
                    if s.entry.metadata.within_stale_if_error(&request_cc) {
                        tracing::debug!(uri = %request.uri, error = %err, "Serving stale on transport error");
                        return self.serve(s, CacheStatus::StaleIfError, sink).await;
                    }
                    if s.entry.metadata.response_cache_control().must_revalidate && conditional {
                        return self
                            .emit(gateway_timeout(), CacheStatus::GatewayTimeout, Bytes::new(), sink)
                            .await;
                    }
                }
                return Err(InterceptorError::Transport(err));
            }
        };
        let response_time = self.clock.millis();

        if let Some(s) = stored {
            let status = response.info.status;
            if status == StatusCode::NOT_MODIFIED {
                s.entry
                    .metadata
                    .update(&response.info.headers, request_time, response_time);
                if let Err(e) = self.cache.put(&request, s.entry.clone()).await {
                    tracing::warn!(uri = %request.uri, error = %e, "Failed to store revalidated entry");
                }
                tracing::debug!(uri = %request.uri, "Revalidated");
                return self.serve(s, CacheStatus::Revalidated, sink).await;
            }
            if status.is_server_error() && s.entry.metadata.within_stale_if_error(&request_cc) {
                tracing::debug!(uri = %request.uri, %status, "Serving stale on server error");
                return self.serve(s, CacheStatus::StaleIfError, sink).await;
            }
            if !is_cacheable_response(&response.info) {
                if let Err(e) = self.cache.evict(&request).await {
                    tracing::warn!(uri = %request.uri, error = %e, "Cache eviction failed");
                }
            }
        }

        self.cache.record_miss();
        let status = if bypass {
            CacheStatus::Bypass
        } else {
            CacheStatus::Miss
        };

        let writer = if is_cacheable_response(&response.info) {
            let metadata = Arc::new(EntryMetadata::new(
                request_time,
                response_time,
                response.info.clone(),
                request.clone(),
                self.clock.clone(),
            ));
            if metadata.is_applicable() {
                match self.cache.writer(metadata).await {
                    Ok(writer) => Some(writer),
                    Err(e) => {
                        tracing::warn!(uri = %request.uri, error = %e, "Cache writer unavailable");
                        None
                    }
                }
            } else {
                None
            }
        } else {
            None
        };

        tracing::debug!(uri = %request.uri, status = ?status, stored = writer.is_some(), "Network response");
        let info = response.info;
        stream_body(response.body, writer, sink).await?;
        Ok((info, status))
    }

    /// Non-GET requests go to the network; unsafe ones invalidate what they touch.
    async fn pass(
        &self,
        transport: &dyn Transport,
        request: RequestInfo,
        sink: &mut dyn BodySink,
    ) -> Result<(ResponseInfo, CacheStatus), InterceptorError> {
        let response = transport
            .send(request.clone())
            .await
            .map_err(InterceptorError::Transport)?;

        if !request.method.is_safe() && !response.info.status.is_server_error() {
            self.invalidate(&request, &response.info).await;
        }

        let info = response.info;
        stream_body(response.body, None, sink).await?;
        Ok((info, CacheStatus::Pass))
    }

    async fn invalidate(&self, request: &RequestInfo, response: &ResponseInfo) {
        let host = request.uri.host();
        let mut targets = vec![request.clone()];
        for name in [LOCATION, CONTENT_LOCATION] {
            for uri in headers::effective_uris(&response.headers, &name, &request.uri) {
                if uri.host() == host {
                    targets.push(RequestInfo::get(uri));
                }
            }
        }

        for target in targets {
            tracing::debug!(uri = %target.uri, "Invalidating cached responses");
            if let Err(e) = self.cache.evict_all(&target).await {
                tracing::warn!(uri = %target.uri, error = %e, "Cache invalidation failed");
            }
        }
    }

    /// Serve a stored response, adding `Age` and, when stale, `Warning: 110`.
    async fn serve(
        &self,
        stored: Stored,
        status: CacheStatus,
        sink: &mut dyn BodySink,
    ) -> Result<(ResponseInfo, CacheStatus), InterceptorError> {
        let metadata = &stored.entry.metadata;
        metadata.update_warnings();
        self.cache.record_hit();

        let age = metadata.age();
        let mut info = metadata.response();
        info.headers.insert(AGE, HeaderValue::from(age.as_secs()));
        if age >= metadata.freshness_lifetime() {
            info.headers
                .append(WARNING, HeaderValue::from_static(WARNING_STALE));
        }

        self.emit(info, status, stored.body, sink).await
    }

    async fn emit(
        &self,
        info: ResponseInfo,
        status: CacheStatus,
        body: Bytes,
        sink: &mut dyn BodySink,
    ) -> Result<(ResponseInfo, CacheStatus), InterceptorError> {
        if !body.is_empty() {
            sink.write(body).await.map_err(InterceptorError::Sink)?;
        }
        sink.finish().await.map_err(InterceptorError::Sink)?;
        Ok((info, status))
    }
}

/// Copy `body` to `sink`, each chunk going to the cache writer first.
///
/// A failing cache writer is dropped without disturbing the caller.
async fn stream_body(
    mut body: BodyStream,
    mut writer: Option<Box<dyn BodySink>>,
    sink: &mut dyn BodySink,
) -> Result<(), InterceptorError> {
    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                if let Some(mut w) = writer.take() {
                    w.abort().await;
                }
                sink.abort().await;
                return Err(InterceptorError::Body(e));
            }
        };

        let mut failed = false;
        if let Some(w) = writer.as_mut() {
            if let Err(e) = w.write(chunk.clone()).await {
                tracing::warn!(error = %e, "Cache write failed, response will not be stored");
                w.abort().await;
                failed = true;
            }
        }
        if failed {
            writer = None;
        }

        if let Err(e) = sink.write(chunk).await {
            if let Some(mut w) = writer.take() {
                w.abort().await;
            }
            return Err(InterceptorError::Sink(e));
        }
    }

    if let Some(mut w) = writer {
        if let Err(e) = w.finish().await {
            tracing::warn!(error = %e, "Failed to complete cache write");
        }
    }
    sink.finish().await.map_err(InterceptorError::Sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::memory::InMemoryCache;
    use crate::cache::testing::T0;
    use http::header::{HeaderName, ACCEPT_ENCODING, CACHE_CONTROL, DATE, ETAG, VARY};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;

    type Reply = Result<TransportResponse, BoxError>;

    #[derive(Default)]
    struct MockTransport {
        replies: Mutex<VecDeque<Reply>>,
        sent: Mutex<Vec<RequestInfo>>,
    }

    impl MockTransport {
        fn reply(&self, status: u16, headers: &[(HeaderName, &str)], body: &'static [u8]) {
            let mut info = ResponseInfo::new(StatusCode::from_u16(status).unwrap());
            for (name, value) in headers {
                info.headers
                    .append(name.clone(), HeaderValue::from_str(value).unwrap());
            }
            self.replies
                .lock()
                .push_back(Ok(TransportResponse::full(info, Bytes::from_static(body))));
        }

        fn fail(&self) {
            self.replies.lock().push_back(Err("connection refused".into()));
        }

        fn sent(&self) -> usize {
            self.sent.lock().len()
        }

        fn last_sent(&self) -> RequestInfo {
            self.sent.lock().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&self, request: RequestInfo) -> Result<TransportResponse, BoxError> {
            self.sent.lock().push(request);
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err("no reply queued".into()))
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        store: Arc<InMemoryCache>,
        interceptor: CachingInterceptor,
        transport: MockTransport,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::at_millis(T0));
        let store = Arc::new(InMemoryCache::new(100, None));
        let interceptor = CachingInterceptor::with_clock(store.clone(), clock.clone());
        Fixture {
            clock,
            store,
            interceptor,
            transport: MockTransport::default(),
        }
    }

    fn get(uri: &str) -> RequestInfo {
        RequestInfo::get(uri.parse().unwrap())
    }

    impl Fixture {
        async fn run(&self, request: RequestInfo) -> CacheResponse {
            self.interceptor
                .execute(&self.transport, request)
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let f = fixture();
        f.transport.reply(200, &[(CACHE_CONTROL, "max-age=60")], b"hello");

        let first = f.run(get("http://example.com/a")).await;
        assert_eq!(first.status, CacheStatus::Miss);
        assert_eq!(first.body, Bytes::from_static(b"hello"));

        f.clock.advance(Duration::from_secs(10));
        let second = f.run(get("http://example.com/a")).await;
        assert_eq!(second.status, CacheStatus::Hit);
        assert_eq!(second.body, Bytes::from_static(b"hello"));
        assert_eq!(second.info.headers[AGE], "10");
        assert!(second.status.is_cached() && !first.status.is_cached());
        assert!(second.info.headers.get(WARNING).is_none());
        assert_eq!(f.transport.sent(), 1);

        let stats = f.store.stats().await.unwrap();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn test_uncacheable_responses_are_not_stored() {
        let f = fixture();
        f.transport.reply(200, &[(CACHE_CONTROL, "no-store")], b"a");
        f.transport.reply(500, &[(CACHE_CONTROL, "max-age=60")], b"b");
        f.transport.reply(200, &[(CACHE_CONTROL, "max-age=60"), (VARY, "*")], b"c");
        f.transport.reply(200, &[], b"d");

        for _ in 0..4 {
            f.run(get("http://example.com/a")).await;
        }
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn test_request_no_cache_bypasses_but_populates() {
        let f = fixture();
        f.transport.reply(200, &[(CACHE_CONTROL, "max-age=60")], b"v1");
        f.transport.reply(200, &[(CACHE_CONTROL, "max-age=60")], b"v2");
        f.run(get("http://example.com/a")).await;

        let bypass = f
            .run(get("http://example.com/a").header(CACHE_CONTROL, HeaderValue::from_static("no-cache")))
            .await;
        assert_eq!(bypass.status, CacheStatus::Bypass);
        assert_eq!(bypass.body, Bytes::from_static(b"v2"));

        let hit = f.run(get("http://example.com/a")).await;
        assert_eq!(hit.status, CacheStatus::Hit);
        assert_eq!(hit.body, Bytes::from_static(b"v2"));
    }

    #[tokio::test]
    async fn test_only_if_cached() {
        let f = fixture();
        let only = || {
            get("http://example.com/a")
                .header(CACHE_CONTROL, HeaderValue::from_static("only-if-cached"))
        };

        let miss = f.run(only()).await;
        assert_eq!(miss.status, CacheStatus::GatewayTimeout);
        assert_eq!(miss.info.status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(f.transport.sent(), 0);

        f.transport.reply(200, &[(CACHE_CONTROL, "max-age=60")], b"x");
        f.run(get("http://example.com/a")).await;
        assert_eq!(f.run(only()).await.status, CacheStatus::Hit);

        f.clock.advance(Duration::from_secs(61));
        assert_eq!(f.run(only()).await.status, CacheStatus::GatewayTimeout);
        assert_eq!(f.transport.sent(), 1);
    }

    #[tokio::test]
    async fn test_revalidation_with_304() {
        let f = fixture();
        f.transport.reply(
            200,
            &[(CACHE_CONTROL, "max-age=1"), (ETAG, "\"v1\"")],
            b"body",
        );
        f.run(get("http://example.com/a")).await;

        f.clock.advance(Duration::from_secs(5));
        f.transport
            .reply(304, &[(CACHE_CONTROL, "max-age=100")], b"");
        let revalidated = f.run(get("http://example.com/a")).await;

        assert_eq!(revalidated.status, CacheStatus::Revalidated);
        assert_eq!(revalidated.body, Bytes::from_static(b"body"));
        let sent = f.transport.last_sent();
        assert_eq!(sent.headers[IF_NONE_MATCH], "\"v1\"");
        assert!(sent.headers.contains_key(IF_MODIFIED_SINCE));

        // The refreshed lifetime now applies
        f.clock.advance(Duration::from_secs(50));
        assert_eq!(f.run(get("http://example.com/a")).await.status, CacheStatus::Hit);
        assert_eq!(f.transport.sent(), 2);
    }

    #[tokio::test]
    async fn test_changed_response_replaces_stale_entry() {
        let f = fixture();
        f.transport
            .reply(200, &[(CACHE_CONTROL, "max-age=1"), (ETAG, "\"v1\"")], b"old");
        f.run(get("http://example.com/a")).await;
        f.clock.advance(Duration::from_secs(5));

        f.transport
            .reply(200, &[(CACHE_CONTROL, "max-age=60"), (ETAG, "\"v2\"")], b"new");
        assert_eq!(f.run(get("http://example.com/a")).await.status, CacheStatus::Miss);

        let hit = f.run(get("http://example.com/a")).await;
        assert_eq!(hit.status, CacheStatus::Hit);
        assert_eq!(hit.body, Bytes::from_static(b"new"));
        assert_eq!(f.store.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_entry_evicted_when_replacement_uncacheable() {
        let f = fixture();
        f.transport
            .reply(200, &[(CACHE_CONTROL, "max-age=1"), (ETAG, "\"v1\"")], b"old");
        f.run(get("http://example.com/a")).await;
        f.clock.advance(Duration::from_secs(5));

        f.transport.reply(200, &[(CACHE_CONTROL, "no-store")], b"new");
        f.run(get("http://example.com/a")).await;
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn test_stale_if_error_on_server_error_and_window_expiry() {
        let f = fixture();
        f.transport.reply(
            200,
            &[(CACHE_CONTROL, "max-age=1,stale-if-error=10")],
            b"cached",
        );
        f.run(get("http://example.com/a")).await;

        f.clock.advance(Duration::from_secs(5));
        f.transport.reply(500, &[], b"boom");
        let stale = f.run(get("http://example.com/a")).await;
        assert_eq!(stale.status, CacheStatus::StaleIfError);
        assert_eq!(stale.body, Bytes::from_static(b"cached"));
        assert_eq!(stale.info.headers[WARNING], WARNING_STALE);

        f.clock.advance(Duration::from_secs(10));
        f.transport.reply(500, &[], b"boom");
        let error = f.run(get("http://example.com/a")).await;
        assert_eq!(error.info.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.body, Bytes::from_static(b"boom"));
    }

    #[tokio::test]
    async fn test_stale_if_error_on_transport_error() {
        let f = fixture();
        f.transport.reply(
            200,
            &[(CACHE_CONTROL, "max-age=1"), (DATE, &headers::format_http_date(T0))],
            b"cached",
        );
        f.run(get("http://example.com/a")).await;
        f.clock.advance(Duration::from_secs(5));

        f.transport.fail();
        let request = get("http://example.com/a")
            .header(CACHE_CONTROL, HeaderValue::from_static("stale-if-error=60"));
        let stale = f.run(request).await;
        assert_eq!(stale.status, CacheStatus::StaleIfError);

        f.transport.fail();
        let result = f
            .interceptor
            .execute(&f.transport, get("http://example.com/a"))
            .await;
        assert!(matches!(result, Err(InterceptorError::Transport(_))));
    }

    #[tokio::test]
    async fn test_must_revalidate_transport_error_is_gateway_timeout() {
        let f = fixture();
        f.transport.reply(
            200,
            &[(CACHE_CONTROL, "max-age=1, must-revalidate"), (ETAG, "\"e\"")],
            b"cached",
        );
        f.run(get("http://example.com/a")).await;
        f.clock.advance(Duration::from_secs(5));

        f.transport.fail();
        let response = f.run(get("http://example.com/a")).await;
        assert_eq!(response.status, CacheStatus::GatewayTimeout);
        assert_eq!(response.info.status, StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_max_stale_serves_with_warning() {
        let f = fixture();
        f.transport.reply(200, &[(CACHE_CONTROL, "max-age=1")], b"x");
        f.run(get("http://example.com/a")).await;
        f.clock.advance(Duration::from_secs(5));

        let request = get("http://example.com/a")
            .header(CACHE_CONTROL, HeaderValue::from_static("max-stale=60"));
        let response = f.run(request).await;
        assert_eq!(response.status, CacheStatus::Hit);
        assert_eq!(response.info.headers[WARNING], WARNING_STALE);
    }

    #[tokio::test]
    async fn test_vary_variants_are_separate() {
        let f = fixture();
        let with = |encoding: &'static str| {
            get("http://example.com/v").header(ACCEPT_ENCODING, HeaderValue::from_static(encoding))
        };
        f.transport.reply(
            200,
            &[(CACHE_CONTROL, "max-age=60"), (VARY, "Accept-Encoding")],
            b"gzip",
        );
        f.transport.reply(
            200,
            &[(CACHE_CONTROL, "max-age=60"), (VARY, "Accept-Encoding")],
            b"br",
        );

        assert_eq!(f.run(with("gzip")).await.status, CacheStatus::Miss);
        assert_eq!(f.run(with("br")).await.status, CacheStatus::Miss);
        assert_eq!(f.run(with("gzip")).await.body, Bytes::from_static(b"gzip"));
        assert_eq!(f.run(with("br")).await.body, Bytes::from_static(b"br"));
        assert_eq!(f.transport.sent(), 2);
    }

    #[tokio::test]
    async fn test_unsafe_method_invalidates_related_uris() {
        let f = fixture();
        for uri in [
            "http://example.com/items",
            "http://example.com/items/1",
            "http://example.com/items/2",
            "http://other.com/items/3",
        ] {
            f.transport.reply(200, &[(CACHE_CONTROL, "max-age=60")], b"x");
            f.run(get(uri)).await;
        }
        assert_eq!(f.store.len(), 4);

        f.transport.reply(
            201,
            &[
                (LOCATION, "/items/1"),
                (CONTENT_LOCATION, "http://other.com/items/3"),
            ],
            b"",
        );
        let post = RequestInfo::new(Method::POST, "http://example.com/items".parse().unwrap());
        assert_eq!(f.run(post).await.status, CacheStatus::Pass);

        assert_eq!(f.store.len(), 2);
        for (uri, cached) in [
            ("http://example.com/items", false),
            ("http://example.com/items/1", false),
            ("http://example.com/items/2", true),
            ("http://other.com/items/3", true),
        ] {
            let found = f.store.get(&get(uri)).await.unwrap().is_some();
            assert_eq!(found, cached, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_server_error_does_not_invalidate() {
        let f = fixture();
        f.transport.reply(200, &[(CACHE_CONTROL, "max-age=60")], b"x");
        f.run(get("http://example.com/items")).await;

        f.transport.reply(503, &[], b"");
        let delete = RequestInfo::new(Method::DELETE, "http://example.com/items".parse().unwrap());
        f.run(delete).await;
        assert_eq!(f.store.len(), 1);
    }

    #[tokio::test]
    async fn test_head_is_passed_without_invalidation() {
        let f = fixture();
        f.transport.reply(200, &[(CACHE_CONTROL, "max-age=60")], b"x");
        f.run(get("http://example.com/a")).await;

        f.transport.reply(200, &[], b"");
        let head = RequestInfo::new(Method::HEAD, "http://example.com/a".parse().unwrap());
        assert_eq!(f.run(head).await.status, CacheStatus::Pass);
        assert_eq!(f.store.len(), 1);
    }

    struct FailingSink;

    #[async_trait]
    impl BodySink for FailingSink {
        async fn write(&mut self, _chunk: Bytes) -> Result<(), CacheError> {
            Err(CacheError::StorageFull)
        }

        async fn finish(&mut self) -> Result<(), CacheError> {
            Ok(())
        }

        async fn abort(&mut self) {}
    }

    struct BrokenStore;

    #[async_trait]
    impl Cache for BrokenStore {
        async fn get(&self, _request: &RequestInfo) -> Result<Option<CacheEntry>, CacheError> {
            Err(CacheError::IoError(std::io::Error::new(std::io::ErrorKind::Other, "disk gone")))
        }

        async fn put(&self, _request: &RequestInfo, _entry: CacheEntry) -> Result<(), CacheError> {
            Err(CacheError::StorageFull)
        }

        async fn evict(&self, _request: &RequestInfo) -> Result<(), CacheError> {
            Ok(())
        }

        async fn evict_all(&self, _request: &RequestInfo) -> Result<(), CacheError> {
            Ok(())
        }

        async fn clear(&self) -> Result<(), CacheError> {
            Ok(())
        }

        async fn writer(
            &self,
            _metadata: Arc<EntryMetadata>,
        ) -> Result<Box<dyn BodySink>, CacheError> {
            Ok(Box::new(FailingSink))
        }

        async fn stats(&self) -> Result<crate::cache::stats::CacheStats, CacheError> {
            Ok(Default::default())
        }
    }

    #[tokio::test]
    async fn test_store_failures_never_reach_the_caller() {
        let interceptor = CachingInterceptor::new(Arc::new(BrokenStore));
        let transport = MockTransport::default();
        transport.reply(200, &[(CACHE_CONTROL, "max-age=60")], b"payload");

        let response = interceptor
            .execute(&transport, get("http://example.com/a"))
            .await
            .unwrap();
        assert_eq!(response.status, CacheStatus::Miss);
        assert_eq!(response.body, Bytes::from_static(b"payload"));
    }

    #[tokio::test]
    async fn test_body_error_aborts_cache_write() {
        let f = fixture();
        let mut info = ResponseInfo::new(StatusCode::OK);
        info.headers
            .insert(CACHE_CONTROL, HeaderValue::from_static("max-age=60"));
        let chunks: Vec<Result<Bytes, BoxError>> =
            vec![Ok(Bytes::from_static(b"part")), Err("reset".into())];
        f.transport
            .replies
            .lock()
            .push_back(Ok(TransportResponse::new(info, stream::iter(chunks).boxed())));

        let result = f
            .interceptor
            .execute(&f.transport, get("http://example.com/a"))
            .await;
        assert!(matches!(result, Err(InterceptorError::Body(_))));
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn test_heuristic_warning_on_served_response() {
        let f = fixture();
        let day = 24 * 60 * 60 * 1000;
        f.transport.reply(
            200,
            &[
                (DATE, &headers::format_http_date(T0)),
                (http::header::LAST_MODIFIED, &headers::format_http_date(T0 - 10 * day)),
            ],
            b"x",
        );
        f.run(get("http://example.com/a")).await;

        // Heuristic lifetime is one day; stale after that, served with max-stale
        f.clock.advance(Duration::from_secs(25 * 60 * 60));
        let request = get("http://example.com/a")
            .header(CACHE_CONTROL, HeaderValue::from_static("max-stale"));
        let response = f.run(request).await;

        let warnings: Vec<_> = response.info.headers.get_all(WARNING).iter().collect();
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().any(|w| w.as_bytes().starts_with(b"113")));
        assert!(warnings.iter().any(|w| w.as_bytes().starts_with(b"110")));
    }
}
