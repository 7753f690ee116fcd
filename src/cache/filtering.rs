//! Filtering decorator
//!
//! Wraps another store and only lets through requests (and responses) that
//! the configured predicates accept.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use super::entry::{CacheEntry, RequestInfo, ResponseInfo};
use super::error::CacheError;
use super::metadata::EntryMetadata;
use super::stats::CacheStats;
use super::traits::{BodySink, Cache, DiscardSink};

pub type RequestFilter = Arc<dyn Fn(&RequestInfo) -> bool + Send + Sync>;
pub type ResponseFilter = Arc<dyn Fn(&ResponseInfo) -> bool + Send + Sync>;

/// Combine two request predicates; both must accept.
pub(crate) fn and_request(first: Option<RequestFilter>, next: RequestFilter) -> RequestFilter {
    match first {
        Some(first) => Arc::new(move |r: &RequestInfo| first(r) && next(r)),
        None => next,
    }
}

/// Combine two response predicates; both must accept.
pub(crate) fn and_response(first: Option<ResponseFilter>, next: ResponseFilter) -> ResponseFilter {
    match first {
        Some(first) => Arc::new(move |r: &ResponseInfo| first(r) && next(r)),
        None => next,
    }
}

pub struct FilteringCache {
    delegate: Arc<dyn Cache>,
    request_filter: RequestFilter,
    response_filter: ResponseFilter,
}

impl FilteringCache {
    /// A missing predicate accepts everything.
    pub fn new(
        delegate: Arc<dyn Cache>,
        request_filter: Option<RequestFilter>,
        response_filter: Option<ResponseFilter>,
    ) -> Self {
        Self {
            delegate,
            request_filter: request_filter.unwrap_or_else(|| Arc::new(|_: &RequestInfo| true)),
            response_filter: response_filter.unwrap_or_else(|| Arc::new(|_: &ResponseInfo| true)),
        }
    }

    fn accepts(&self, request: &RequestInfo) -> bool {
        (self.request_filter)(request)
    }
}

impl fmt::Debug for FilteringCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilteringCache").finish_non_exhaustive()
    }
}

#[async_trait]
impl Cache for FilteringCache {
    async fn get(&self, request: &RequestInfo) -> Result<Option<CacheEntry>, CacheError> {
        if !self.accepts(request) {
            return Ok(None);
        }
        self.delegate.get(request).await
    }

    async fn put(&self, request: &RequestInfo, entry: CacheEntry) -> Result<(), CacheError> {
        if !self.accepts(request) {
            return Ok(());
        }
        self.delegate.put(request, entry).await
    }

    async fn evict(&self, request: &RequestInfo) -> Result<(), CacheError> {
        if !self.accepts(request) {
            return Ok(());
        }
        self.delegate.evict(request).await
    }

    async fn evict_all(&self, request: &RequestInfo) -> Result<(), CacheError> {
        if !self.accepts(request) {
            return Ok(());
        }
        self.delegate.evict_all(request).await
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.delegate.clear().await
    }

    async fn writer(&self, metadata: Arc<EntryMetadata>) -> Result<Box<dyn BodySink>, CacheError> {
        if !(self.response_filter)(&metadata.response()) || !self.accepts(metadata.request()) {
            tracing::debug!(uri = %metadata.request().uri, "Response filtered out of cache");
            return Ok(Box::new(DiscardSink));
        }
        self.delegate.writer(metadata).await
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        self.delegate.stats().await
    }

    fn record_hit(&self) {
        self.delegate.record_hit();
    }

    fn record_miss(&self) {
        self.delegate.record_miss();
    }

    async fn close(&self) -> Result<(), CacheError> {
        self.delegate.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::InMemoryCache;
    use crate::cache::testing::{entry_for, request_with, response_entry};
    use bytes::Bytes;
    use http::header::HeaderName;
    use http::StatusCode;

    fn not_private() -> RequestFilter {
        Arc::new(|r: &RequestInfo| !r.uri.path().starts_with("/private"))
    }

    fn filtered(
        request_filter: Option<RequestFilter>,
        response_filter: Option<ResponseFilter>,
    ) -> (Arc<InMemoryCache>, FilteringCache) {
        let store = Arc::new(InMemoryCache::new(10, None));
        let cache = FilteringCache::new(store.clone(), request_filter, response_filter);
        (store, cache)
    }

    #[tokio::test]
    async fn test_rejected_requests_are_not_stored_or_served() {
        let (store, cache) = filtered(Some(not_private()), None);
        let (private, entry) = response_entry("http://example.com/private/a", &[], b"x");

        cache.put(&private, entry.clone()).await.unwrap();
        assert!(store.is_empty());

        store.put(&private, entry).await.unwrap();
        assert!(cache.get(&private).await.unwrap().is_none());

        cache.evict(&private).await.unwrap();
        cache.evict_all(&private).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_accepted_requests_pass_through() {
        let (store, cache) = filtered(Some(not_private()), None);
        let (public, entry) = response_entry("http://example.com/public", &[], b"x");

        cache.put(&public, entry).await.unwrap();
        assert!(cache.get(&public).await.unwrap().is_some());

        cache.evict(&public).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_writer_requires_both_filters() {
        let only_ok: ResponseFilter = Arc::new(|r: &ResponseInfo| r.status == StatusCode::OK);
        let (store, cache) = filtered(Some(not_private()), Some(only_ok));

        let public = request_with("http://example.com/public", &[]);
        let private = request_with("http://example.com/private/a", &[]);
        let not_found = entry_for(&public, &[], b"");
        let mut response = not_found.metadata.response();
        response.status = StatusCode::NOT_FOUND;
        let not_found_meta = Arc::new(EntryMetadata::new(
            0,
            0,
            response,
            public.clone(),
            not_found.metadata.clock().clone(),
        ));

        for metadata in [
            entry_for(&private, &[], b"").metadata,
            not_found_meta,
            entry_for(&public, &[], b"").metadata,
        ] {
            let mut sink = cache.writer(metadata).await.unwrap();
            sink.write(Bytes::from_static(b"body")).await.unwrap();
            sink.finish().await.unwrap();
        }

        assert_eq!(store.len(), 1);
        assert!(store.get(&public).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clear_and_stats_always_delegate() {
        let (store, cache) = filtered(Some(Arc::new(|_: &RequestInfo| false)), None);
        let (request, entry) = response_entry("http://example.com/a", &[], b"x");
        store.put(&request, entry).await.unwrap();

        cache.record_hit();
        assert_eq!(cache.stats().await.unwrap().hits, 1);
        assert_eq!(cache.stats().await.unwrap().current_item_count, 1);

        cache.clear().await.unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_and_chaining() {
        let header = HeaderName::from_static("x-cacheable");
        let has_header: RequestFilter = {
            let header = header.clone();
            Arc::new(move |r: &RequestInfo| r.headers.contains_key(&header))
        };
        let combined = and_request(Some(not_private()), has_header);

        assert!(combined(&request_with("http://example.com/a", &[(header.clone(), "1")])));
        assert!(!combined(&request_with("http://example.com/a", &[])));
        assert!(!combined(&request_with("http://example.com/private", &[(header, "1")])));

        let any: ResponseFilter = Arc::new(|_: &ResponseInfo| true);
        let none: ResponseFilter = Arc::new(|_: &ResponseInfo| false);
        let response = ResponseInfo::new(StatusCode::OK);
        assert!(!and_response(Some(any), none)(&response));
    }
}
