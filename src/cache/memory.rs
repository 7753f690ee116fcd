//! Memory cache implementation
//!
//! This module provides in-memory cache implementations:
//! - `InMemoryCache`: entry- and byte-bounded store, LRU by write
//! - `NullCache`: No-op implementation for disabled caching

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::sync::Arc;

use super::constrained::ConstrainedIndex;
use super::entry::{CacheEntry, EntryBody, RequestInfo};
use super::error::CacheError;
use super::metadata::EntryMetadata;
use super::stats::{CacheStats, CacheStatsTracker};
use super::traits::{BodySink, Cache, DiscardSink};

struct MemoryInner {
    index: Mutex<ConstrainedIndex<CacheEntry>>,
    stats: Arc<CacheStatsTracker>,
}

impl MemoryInner {
    fn put(&self, request: &RequestInfo, entry: CacheEntry) {
        let size = entry.body_size();
        let stored = self.index.lock().put(request, entry);
        if stored {
            tracing::debug!(uri = %request.uri, size, "Stored response in memory cache");
        } else {
            tracing::debug!(uri = %request.uri, size, "Response larger than memory cache, not stored");
        }
    }
}

/// In-memory store keyed by request URI, one value per `Vary` variant.
#[derive(Clone)]
pub struct InMemoryCache {
    inner: Arc<MemoryInner>,
}

impl InMemoryCache {
    /// Create a store bounded to `max_items` entries and, optionally, `max_bytes` of bodies.
    ///
    /// Use [`crate::cache::InMemoryCacheBuilder`] for validated construction.
    pub fn new(max_items: usize, max_bytes: Option<u64>) -> Self {
        let stats = Arc::new(CacheStatsTracker::new());

        let mut index = ConstrainedIndex::new(max_items, max_bytes);
        let stats_clone = stats.clone();
        index.add_eviction_listener(move |_: &CacheEntry| stats_clone.increment_evictions());

        Self {
            inner: Arc::new(MemoryInner {
                index: Mutex::new(index),
                stats,
            }),
        }
    }

    /// Number of stored variants
    pub fn len(&self) -> usize {
        self.inner.index.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct URIs
    pub fn uri_count(&self) -> usize {
        self.inner.index.lock().map_len()
    }

    /// Total body bytes held
    pub fn bytes(&self) -> u64 {
        self.inner.index.lock().bytes()
    }
}

impl std::fmt::Debug for InMemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCache")
            .field("len", &self.len())
            .field("bytes", &self.bytes())
            .finish()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, request: &RequestInfo) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.inner.index.lock().get(request).cloned())
    }

    async fn put(&self, request: &RequestInfo, entry: CacheEntry) -> Result<(), CacheError> {
        let entry = if matches!(entry.body, EntryBody::Disk(_)) {
            let body = entry.read_body().await?;
            CacheEntry::in_memory(entry.metadata, body)
        } else {
            entry
        };
        self.inner.put(request, entry);
        Ok(())
    }

    async fn evict(&self, request: &RequestInfo) -> Result<(), CacheError> {
        self.inner.index.lock().remove(request);
        Ok(())
    }

    async fn evict_all(&self, request: &RequestInfo) -> Result<(), CacheError> {
        self.inner.index.lock().evict_all(request);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.inner.index.lock().clear();
        Ok(())
    }

    async fn writer(&self, metadata: Arc<EntryMetadata>) -> Result<Box<dyn BodySink>, CacheError> {
        let limit = self.inner.index.lock().max_bytes();
        Ok(Box::new(MemorySink {
            inner: self.inner.clone(),
            metadata,
            buffer: BytesMut::new(),
            limit,
            overflowed: false,
        }))
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let index = self.inner.index.lock();
        Ok(self.inner.stats.snapshot(
            index.bytes(),
            index.len() as u64,
            index.max_bytes().unwrap_or(0),
        ))
    }

    fn record_hit(&self) {
        self.inner.stats.increment_hits();
    }

    fn record_miss(&self) {
        self.inner.stats.increment_misses();
    }

    async fn close(&self) -> Result<(), CacheError> {
        self.inner.index.lock().clear();
        Ok(())
    }
}

/// Buffers a body and stores it once complete.
struct MemorySink {
    inner: Arc<MemoryInner>,
    metadata: Arc<EntryMetadata>,
    buffer: BytesMut,
    limit: Option<u64>,
    overflowed: bool,
}

#[async_trait]
impl BodySink for MemorySink {
    async fn write(&mut self, chunk: Bytes) -> Result<(), CacheError> {
        if self.overflowed {
            return Ok(());
        }
        if let Some(limit) = self.limit {
            if (self.buffer.len() + chunk.len()) as u64 > limit {
                // Could never be stored, stop buffering
                self.overflowed = true;
                self.buffer = BytesMut::new();
                return Ok(());
            }
        }
        self.buffer.extend_from_slice(&chunk);
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), CacheError> {
        if self.overflowed {
            return Ok(());
        }
        let body = std::mem::take(&mut self.buffer).freeze();
        let entry = CacheEntry::in_memory(self.metadata.clone(), body);
        self.inner.put(self.metadata.request(), entry);
        Ok(())
    }

    async fn abort(&mut self) {
        self.buffer = BytesMut::new();
        self.overflowed = true;
    }
}

/// NullCache is a no-op cache implementation used when caching is disabled
#[derive(Debug, Default)]
pub struct NullCache;

#[async_trait]
impl Cache for NullCache {
    async fn get(&self, _request: &RequestInfo) -> Result<Option<CacheEntry>, CacheError> {
        Ok(None)
    }

    async fn put(&self, _request: &RequestInfo, _entry: CacheEntry) -> Result<(), CacheError> {
        Ok(())
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

    async fn writer(&self, _metadata: Arc<EntryMetadata>) -> Result<Box<dyn BodySink>, CacheError> {
        Ok(Box::new(DiscardSink))
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        Ok(CacheStats::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::testing::{entry_for, request_with, response_entry};
    use http::header::{ACCEPT_ENCODING, USER_AGENT};

    #[tokio::test]
    async fn test_put_then_get() {
        let cache = InMemoryCache::new(10, None);
        let (request, entry) = response_entry("http://example.com/a", &[], b"body");

        cache.put(&request, entry).await.unwrap();
        let found = cache.get(&request).await.unwrap().unwrap();
        assert_eq!(found.read_body().await.unwrap(), Bytes::from_static(b"body"));
        assert_eq!(cache.bytes(), 4);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let cache = InMemoryCache::new(10, None);
        let request = request_with("http://example.com/missing", &[]);
        assert!(cache.get(&request).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_vary_isolation() {
        let cache = InMemoryCache::new(10, None);
        let gzip = request_with(
            "http://example.com/v",
            &[(ACCEPT_ENCODING, "gzip"), (USER_AGENT, "one")],
        );
        let br = request_with("http://example.com/v", &[(ACCEPT_ENCODING, "br")]);

        cache
            .put(&gzip, entry_for(&gzip, &[("vary", "Accept-Encoding")], b"gzip-body"))
            .await
            .unwrap();
        cache
            .put(&br, entry_for(&br, &[("vary", "Accept-Encoding")], b"br-body"))
            .await
            .unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.uri_count(), 1);

        let other_agent = request_with(
            "http://example.com/v",
            &[(ACCEPT_ENCODING, "gzip"), (USER_AGENT, "two")],
        );
        let hit = cache.get(&other_agent).await.unwrap().unwrap();
        assert_eq!(hit.read_body().await.unwrap(), Bytes::from_static(b"gzip-body"));

        let hit = cache.get(&br).await.unwrap().unwrap();
        assert_eq!(hit.read_body().await.unwrap(), Bytes::from_static(b"br-body"));

        let none = request_with("http://example.com/v", &[]);
        assert!(cache.get(&none).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_same_variant_replaces() {
        let cache = InMemoryCache::new(10, None);
        let (request, first) = response_entry("http://example.com/a", &[], b"first");
        let (_, second) = response_entry("http://example.com/a", &[], b"second!");

        cache.put(&request, first).await.unwrap();
        cache.put(&request, second).await.unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.bytes(), 7);
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.current_item_count, 1);
    }

    #[tokio::test]
    async fn test_max_items_evicts_eldest() {
        let cache = InMemoryCache::new(2, None);
        for i in 0..3 {
            let (request, entry) =
                response_entry(&format!("http://example.com/{}", i), &[], b"x");
            cache.put(&request, entry).await.unwrap();
        }

        assert_eq!(cache.len(), 2);
        let first = request_with("http://example.com/0", &[]);
        assert!(cache.get(&first).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_byte_budget_eviction() {
        let cache = InMemoryCache::new(100, Some(10));
        for (i, body) in [b"aaaa", b"bbbb", b"cccc"].iter().enumerate() {
            let (request, entry) =
                response_entry(&format!("http://example.com/{}", i), &[], *body);
            cache.put(&request, entry).await.unwrap();
        }

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.bytes(), 8);
        assert!(cache
            .get(&request_with("http://example.com/0", &[]))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_oversized_entry_is_rejected_without_eviction() {
        let cache = InMemoryCache::new(100, Some(10));
        let (small_req, small) = response_entry("http://example.com/small", &[], b"12345");
        cache.put(&small_req, small).await.unwrap();

        let (big_req, big) = response_entry("http://example.com/big", &[], b"12345678901");
        cache.put(&big_req, big).await.unwrap();

        assert!(cache.get(&big_req).await.unwrap().is_none());
        assert!(cache.get(&small_req).await.unwrap().is_some());
        assert_eq!(cache.bytes(), 5);
    }

    #[tokio::test]
    async fn test_evict_and_evict_all() {
        let cache = InMemoryCache::new(10, None);
        let gzip = request_with("http://example.com/v", &[(ACCEPT_ENCODING, "gzip")]);
        let br = request_with("http://example.com/v", &[(ACCEPT_ENCODING, "br")]);
        for r in [&gzip, &br] {
            cache
                .put(r, entry_for(r, &[("vary", "Accept-Encoding")], b"x"))
                .await
                .unwrap();
        }

        cache.evict(&gzip).await.unwrap();
        assert!(cache.get(&gzip).await.unwrap().is_none());
        assert!(cache.get(&br).await.unwrap().is_some());

        cache.evict_all(&gzip).await.unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.bytes(), 0);
    }

    #[tokio::test]
    async fn test_writer_stores_on_finish() {
        let cache = InMemoryCache::new(10, None);
        let (request, entry) = response_entry("http://example.com/w", &[], b"");

        let mut sink = cache.writer(entry.metadata.clone()).await.unwrap();
        sink.write(Bytes::from_static(b"hel")).await.unwrap();
        assert!(cache.get(&request).await.unwrap().is_none());
        sink.write(Bytes::from_static(b"lo")).await.unwrap();
        sink.finish().await.unwrap();

        let found = cache.get(&request).await.unwrap().unwrap();
        assert_eq!(found.read_body().await.unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_aborted_writer_stores_nothing() {
        let cache = InMemoryCache::new(10, None);
        let (request, entry) = response_entry("http://example.com/w", &[], b"");

        let mut sink = cache.writer(entry.metadata.clone()).await.unwrap();
        sink.write(Bytes::from_static(b"partial")).await.unwrap();
        sink.abort().await;
        drop(sink);

        assert!(cache.get(&request).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_writer_over_budget_stores_nothing() {
        let cache = InMemoryCache::new(10, Some(4));
        let (request, entry) = response_entry("http://example.com/w", &[], b"");

        let mut sink = cache.writer(entry.metadata.clone()).await.unwrap();
        sink.write(Bytes::from_static(b"hello")).await.unwrap();
        sink.finish().await.unwrap();

        assert!(cache.get(&request).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_hit_miss_counters() {
        let cache = InMemoryCache::new(10, Some(1024));
        cache.record_hit();
        cache.record_hit();
        cache.record_miss();

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.max_size_bytes, 1024);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let cache = InMemoryCache::new(10, None);
        let (request, entry) = response_entry("http://example.com/a", &[], b"x");
        cache.put(&request, entry).await.unwrap();

        cache.close().await.unwrap();
        cache.close().await.unwrap();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_puts() {
        let cache = InMemoryCache::new(64, Some(64 * 4));
        let mut handles = Vec::new();
        for t in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    let (request, entry) = response_entry(
                        &format!("http://example.com/{}/{}", t, i),
                        &[],
                        b"abcd",
                    );
                    cache.put(&request, entry).await.unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(cache.len(), 64);
        assert_eq!(cache.bytes(), 64 * 4);
    }

    #[tokio::test]
    async fn test_null_cache() {
        let cache = NullCache;
        let (request, entry) = response_entry("http://example.com/a", &[], b"x");
        cache.put(&request, entry.clone()).await.unwrap();
        assert!(cache.get(&request).await.unwrap().is_none());

        let mut sink = cache.writer(entry.metadata).await.unwrap();
        sink.write(Bytes::from_static(b"x")).await.unwrap();
        sink.finish().await.unwrap();
        assert_eq!(cache.stats().await.unwrap(), CacheStats::default());
    }
}
