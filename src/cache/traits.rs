//! Store contract
//!
//! `Cache` is implemented by the in-memory store, the disk store, the
//! filtering decorator and the null store. `BodySink` is how a response body
//! reaches a store while it is still streaming from the network.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use super::entry::{CacheEntry, RequestInfo};
use super::error::CacheError;
use super::metadata::EntryMetadata;
use super::stats::CacheStats;

/// Cache trait for the different store implementations
#[async_trait]
pub trait Cache: Send + Sync {
    /// Stored variant matching `request`, fresh or not
    async fn get(&self, request: &RequestInfo) -> Result<Option<CacheEntry>, CacheError>;

    /// Store an entry, replacing the variant it matches
    ///
    /// An entry that can never fit is silently dropped.
    async fn put(&self, request: &RequestInfo, entry: CacheEntry) -> Result<(), CacheError>;

    /// Remove the variant matching `request`
    async fn evict(&self, request: &RequestInfo) -> Result<(), CacheError>;

    /// Remove every variant stored for the request URI
    async fn evict_all(&self, request: &RequestInfo) -> Result<(), CacheError>;

    /// Remove everything
    async fn clear(&self) -> Result<(), CacheError>;

    /// Sink that stores a body for `metadata` once it completes
    async fn writer(&self, metadata: Arc<EntryMetadata>) -> Result<Box<dyn BodySink>, CacheError>;

    /// Get cache statistics
    async fn stats(&self) -> Result<CacheStats, CacheError>;

    fn record_hit(&self) {}

    fn record_miss(&self) {}

    /// Release resources; calling it again is a no-op
    async fn close(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Streaming consumer of a response body.
///
/// Exactly one of `finish` or `abort` ends the stream.
#[async_trait]
pub trait BodySink: Send {
    async fn write(&mut self, chunk: Bytes) -> Result<(), CacheError>;

    async fn finish(&mut self) -> Result<(), CacheError>;

    async fn abort(&mut self);
}

/// Sink that drops everything.
#[derive(Debug, Default)]
pub struct DiscardSink;

#[async_trait]
impl BodySink for DiscardSink {
    async fn write(&mut self, _chunk: Bytes) -> Result<(), CacheError> {
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn abort(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockCache;

    #[async_trait]
    impl Cache for MockCache {
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

        async fn writer(
            &self,
            _metadata: Arc<EntryMetadata>,
        ) -> Result<Box<dyn BodySink>, CacheError> {
            Ok(Box::new(DiscardSink))
        }

        async fn stats(&self) -> Result<CacheStats, CacheError> {
            Ok(CacheStats::default())
        }
    }

    #[test]
    fn test_cache_trait_is_object_safe() {
        let _cache: Arc<dyn Cache> = Arc::new(MockCache);
    }

    #[tokio::test]
    async fn test_default_methods() {
        let cache = MockCache;
        cache.record_hit();
        cache.record_miss();
        assert!(cache.close().await.is_ok());
        assert_eq!(cache.stats().await.unwrap(), CacheStats::default());
    }

    #[tokio::test]
    async fn test_discard_sink() {
        let mut sink = DiscardSink;
        sink.write(Bytes::from_static(b"abc")).await.unwrap();
        sink.finish().await.unwrap();
        sink.abort().await;
    }
}
