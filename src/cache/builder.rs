//! Store builders
//!
//! Builders validate their settings eagerly: a bad value is a
//! `CacheError::ConfigurationError` from `build()`, never a panic later.

use std::path::PathBuf;
use std::sync::Arc;

use super::clock::{Clock, SystemClock};
use super::disk::{
    DiskCache, EncryptedStreamFactory, EncryptionAlgorithm, JsonMetadataSerializer,
    MetadataSerializer, PlainStreamFactory, StreamFactory,
};
use super::entry::{RequestInfo, ResponseInfo};
use super::error::CacheError;
use super::filtering::{and_request, and_response, FilteringCache, RequestFilter, ResponseFilter};
use super::memory::InMemoryCache;
use super::traits::Cache;
use crate::constants::DEFAULT_MAX_ITEMS;

#[derive(Default, Clone)]
struct Filters {
    request: Option<RequestFilter>,
    response: Option<ResponseFilter>,
}

impl Filters {
    fn add_request(&mut self, filter: RequestFilter) {
        self.request = Some(and_request(self.request.take(), filter));
    }

    fn add_response(&mut self, filter: ResponseFilter) {
        self.response = Some(and_response(self.response.take(), filter));
    }

    fn wrap(self, store: Arc<dyn Cache>) -> Arc<dyn Cache> {
        if self.request.is_none() && self.response.is_none() {
            store
        } else {
            Arc::new(FilteringCache::new(store, self.request, self.response))
        }
    }
}

fn check_limits(max_items: usize, max_bytes: Option<u64>) -> Result<(), CacheError> {
    if max_items == 0 {
        return Err(CacheError::ConfigurationError(
            "max_items must be greater than 0".to_string(),
        ));
    }
    if max_bytes == Some(0) {
        return Err(CacheError::ConfigurationError(
            "max_bytes must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

/// Builder for [`InMemoryCache`]
#[derive(Clone)]
pub struct InMemoryCacheBuilder {
    max_items: usize,
    max_bytes: Option<u64>,
    filters: Filters,
}

impl Default for InMemoryCacheBuilder {
    fn default() -> Self {
        Self {
            max_items: DEFAULT_MAX_ITEMS,
            max_bytes: None,
            filters: Filters::default(),
        }
    }
}

impl InMemoryCacheBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    /// Ceiling on the total size of stored bodies
    pub fn max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    /// Only cache requests `filter` accepts; repeated calls must all accept.
    pub fn request_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&RequestInfo) -> bool + Send + Sync + 'static,
    {
        self.filters.add_request(Arc::new(filter));
        self
    }

    /// Only store responses `filter` accepts; repeated calls must all accept.
    pub fn response_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&ResponseInfo) -> bool + Send + Sync + 'static,
    {
        self.filters.add_response(Arc::new(filter));
        self
    }

    /// The bare store, ignoring any filters
    pub fn build_store(&self) -> Result<InMemoryCache, CacheError> {
        check_limits(self.max_items, self.max_bytes)?;
        Ok(InMemoryCache::new(self.max_items, self.max_bytes))
    }

    pub fn build(self) -> Result<Arc<dyn Cache>, CacheError> {
        let store = Arc::new(self.build_store()?);
        Ok(self.filters.wrap(store))
    }
}

/// Builder for [`DiskCache`]
#[derive(Clone)]
pub struct DiskCacheBuilder {
    dir: PathBuf,
    max_items: usize,
    max_bytes: Option<u64>,
    encryption: Option<(Vec<u8>, String)>,
    serializer: Arc<dyn MetadataSerializer>,
    clock: Arc<dyn Clock>,
    filters: Filters,
}

impl DiskCacheBuilder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_items: DEFAULT_MAX_ITEMS,
            max_bytes: None,
            encryption: None,
            serializer: Arc::new(JsonMetadataSerializer),
            clock: Arc::new(SystemClock),
            filters: Filters::default(),
        }
    }

    pub fn max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    /// Ceiling on the total size of `.data` files
    pub fn max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    /// Encrypt entry files. `algorithm` is `AES-256-GCM` or
    /// `CHACHA20-POLY1305`; the key must be 32 bytes.
    pub fn encryption(mut self, key: impl Into<Vec<u8>>, algorithm: impl Into<String>) -> Self {
        self.encryption = Some((key.into(), algorithm.into()));
        self
    }

    pub fn serializer(mut self, serializer: Arc<dyn MetadataSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Clock handed to metadata restored from disk
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn request_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&RequestInfo) -> bool + Send + Sync + 'static,
    {
        self.filters.add_request(Arc::new(filter));
        self
    }

    pub fn response_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&ResponseInfo) -> bool + Send + Sync + 'static,
    {
        self.filters.add_response(Arc::new(filter));
        self
    }

    fn streams(&self) -> Result<Arc<dyn StreamFactory>, CacheError> {
        match &self.encryption {
            None => Ok(Arc::new(PlainStreamFactory)),
            Some((key, algorithm)) => {
                let algorithm: EncryptionAlgorithm = algorithm.parse()?;
                Ok(Arc::new(EncryptedStreamFactory::new(key, algorithm)?))
            }
        }
    }

    /// Open the bare store, ignoring any filters
    pub async fn build_store(&self) -> Result<DiskCache, CacheError> {
        check_limits(self.max_items, self.max_bytes)?;
        if self.dir.as_os_str().is_empty() {
            return Err(CacheError::ConfigurationError(
                "cache directory must not be empty".to_string(),
            ));
        }
        let streams = self.streams()?;
        DiskCache::open(
            self.dir.clone(),
            self.max_items,
            self.max_bytes,
            self.serializer.clone(),
            streams,
            self.clock.clone(),
        )
        .await
    }

    pub async fn build(self) -> Result<Arc<dyn Cache>, CacheError> {
        let store = Arc::new(self.build_store().await?);
        Ok(self.filters.wrap(store))
    }
}
