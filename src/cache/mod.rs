//! RFC 7234 response cache
//!
//! The pieces, bottom up:
//! - [`CacheControl`], [`EntryMetadata`]: directive parsing and freshness
//! - [`LruMultimap`]: URI-keyed LRU holding one entry per `Vary` variant
//! - [`InMemoryCache`], [`DiskCache`]: the stores behind the [`Cache`] trait
//! - [`FilteringCache`], [`NullCache`]: decorators and the no-op store
//! - [`CachingInterceptor`]: the decision protocol in front of a [`Transport`]

pub mod builder;
pub mod clock;
pub mod config;
pub(crate) mod constrained;
pub mod control;
pub mod disk;
pub mod entry;
pub mod error;
pub mod filtering;
pub mod headers;
pub mod interceptor;
pub mod lru;
pub mod memory;
pub mod metadata;
pub mod stats;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use self::builder::{DiskCacheBuilder, InMemoryCacheBuilder};
pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::config::{CacheConfig, DiskCacheConfig, EncryptionConfig, MemoryCacheConfig};
pub use self::control::CacheControl;
pub use self::disk::{DiskCache, EncryptionAlgorithm};
pub use self::entry::{CacheEntry, EntryBody, RequestInfo, ResponseInfo};
pub use self::error::CacheError;
pub use self::filtering::{FilteringCache, RequestFilter, ResponseFilter};
pub use self::interceptor::{
    BoxError, BufferSink, CacheResponse, CacheStatus, CachingInterceptor, InterceptorError,
    Transport, TransportResponse,
};
pub use self::lru::LruMultimap;
pub use self::memory::{InMemoryCache, NullCache};
pub use self::metadata::EntryMetadata;
pub use self::stats::CacheStats;
pub use self::traits::{BodySink, Cache};
