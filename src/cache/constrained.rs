//! Entry- and byte-bounded variant index shared by the stores.
//!
//! Wraps an [`LruMultimap`] keyed by request URI. The running byte total is
//! kept by an eviction listener, so every way a value can leave the map
//! (capacity, replacement, explicit eviction, clear) is accounted for.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::entry::{CacheEntry, RequestInfo};
use super::lru::LruMultimap;
use super::metadata::EntryMetadata;

/// A value the index can weigh and match against a request.
pub(crate) trait Weighted {
    fn weight(&self) -> u64;

    fn metadata(&self) -> &EntryMetadata;
}

impl Weighted for CacheEntry {
    fn weight(&self) -> u64 {
        self.body_size()
    }

    fn metadata(&self) -> &EntryMetadata {
        &self.metadata
    }
}

pub(crate) struct ConstrainedIndex<V> {
    map: LruMultimap<String, V>,
    bytes: Arc<AtomicU64>,
    max_bytes: Option<u64>,
}

fn variant_of<'r, V: Weighted + 'r>(
    request: &'r RequestInfo,
) -> impl FnOnce(&[&V]) -> Option<usize> + 'r {
    move |values: &[&V]| {
        values
            .iter()
            .position(|v| v.metadata().matches_variant(request))
    }
}

impl<V> ConstrainedIndex<V>
where
    V: Weighted + Send + 'static,
{
    /// `max_bytes` of `None` means no byte ceiling.
    pub fn new(max_items: usize, max_bytes: Option<u64>) -> Self {
        let bytes = Arc::new(AtomicU64::new(0));
        let mut map = LruMultimap::new(max_items);

        let counter = bytes.clone();
        map.add_eviction_listener(move |v: &V| {
            counter.fetch_sub(v.weight(), Ordering::Relaxed);
        });

        Self {
            map,
            bytes,
            max_bytes,
        }
    }

    pub fn add_eviction_listener<F>(&mut self, listener: F)
    where
        F: FnMut(&V) + Send + 'static,
    {
        self.map.add_eviction_listener(listener);
    }

    pub fn get(&self, request: &RequestInfo) -> Option<&V> {
        self.map.get_single(&request.cache_key(), variant_of(request))
    }

    /// Store `value` as the variant for `request`.
    ///
    /// Evicts least recently written values until it fits. A value heavier
    /// than the whole ceiling is rejected and nothing changes; returns
    /// whether the value was stored.
    pub fn put(&mut self, request: &RequestInfo, value: V) -> bool {
        let weight = value.weight();
        if let Some(max) = self.max_bytes {
            if weight > max {
                return false;
            }
            while self.bytes().saturating_add(weight) > max && self.map.evict_eldest() {}
        }

        self.bytes.fetch_add(weight, Ordering::Relaxed);
        self.map
            .put_single(request.cache_key(), value, variant_of(request));
        true
    }

    pub fn remove(&mut self, request: &RequestInfo) -> Option<V> {
        self.map.remove(&request.cache_key(), variant_of(request))
    }

    pub fn evict_all(&mut self, request: &RequestInfo) {
        self.map.evict_all(&request.cache_key());
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn map_len(&self) -> usize {
        self.map.map_len()
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn max_bytes(&self) -> Option<u64> {
        self.max_bytes
    }
}
