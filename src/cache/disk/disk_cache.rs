//! Main DiskCache implementation

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::error::DiskCacheError;
use super::serializer::{MetadataRecord, MetadataSerializer};
use super::stream::{EntryWriter, StreamFactory};
use super::types::DiskEntry;
use super::utils::{
    entry_hash, generate_paths, remove_pair, temp_path, DATA_EXTENSION, META_EXTENSION,
    TEMP_EXTENSION,
};
use crate::cache::clock::Clock;
use crate::cache::constrained::ConstrainedIndex;
use crate::cache::entry::{CacheEntry, DiskBody, EntryBody, RequestInfo};
use crate::cache::error::CacheError;
use crate::cache::metadata::EntryMetadata;
use crate::cache::stats::{CacheStats, CacheStatsTracker};
use crate::cache::traits::{BodySink, Cache, DiscardSink};

struct DiskInner {
    dir: PathBuf,
    serializer: Arc<dyn MetadataSerializer>,
    streams: Arc<dyn StreamFactory>,
    clock: Arc<dyn Clock>,
    index: Mutex<ConstrainedIndex<DiskEntry>>,
    /// Entries that left the index and whose files still have to go
    doomed: Arc<Mutex<Vec<DiskEntry>>>,
    stats: Arc<CacheStatsTracker>,
    closed: AtomicBool,
}

/// Durable store: one `<hash>.meta` and `<hash>.data` pair per variant.
#[derive(Clone)]
pub struct DiskCache {
    inner: Arc<DiskInner>,
}

impl DiskCache {
    /// Open the store in `dir`, creating it if needed, and restore every
    /// readable entry found there.
    ///
    /// Use [`crate::cache::DiskCacheBuilder`] for validated construction.
    pub async fn open(
        dir: impl Into<PathBuf>,
        max_items: usize,
        max_bytes: Option<u64>,
        serializer: Arc<dyn MetadataSerializer>,
        streams: Arc<dyn StreamFactory>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CacheError> {
        let stats = Arc::new(CacheStatsTracker::new());
        let doomed = Arc::new(Mutex::new(Vec::new()));

        let mut index = ConstrainedIndex::new(max_items, max_bytes);
        let queue = doomed.clone();
        let stats_clone = stats.clone();
        index.add_eviction_listener(move |entry: &DiskEntry| {
            queue.lock().push(entry.clone());
            stats_clone.increment_evictions();
        });

        let cache = Self {
            inner: Arc::new(DiskInner {
                dir: dir.into(),
                serializer,
                streams,
                clock,
                index: Mutex::new(index),
                doomed,
                stats,
                closed: AtomicBool::new(false),
            }),
        };
        cache.inner.load().await?;
        Ok(cache)
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Number of stored variants
    pub fn len(&self) -> usize {
        self.inner.index.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes of `.data` files tracked by the index
    pub fn bytes(&self) -> u64 {
        self.inner.index.lock().bytes()
    }
}

impl std::fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskCache")
            .field("dir", &self.inner.dir)
            .field("len", &self.len())
            .field("bytes", &self.bytes())
            .finish()
    }
}

impl DiskInner {
    /// Startup scan: drop leftovers of interrupted writes, restore the rest
    /// oldest response first.
    async fn load(&self) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut metas = Vec::new();
        let mut datas = HashSet::new();
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        while let Some(dir_entry) = dir.next_entry().await? {
            let path = dir_entry.path();
            let (Some(stem), Some(ext)) = (
                path.file_stem().and_then(|s| s.to_str()),
                path.extension().and_then(|e| e.to_str()),
            ) else {
                continue;
            };
            match ext {
                TEMP_EXTENSION => {
                    tracing::debug!(path = %path.display(), "Removing interrupted write");
                    let _ = tokio::fs::remove_file(&path).await;
                }
                META_EXTENSION => metas.push(stem.to_string()),
                DATA_EXTENSION => {
                    datas.insert(stem.to_string());
                }
                _ => {}
            }
        }

        let mut restored = Vec::with_capacity(metas.len());
        for hash in &metas {
            if !datas.remove(hash) {
                tracing::debug!(hash = %hash, "Removing metadata without body");
                remove_pair(&self.dir, hash).await;
                continue;
            }
            match self.read_entry(hash).await {
                Ok(entry) => restored.push(entry),
                Err(e) => {
                    tracing::warn!(hash = %hash, error = %e, "Skipping unreadable cache entry");
                }
            }
        }
        for hash in datas {
            tracing::debug!(hash = %hash, "Removing body without metadata");
            remove_pair(&self.dir, &hash).await;
        }

        restored.sort_by_key(|entry| entry.metadata.response_time_millis());
        let count = restored.len();
        {
            let mut index = self.index.lock();
            for entry in restored {
                let request = entry.metadata.request().clone();
                index.put(&request, entry);
            }
        }
        self.purge().await;

        tracing::info!(dir = %self.dir.display(), entries = count, "Disk cache opened");
        Ok(())
    }

    async fn read_entry(&self, hash: &str) -> Result<DiskEntry, DiskCacheError> {
        let (data_path, meta_path) = generate_paths(&self.dir, hash);
        let bytes = self.streams.read(&meta_path).await?;
        let metadata = self
            .serializer
            .decode(&bytes)?
            .into_metadata(self.clock.clone())?;
        if entry_hash(&metadata) != hash {
            return Err(DiskCacheError::InvalidMetadata(
                "metadata does not belong to this file".to_string(),
            ));
        }
        let size = tokio::fs::metadata(&data_path).await?.len();
        Ok(DiskEntry {
            hash: hash.to_string(),
            metadata: Arc::new(metadata),
            size,
        })
    }

    fn entry_of(&self, found: DiskEntry) -> CacheEntry {
        let (data_path, _) = generate_paths(&self.dir, &found.hash);
        CacheEntry {
            metadata: found.metadata,
            body: EntryBody::Disk(DiskBody {
                path: data_path,
                size: found.size,
                streams: self.streams.clone(),
            }),
        }
    }

    /// Write `<hash>.meta` through a temp file.
    async fn write_metadata(&self, hash: &str, metadata: &EntryMetadata) -> Result<(), CacheError> {
        let bytes = self
            .serializer
            .encode(&MetadataRecord::from_metadata(metadata))?;
        let temp = temp_path(&self.dir, hash);
        let (_, meta_path) = generate_paths(&self.dir, hash);

        let written = async {
            self.streams.write_all(&temp, &bytes).await?;
            tokio::fs::rename(&temp, &meta_path).await?;
            Ok::<_, DiskCacheError>(())
        }
        .await;
        if written.is_err() {
            let _ = tokio::fs::remove_file(&temp).await;
        }
        Ok(written?)
    }

    /// Make a fully written pair visible.
    async fn publish(&self, hash: String, metadata: Arc<EntryMetadata>, size: u64) {
        let request = metadata.request().clone();
        let stored = {
            let mut index = self.index.lock();
            let stored = index.put(
                &request,
                DiskEntry {
                    hash: hash.clone(),
                    metadata,
                    size,
                },
            );
            if !stored {
                // The files were just overwritten; an older copy must not stay indexed
                index.remove(&request);
            }
            stored
        };

        if stored {
            tracing::debug!(uri = %request.uri, hash = %hash, size, "Stored response on disk");
        } else {
            tracing::debug!(uri = %request.uri, size, "Response larger than disk cache, not stored");
            remove_pair(&self.dir, &hash).await;
        }
        self.purge().await;
    }

    /// Take a variant out of view before its files are overwritten. The old
    /// pair is gone before the new body lands, so a crash in between leaves
    /// only a body without metadata.
    async fn unpublish(&self, request: &RequestInfo, hash: &str) {
        {
            let mut index = self.index.lock();
            if index.get(request).is_some_and(|live| live.hash == hash) {
                index.remove(request);
            }
        }
        self.purge().await;
        remove_pair(&self.dir, hash).await;
    }

    async fn drop_variant(&self, request: &RequestInfo, hash: &str) {
        self.index.lock().remove(request);
        self.purge().await;
        remove_pair(&self.dir, hash).await;
    }

    /// Delete the files of evicted entries, outside the index lock.
    async fn purge(&self) {
        let doomed: Vec<String> = {
            let index = self.index.lock();
            let mut queue = self.doomed.lock();
            queue
                .drain(..)
                // A replacement by the same variant reuses the file names
                .filter(|old| {
                    index
                        .get(old.metadata.request())
                        .map_or(true, |live| live.hash != old.hash)
                })
                .map(|old| old.hash)
                .collect()
        };

        for hash in doomed {
            tracing::debug!(hash = %hash, "Deleting evicted cache files");
            remove_pair(&self.dir, &hash).await;
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Cache for DiskCache {
    async fn get(&self, request: &RequestInfo) -> Result<Option<CacheEntry>, CacheError> {
        let found = self.inner.index.lock().get(request).cloned();
        Ok(found.map(|entry| self.inner.entry_of(entry)))
    }

    async fn put(&self, _request: &RequestInfo, entry: CacheEntry) -> Result<(), CacheError> {
        if self.inner.is_closed() {
            return Ok(());
        }

        // An entry handed out by this store only needs its metadata rewritten
        if let EntryBody::Disk(body) = &entry.body {
            let hash = entry_hash(&entry.metadata);
            let (data_path, _) = generate_paths(&self.inner.dir, &hash);
            if body.path == data_path {
                if tokio::fs::metadata(&data_path).await.is_err() {
                    return Ok(());
                }
                self.inner.write_metadata(&hash, &entry.metadata).await?;
                self.inner
                    .publish(hash, entry.metadata.clone(), body.size)
                    .await;
                return Ok(());
            }
        }

        let body = entry.read_body().await?;
        let mut sink = self.writer(entry.metadata.clone()).await?;
        if let Err(e) = sink.write(body).await {
            sink.abort().await;
            return Err(e);
        }
        sink.finish().await
    }

    async fn evict(&self, request: &RequestInfo) -> Result<(), CacheError> {
        self.inner.index.lock().remove(request);
        self.inner.purge().await;
        Ok(())
    }

    async fn evict_all(&self, request: &RequestInfo) -> Result<(), CacheError> {
        self.inner.index.lock().evict_all(request);
        self.inner.purge().await;
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.inner.index.lock().clear();
        self.inner.purge().await;
        Ok(())
    }

    async fn writer(&self, metadata: Arc<EntryMetadata>) -> Result<Box<dyn BodySink>, CacheError> {
        if self.inner.is_closed() {
            return Ok(Box::new(DiscardSink));
        }

        let hash = entry_hash(&metadata);
        let temp = temp_path(&self.inner.dir, &hash);
        let writer = self.inner.streams.create(&temp).await?;
        let limit = self.inner.index.lock().max_bytes();

        Ok(Box::new(DiskSink {
            inner: self.inner.clone(),
            metadata,
            hash,
            temp: Some(temp),
            writer: Some(writer),
            written: 0,
            limit,
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
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(dir = %self.inner.dir.display(), "Disk cache closed");
        }
        Ok(())
    }
}

/// Streams a body into a temp file; the entry appears only on `finish`.
struct DiskSink {
    inner: Arc<DiskInner>,
    metadata: Arc<EntryMetadata>,
    hash: String,
    /// Present until the file is renamed or removed
    temp: Option<PathBuf>,
    writer: Option<Box<dyn EntryWriter>>,
    written: u64,
    limit: Option<u64>,
}

#[async_trait]
impl BodySink for DiskSink {
    async fn write(&mut self, chunk: Bytes) -> Result<(), CacheError> {
        if self.writer.is_none() {
            return Ok(());
        }
        self.written += chunk.len() as u64;
        if self.limit.is_some_and(|max| self.written > max) {
            // Could never be stored
            self.abort().await;
            return Ok(());
        }
        if let Some(writer) = self.writer.as_mut() {
            writer.write(&chunk).await?;
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), CacheError> {
        let (Some(writer), Some(temp)) = (self.writer.take(), self.temp.clone()) else {
            return Ok(());
        };
        let size = writer.finish().await?;
        if self.inner.is_closed() {
            self.abort().await;
            return Ok(());
        }

        self.inner
            .unpublish(self.metadata.request(), &self.hash)
            .await;
        let (data_path, _) = generate_paths(&self.inner.dir, &self.hash);
        tokio::fs::rename(&temp, &data_path).await?;
        self.temp = None;

        if let Err(e) = self.inner.write_metadata(&self.hash, &self.metadata).await {
            tracing::warn!(hash = %self.hash, error = %e, "Failed to write cache metadata");
            self.inner
                .drop_variant(self.metadata.request(), &self.hash)
                .await;
            return Err(e);
        }
        self.inner
            .publish(self.hash.clone(), self.metadata.clone(), size)
            .await;
        Ok(())
    }

    async fn abort(&mut self) {
        self.writer = None;
        if let Some(temp) = self.temp.take() {
            let _ = tokio::fs::remove_file(&temp).await;
        }
    }
}

impl Drop for DiskSink {
    fn drop(&mut self) {
        self.writer = None;
        if let Some(temp) = self.temp.take() {
            let _ = std::fs::remove_file(&temp);
        }
    }
}
