//! Utility functions for disk cache

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::cache::metadata::EntryMetadata;

pub const DATA_EXTENSION: &str = "data";
pub const META_EXTENSION: &str = "meta";
pub const TEMP_EXTENSION: &str = "tmp";

/// SHA-256 hex of the method, the URI and the `Vary`-selected request
/// header values, so every variant gets its own file pair.
pub fn entry_hash(metadata: &EntryMetadata) -> String {
    let request = metadata.request();
    let mut hasher = Sha256::new();
    hasher.update(request.method.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(request.uri.to_string().as_bytes());

    let mut vary = metadata.vary_values();
    vary.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
    for (name, values) in vary {
        hasher.update(b"\n");
        hasher.update(name.as_str().as_bytes());
        hasher.update(b":");
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                hasher.update(b",");
            }
            hasher.update(value.as_bytes());
        }
    }
    hex::encode(hasher.finalize())
}

/// Data and metadata file paths of an entry
pub fn generate_paths(cache_dir: &Path, hash: &str) -> (PathBuf, PathBuf) {
    let data_path = cache_dir.join(format!("{}.{}", hash, DATA_EXTENSION));
    let meta_path = cache_dir.join(format!("{}.{}", hash, META_EXTENSION));
    (data_path, meta_path)
}

/// Unique temp file for an in-flight write of `hash`
pub fn temp_path(cache_dir: &Path, hash: &str) -> PathBuf {
    cache_dir.join(format!(
        "{}.{}.{}",
        hash,
        uuid::Uuid::new_v4().simple(),
        TEMP_EXTENSION
    ))
}

/// Delete an entry's files, tolerating already-missing ones
pub async fn remove_pair(cache_dir: &Path, hash: &str) {
    let (data_path, meta_path) = generate_paths(cache_dir, hash);
    for path in [meta_path, data_path] {
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "Failed to delete cache file");
            }
        }
    }
}
