//! Type definitions for disk cache

use std::sync::Arc;

use crate::cache::constrained::Weighted;
use crate::cache::metadata::EntryMetadata;

/// Index record of an entry whose files are on disk
#[derive(Debug, Clone)]
pub(crate) struct DiskEntry {
    pub hash: String,
    pub metadata: Arc<EntryMetadata>,
    /// Size of the `.data` file
    pub size: u64,
}

impl Weighted for DiskEntry {
    fn weight(&self) -> u64 {
        self.size
    }

    fn metadata(&self) -> &EntryMetadata {
        &self.metadata
    }
}
