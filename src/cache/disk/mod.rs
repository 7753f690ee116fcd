//! Disk-based cache implementation
//!
//! Each stored variant is a pair of files in the cache directory:
//! - `<hash>.data`: the body, written through a [`StreamFactory`]
//! - `<hash>.meta`: a [`MetadataRecord`] encoded by a [`MetadataSerializer`]
//!
//! Writes go to `<hash>.<uuid>.tmp` first and are renamed into place, so a
//! crash never leaves a half-written entry visible. The index lives in
//! memory and is rebuilt from the directory when the store opens.

pub use self::disk_cache::DiskCache;
pub use self::error::DiskCacheError;
pub use self::serializer::{
    BinaryMetadataSerializer, HeaderValueRecord, JsonMetadataSerializer, MetadataRecord,
    MetadataSerializer,
};
pub use self::stream::{
    EncryptedStreamFactory, EncryptionAlgorithm, EntryWriter, PlainStreamFactory, StreamFactory,
    KEY_LEN,
};

mod disk_cache;
mod error;
mod serializer;
mod stream;
mod types;
mod utils;
