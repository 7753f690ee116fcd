//! Error types for disk cache operations

use thiserror::Error;

use crate::cache::error::CacheError;

#[derive(Error, Debug)]
pub enum DiskCacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON metadata error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Binary metadata encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Binary metadata decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("Unsupported metadata version {0}")]
    UnsupportedVersion(u32),

    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("Encryption failure: {0}")]
    Crypto(String),

    #[error("Encrypted stream is truncated or tampered")]
    Tampered,

    #[error("Invalid disk cache configuration: {0}")]
    Config(String),
}

// Conversion to CacheError
impl From<DiskCacheError> for CacheError {
    fn from(err: DiskCacheError) -> Self {
        match err {
            DiskCacheError::Io(e) => CacheError::IoError(e),
            DiskCacheError::Json(e) => CacheError::SerializationError(e.to_string()),
            DiskCacheError::Encode(e) => CacheError::SerializationError(e.to_string()),
            DiskCacheError::Decode(e) => CacheError::SerializationError(e.to_string()),
            e @ (DiskCacheError::UnsupportedVersion(_) | DiskCacheError::InvalidMetadata(_)) => {
                CacheError::CorruptedEntry(e.to_string())
            }
            DiskCacheError::Crypto(msg) => CacheError::EncryptionError(msg),
            e @ DiskCacheError::Tampered => CacheError::EncryptionError(e.to_string()),
            DiskCacheError::Config(msg) => CacheError::ConfigurationError(msg),
        }
    }
}
