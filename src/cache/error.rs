//! Cache error types
//!
//! This module defines error types for cache operations.

/// Cache error types
#[derive(Debug)]
pub enum CacheError {
    /// Cache storage is full
    StorageFull,
    /// I/O error (for disk cache)
    IoError(std::io::Error),
    /// Configuration error, raised when a store is built
    ConfigurationError(String),
    /// Serialization/deserialization error
    SerializationError(String),
    /// Encryption or decryption failure
    EncryptionError(String),
    /// Persisted state failed validation
    CorruptedEntry(String),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::StorageFull => write!(f, "Cache storage is full"),
            CacheError::IoError(err) => write!(f, "I/O error: {}", err),
            CacheError::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
            CacheError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            CacheError::EncryptionError(msg) => write!(f, "Encryption error: {}", msg),
            CacheError::CorruptedEntry(msg) => write!(f, "Corrupted cache entry: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::IoError(err)
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::SerializationError(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for CacheError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        CacheError::SerializationError(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for CacheError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        CacheError::SerializationError(err.to_string())
    }
}
