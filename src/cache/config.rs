//! Cache configuration types
//!
//! This module defines configuration structures for the stores:
//! - Memory cache configuration
//! - Disk cache configuration, including metadata format and encryption
//!
//! Everything has a default, so an empty YAML document is a valid config.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::constants::{
    DEFAULT_CACHE_DIR, DEFAULT_MAX_CACHE_SIZE_MB, DEFAULT_MAX_DISK_CACHE_SIZE_MB, DEFAULT_MAX_ITEMS,
};

use super::builder::{DiskCacheBuilder, InMemoryCacheBuilder};
use super::disk::{
    BinaryMetadataSerializer, EncryptionAlgorithm, JsonMetadataSerializer, MetadataSerializer,
    KEY_LEN,
};
use super::error::CacheError;
use super::memory::NullCache;
use super::traits::Cache;

const MB: u64 = 1024 * 1024;

/// Main cache configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub memory: MemoryCacheConfig,
    #[serde(default)]
    pub disk: DiskCacheConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            memory: MemoryCacheConfig::default(),
            disk: DiskCacheConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Parse a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self, CacheError> {
        serde_yaml::from_str(yaml).map_err(|e| CacheError::ConfigurationError(e.to_string()))
    }

    /// Validate cache configuration
    pub fn validate(&self) -> Result<(), String> {
        self.memory.validate()?;
        self.disk.validate()?;
        Ok(())
    }

    /// Build the configured store.
    ///
    /// Disabled caching yields a [`NullCache`]; an enabled disk section wins
    /// over the memory section.
    pub async fn build(&self) -> Result<Arc<dyn Cache>, CacheError> {
        self.validate().map_err(CacheError::ConfigurationError)?;

        if !self.enabled {
            return Ok(Arc::new(NullCache));
        }
        if self.disk.enabled {
            return self.disk.builder()?.build().await;
        }
        self.memory.builder().build()
    }
}

/// Memory cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryCacheConfig {
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    #[serde(default = "default_max_cache_size_mb")]
    pub max_cache_size_mb: u64,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_items: default_max_items(),
            max_cache_size_mb: default_max_cache_size_mb(),
        }
    }
}

fn default_max_items() -> usize {
    DEFAULT_MAX_ITEMS
}

fn default_max_cache_size_mb() -> u64 {
    DEFAULT_MAX_CACHE_SIZE_MB
}

impl MemoryCacheConfig {
    /// Convert max_cache_size_mb to bytes
    pub fn max_cache_size_bytes(&self) -> u64 {
        self.max_cache_size_mb.saturating_mul(MB)
    }

    /// Validate memory cache configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_items == 0 {
            return Err("memory.max_items must be greater than 0".to_string());
        }
        if self.max_cache_size_mb == 0 {
            return Err("memory.max_cache_size_mb must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn builder(&self) -> InMemoryCacheBuilder {
        InMemoryCacheBuilder::new()
            .max_items(self.max_items)
            .max_bytes(self.max_cache_size_bytes())
    }
}

/// Metadata file format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializerKind {
    #[default]
    Json,
    Binary,
}

impl SerializerKind {
    pub fn serializer(self) -> Arc<dyn MetadataSerializer> {
        match self {
            SerializerKind::Json => Arc::new(JsonMetadataSerializer),
            SerializerKind::Binary => Arc::new(BinaryMetadataSerializer),
        }
    }
}

/// Disk cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskCacheConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    #[serde(default = "default_max_disk_cache_size_mb")]
    pub max_disk_cache_size_mb: u64,
    #[serde(default)]
    pub serializer: SerializerKind,
    #[serde(default)]
    pub encryption: Option<EncryptionConfig>,
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cache_dir: default_cache_dir(),
            max_items: default_max_items(),
            max_disk_cache_size_mb: default_max_disk_cache_size_mb(),
            serializer: SerializerKind::default(),
            encryption: None,
        }
    }
}

fn default_cache_dir() -> String {
    DEFAULT_CACHE_DIR.to_string()
}

fn default_max_disk_cache_size_mb() -> u64 {
    DEFAULT_MAX_DISK_CACHE_SIZE_MB
}

impl DiskCacheConfig {
    /// Convert max_disk_cache_size_mb to bytes
    pub fn max_disk_cache_size_bytes(&self) -> u64 {
        self.max_disk_cache_size_mb.saturating_mul(MB)
    }

    /// Validate disk cache configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }
        if self.cache_dir.is_empty() {
            return Err("cache_dir cannot be empty when disk cache is enabled".to_string());
        }
        if self.max_items == 0 {
            return Err("disk.max_items must be greater than 0".to_string());
        }
        if self.max_disk_cache_size_mb == 0 {
            return Err("disk.max_disk_cache_size_mb must be greater than 0".to_string());
        }
        if let Some(encryption) = &self.encryption {
            encryption.validate()?;
        }
        Ok(())
    }

    pub fn builder(&self) -> Result<DiskCacheBuilder, CacheError> {
        let mut builder = DiskCacheBuilder::new(&self.cache_dir)
            .max_items(self.max_items)
            .max_bytes(self.max_disk_cache_size_bytes())
            .serializer(self.serializer.serializer());
        if let Some(encryption) = &self.encryption {
            builder = builder.encryption(encryption.key()?, encryption.algorithm.clone());
        }
        Ok(builder)
    }
}

/// Encryption of entry files at rest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    /// 32-byte key, hex encoded
    pub key_hex: String,
}

fn default_algorithm() -> String {
    EncryptionAlgorithm::Aes256Gcm.to_string()
}

impl EncryptionConfig {
    pub fn key(&self) -> Result<Vec<u8>, CacheError> {
        hex::decode(self.key_hex.trim())
            .map_err(|e| CacheError::ConfigurationError(format!("encryption.key_hex: {}", e)))
    }

    pub fn validate(&self) -> Result<(), String> {
        self.algorithm
            .parse::<EncryptionAlgorithm>()
            .map_err(|e| e.to_string())?;
        let key = self.key().map_err(|e| e.to_string())?;
        if key.len() != KEY_LEN {
            return Err(format!(
                "encryption.key_hex must decode to {} bytes, got {}",
                KEY_LEN,
                key.len()
            ));
        }
        Ok(())
    }
}
