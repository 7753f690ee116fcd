//! Request/response descriptors and cache entry types
//!
//! - `RequestInfo` / `ResponseInfo`: the head of an exchange, without a body
//! - `CacheEntry`: stored response metadata plus its body representation

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode, Uri, Version};
use std::path::PathBuf;
use std::sync::Arc;

use super::control::CacheControl;
use super::disk::StreamFactory;
use super::error::CacheError;
use super::metadata::EntryMetadata;

/// Head of an outgoing request.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
}

impl RequestInfo {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
        }
    }

    pub fn get(uri: Uri) -> Self {
        Self::new(Method::GET, uri)
    }

    /// Append a header value, keeping existing values of the same name.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn cache_control(&self) -> CacheControl {
        CacheControl::of(&self.headers)
    }

    /// Key under which every variant of this resource is indexed.
    pub fn cache_key(&self) -> String {
        self.uri.to_string()
    }
}

impl<T> From<&http::Request<T>> for RequestInfo {
    fn from(request: &http::Request<T>) -> Self {
        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
            version: request.version(),
            headers: request.headers().clone(),
        }
    }
}

/// Head of a response.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseInfo {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
}

impl ResponseInfo {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }
}

impl<T> From<&http::Response<T>> for ResponseInfo {
    fn from(response: &http::Response<T>) -> Self {
        Self {
            status: response.status(),
            version: response.version(),
            headers: response.headers().clone(),
        }
    }
}

/// Where the body of a stored response lives.
#[derive(Debug, Clone)]
pub enum EntryBody {
    Memory(Bytes),
    Disk(DiskBody),
}

/// Body file of a disk entry, opened only when read.
#[derive(Debug, Clone)]
pub struct DiskBody {
    pub path: PathBuf,
    /// Bytes occupied on disk
    pub size: u64,
    pub(crate) streams: Arc<dyn StreamFactory>,
}

/// A stored response.
///
/// Clones share the metadata, so a revalidation applied through one clone
/// is seen by the store that handed it out.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub metadata: Arc<EntryMetadata>,
    pub body: EntryBody,
}

impl CacheEntry {
    pub fn in_memory(metadata: Arc<EntryMetadata>, body: Bytes) -> Self {
        Self {
            metadata,
            body: EntryBody::Memory(body),
        }
    }

    /// Size of the body as accounted by the store holding it.
    pub fn body_size(&self) -> u64 {
        match &self.body {
            EntryBody::Memory(bytes) => bytes.len() as u64,
            EntryBody::Disk(disk) => disk.size,
        }
    }

    /// Load the whole body.
    pub async fn read_body(&self) -> Result<Bytes, CacheError> {
        match &self.body {
            EntryBody::Memory(bytes) => Ok(bytes.clone()),
            EntryBody::Disk(disk) => Ok(disk.streams.read(&disk.path).await?),
        }
    }
}
