//! Persisted metadata format
//!
//! A `.meta` file holds one [`MetadataRecord`]: both exchange timestamps, the
//! response head and the request head. Decoding validates the record before
//! anything is rebuilt from it.

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode, Uri, Version};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::error::DiskCacheError;
use crate::cache::clock::Clock;
use crate::cache::entry::{RequestInfo, ResponseInfo};
use crate::cache::metadata::EntryMetadata;

pub const METADATA_VERSION: u32 = 1;
pub const MAX_HEADER_NAMES: usize = 1024;
pub const MAX_HEADER_VALUES: usize = 256;

/// One persisted header value. Values with obs-text bytes are kept raw so
/// they come back byte for byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValueRecord {
    Text(String),
    Raw(Vec<u8>),
}

impl HeaderValueRecord {
    fn of(value: &HeaderValue) -> Self {
        match value.to_str() {
            Ok(text) => HeaderValueRecord::Text(text.to_string()),
            Err(_) => HeaderValueRecord::Raw(value.as_bytes().to_vec()),
        }
    }

    fn as_bytes(&self) -> &[u8] {
        match self {
            HeaderValueRecord::Text(text) => text.as_bytes(),
            HeaderValueRecord::Raw(bytes) => bytes,
        }
    }
}

impl From<&str> for HeaderValueRecord {
    fn from(text: &str) -> Self {
        HeaderValueRecord::Text(text.to_string())
    }
}

/// Header list as persisted: name plus every value, in order.
pub type HeaderRecord = Vec<(String, Vec<HeaderValueRecord>)>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub version: u32,
    pub request_time: i64,
    pub response_time: i64,
    pub status: u16,
    pub http_version: String,
    pub response_headers: HeaderRecord,
    pub method: String,
    pub uri: String,
    pub request_headers: HeaderRecord,
}

fn version_str(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2",
        Version::HTTP_3 => "HTTP/3",
        _ => "HTTP/1.1",
    }
}

fn parse_version(s: &str) -> Option<Version> {
    match s {
        "HTTP/0.9" => Some(Version::HTTP_09),
        "HTTP/1.0" => Some(Version::HTTP_10),
        "HTTP/1.1" => Some(Version::HTTP_11),
        "HTTP/2" | "HTTP/2.0" => Some(Version::HTTP_2),
        "HTTP/3" | "HTTP/3.0" => Some(Version::HTTP_3),
        _ => None,
    }
}

fn header_record(headers: &HeaderMap) -> HeaderRecord {
    headers
        .keys()
        .map(|name| {
            let values = headers
                .get_all(name)
                .iter()
                .map(HeaderValueRecord::of)
                .collect();
            (name.as_str().to_string(), values)
        })
        .collect()
}

fn header_map(record: &HeaderRecord) -> Result<HeaderMap, DiskCacheError> {
    let mut map = HeaderMap::new();
    for (name, values) in record {
        let name = HeaderName::from_str(name)
            .map_err(|_| DiskCacheError::InvalidMetadata(format!("invalid header name '{}'", name)))?;
        for value in values {
            let value = HeaderValue::from_bytes(value.as_bytes()).map_err(|_| {
                DiskCacheError::InvalidMetadata(format!("invalid value for header '{}'", name))
            })?;
            map.append(name.clone(), value);
        }
    }
    Ok(map)
}

fn validate_headers(kind: &str, record: &HeaderRecord) -> Result<(), DiskCacheError> {
    if record.len() > MAX_HEADER_NAMES {
        return Err(DiskCacheError::InvalidMetadata(format!(
            "{} headers: {} names exceed the limit of {}",
            kind,
            record.len(),
            MAX_HEADER_NAMES
        )));
    }
    for (name, values) in record {
        if values.is_empty() {
            return Err(DiskCacheError::InvalidMetadata(format!(
                "{} header '{}' has no values",
                kind, name
            )));
        }
        if values.len() > MAX_HEADER_VALUES {
            return Err(DiskCacheError::InvalidMetadata(format!(
                "{} header '{}' has {} values, limit is {}",
                kind,
                name,
                values.len(),
                MAX_HEADER_VALUES
            )));
        }
    }
    Ok(())
}

impl MetadataRecord {
    pub fn from_metadata(metadata: &EntryMetadata) -> Self {
        let request = metadata.request();
        let response = metadata.response();
        Self {
            version: METADATA_VERSION,
            request_time: metadata.request_time_millis(),
            response_time: metadata.response_time_millis(),
            status: response.status.as_u16(),
            http_version: version_str(response.version).to_string(),
            response_headers: header_record(&response.headers),
            method: request.method.as_str().to_string(),
            uri: request.uri.to_string(),
            request_headers: header_record(&request.headers),
        }
    }

    /// Structural checks that do not need to build any `http` types.
    pub fn validate(&self) -> Result<(), DiskCacheError> {
        if self.version != METADATA_VERSION {
            return Err(DiskCacheError::UnsupportedVersion(self.version));
        }
        if !(100..=599).contains(&self.status) {
            return Err(DiskCacheError::InvalidMetadata(format!(
                "status code {} out of range",
                self.status
            )));
        }
        validate_headers("response", &self.response_headers)?;
        validate_headers("request", &self.request_headers)?;
        Ok(())
    }

    /// Rebuild the metadata; also rejects header names or values that are not valid HTTP.
    pub fn into_metadata(self, clock: Arc<dyn Clock>) -> Result<EntryMetadata, DiskCacheError> {
        self.validate()?;

        let status = StatusCode::from_u16(self.status)
            .map_err(|_| DiskCacheError::InvalidMetadata(format!("status {}", self.status)))?;
        let version = parse_version(&self.http_version).ok_or_else(|| {
            DiskCacheError::InvalidMetadata(format!("unknown HTTP version '{}'", self.http_version))
        })?;
        let method = Method::from_bytes(self.method.as_bytes())
            .map_err(|_| DiskCacheError::InvalidMetadata(format!("method '{}'", self.method)))?;
        let uri = Uri::from_str(&self.uri)
            .map_err(|_| DiskCacheError::InvalidMetadata(format!("uri '{}'", self.uri)))?;

        let response = ResponseInfo {
            status,
            version,
            headers: header_map(&self.response_headers)?,
        };
        let mut request = RequestInfo::new(method, uri);
        request.headers = header_map(&self.request_headers)?;

        Ok(EntryMetadata::new(
            self.request_time,
            self.response_time,
            response,
            request,
            clock,
        ))
    }
}

/// Encodes metadata records for `.meta` files
pub trait MetadataSerializer: Send + Sync + fmt::Debug {
    fn encode(&self, record: &MetadataRecord) -> Result<Vec<u8>, DiskCacheError>;

    /// Decode and validate a record
    fn decode(&self, bytes: &[u8]) -> Result<MetadataRecord, DiskCacheError>;
}

/// Human-readable JSON, the default
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonMetadataSerializer;

impl MetadataSerializer for JsonMetadataSerializer {
    fn encode(&self, record: &MetadataRecord) -> Result<Vec<u8>, DiskCacheError> {
        Ok(serde_json::to_vec(record)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<MetadataRecord, DiskCacheError> {
        let record: MetadataRecord = serde_json::from_slice(bytes)?;
        record.validate()?;
        Ok(record)
    }
}

/// Compact MessagePack encoding
#[derive(Debug, Default, Clone, Copy)]
pub struct BinaryMetadataSerializer;

impl MetadataSerializer for BinaryMetadataSerializer {
    fn encode(&self, record: &MetadataRecord) -> Result<Vec<u8>, DiskCacheError> {
        Ok(rmp_serde::to_vec_named(record)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<MetadataRecord, DiskCacheError> {
        let record: MetadataRecord = rmp_serde::from_slice(bytes)?;
        record.validate()?;
        Ok(record)
    }
}
