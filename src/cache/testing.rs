//! Fixtures shared by unit tests.

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::StatusCode;
use std::sync::Arc;

use super::clock::{Clock, ManualClock};
use super::entry::{CacheEntry, RequestInfo, ResponseInfo};
use super::metadata::EntryMetadata;

pub const T0: i64 = 1_700_000_000_000;

pub fn request_with(uri: &str, headers: &[(HeaderName, &str)]) -> RequestInfo {
    let mut request = RequestInfo::get(uri.parse().unwrap());
    for (name, value) in headers {
        request
            .headers
            .append(name.clone(), HeaderValue::from_str(value).unwrap());
    }
    request
}

pub fn response_with(headers: &[(&str, &str)]) -> ResponseInfo {
    let mut response = ResponseInfo::new(StatusCode::OK);
    response
        .headers
        .insert("cache-control", HeaderValue::from_static("max-age=60"));
    for (name, value) in headers {
        response.headers.insert(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }
    response
}

pub fn metadata_with_clock(
    request: &RequestInfo,
    headers: &[(&str, &str)],
    clock: Arc<dyn Clock>,
) -> Arc<EntryMetadata> {
    Arc::new(EntryMetadata::new(
        T0,
        T0,
        response_with(headers),
        request.clone(),
        clock,
    ))
}

/// An entry fresh for 60 seconds unless `headers` overrides `cache-control`.
pub fn entry_for(request: &RequestInfo, headers: &[(&str, &str)], body: &[u8]) -> CacheEntry {
    let metadata = metadata_with_clock(request, headers, Arc::new(ManualClock::at_millis(T0)));
    CacheEntry::in_memory(metadata, Bytes::copy_from_slice(body))
}

pub fn response_entry(
    uri: &str,
    headers: &[(&str, &str)],
    body: &[u8],
) -> (RequestInfo, CacheEntry) {
    let request = request_with(uri, &[]);
    let entry = entry_for(&request, headers, body);
    (request, entry)
}
