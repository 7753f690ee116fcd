//! HTTP header helpers shared by the freshness engine and the stores.
//!
//! Dates are accepted in the three formats RFC 7231 §7.1.1.1 requires a
//! recipient to parse (IMF-fixdate, obsolete RFC 850, ANSI C asctime) and are
//! always produced as IMF-fixdate.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use http::header::{HeaderName, IF_MODIFIED_SINCE, IF_NONE_MATCH, VARY};
use http::uri::{PathAndQuery, Uri};
use http::HeaderMap;

pub const WARNING_STALE: &str = "110 - \"Response is stale\"";
pub const WARNING_HEURISTIC_EXPIRATION: &str = "113 - \"Heuristic Expiration\"";

const IMF_FIXDATE: &str = "%a, %d %b %Y %H:%M:%S GMT";
const RFC_850: &str = "%A, %d-%b-%y %H:%M:%S GMT";
const ASCTIME: &str = "%a %b %d %H:%M:%S %Y";

/// Split a comma separated header value, dropping empty elements.
pub fn split_comma(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// First value of `name` that is valid visible ASCII and not blank.
pub fn first_value<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Parse an HTTP-date into epoch milliseconds.
pub fn parse_http_date(value: &str) -> Option<i64> {
    let value = value.trim();

    NaiveDateTime::parse_from_str(value, IMF_FIXDATE)
        .or_else(|_| NaiveDateTime::parse_from_str(value, RFC_850))
        .or_else(|_| {
            // asctime pads single digit days with a space
            let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
            NaiveDateTime::parse_from_str(&collapsed, ASCTIME)
        })
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive).timestamp_millis())
}

/// Format epoch milliseconds as an RFC 1123 / IMF-fixdate string.
pub fn format_http_date(millis: i64) -> String {
    let at: DateTime<Utc> = Utc
        .timestamp_millis_opt(millis)
        .single()
        .unwrap_or_default();
    at.format(IMF_FIXDATE).to_string()
}

/// Parse the first `name` header as an HTTP-date.
///
/// The outer `Option` tells whether the header is present at all, the inner
/// one whether it parsed.
pub fn date_header(headers: &HeaderMap, name: &HeaderName) -> Option<Option<i64>> {
    first_value(headers, name)
        .map(parse_http_date)
        .or_else(|| headers.get(name).map(|_| None))
}

/// Header names listed by every `Vary` field, lower-cased, in order, without duplicates.
///
/// `*` and names that are not valid tokens are skipped.
pub fn vary_names(headers: &HeaderMap) -> Vec<HeaderName> {
    let mut names: Vec<HeaderName> = Vec::new();
    for value in headers.get_all(VARY).iter().filter_map(|v| v.to_str().ok()) {
        for name in split_comma(value).filter(|s| *s != "*") {
            if let Ok(name) = HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes()) {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
    }
    names
}

/// True when any `Vary` field lists `*`.
pub fn is_vary_all(headers: &HeaderMap) -> bool {
    headers
        .get_all(VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| split_comma(v).any(|s| s == "*"))
}

/// True when the request already carries a validator.
pub fn has_conditions(headers: &HeaderMap) -> bool {
    headers.contains_key(IF_MODIFIED_SINCE) || headers.contains_key(IF_NONE_MATCH)
}

/// Resolve every `name` header of a response against the request URI.
///
/// Relative references take scheme and authority from `base`; values that do
/// not parse are skipped.
pub fn effective_uris(headers: &HeaderMap, name: &HeaderName, base: &Uri) -> Vec<Uri> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| effective_uri(v, base))
        .collect()
}

pub fn effective_uri(value: &str, base: &Uri) -> Option<Uri> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if value.contains("://") {
        let uri: Uri = value.parse().ok()?;
        return uri.authority().is_some().then_some(uri);
    }

    let path = if value.starts_with('/') {
        value.to_string()
    } else {
        let base_path = base.path();
        let dir = &base_path[..base_path.rfind('/').map(|i| i + 1).unwrap_or(0)];
        format!("{}{}", if dir.is_empty() { "/" } else { dir }, value)
    };

    let mut parts = base.clone().into_parts();
    parts.path_and_query = Some(PathAndQuery::try_from(path).ok()?);
    Uri::from_parts(parts).ok()
}
