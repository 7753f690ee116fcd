//! Cache-Control header parsing for RFC 7234 / RFC 5861.
//!
//! One directive model is shared by requests and responses:
//! - `no-store`: the response MUST NOT be stored
//! - `no-cache`: a stored response MUST be revalidated before use
//! - `max-age`, `max-stale`, `min-fresh`: freshness bounds in seconds
//! - `stale-if-error`, `stale-while-revalidate`: RFC 5861 extensions
//! - `only-if-cached`: the client does not want a network round trip
//!
//! Parsing is lenient. A directive that cannot be understood (unknown name,
//! malformed or overflowing number) is dropped on its own; the rest of the
//! header still applies.
//!
//! # Example
//!
//! ```rust
//! use rfc_http_cache::cache::CacheControl;
//! use std::time::Duration;
//!
//! let cc = CacheControl::parse("max-age=3600, must-revalidate");
//! assert_eq!(cc.max_age, Some(Duration::from_secs(3600)));
//! assert!(cc.must_revalidate);
//! assert_eq!(cc.to_string(), "must-revalidate, max-age=3600");
//! ```

use std::fmt;
use std::time::Duration;

use http::header::CACHE_CONTROL;
use http::HeaderMap;

/// Parsed Cache-Control header directives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CacheControl {
    /// max-age directive
    pub max_age: Option<Duration>,

    /// max-stale directive; a bare `max-stale` is [`CacheControl::UNBOUNDED`]
    pub max_stale: Option<Duration>,

    /// min-fresh directive
    pub min_fresh: Option<Duration>,

    /// stale-if-error directive (RFC 5861)
    pub stale_if_error: Option<Duration>,

    /// stale-while-revalidate directive (RFC 5861)
    pub stale_while_revalidate: Option<Duration>,

    pub no_cache: bool,
    pub no_store: bool,
    pub must_revalidate: bool,
    pub no_transform: bool,
    pub immutable: bool,
    pub only_if_cached: bool,
    pub must_understand: bool,
}

impl CacheControl {
    /// Marker for a duration directive that was present without a value.
    pub const UNBOUNDED: Duration = Duration::MAX;

    /// Request directives that accept any stored response, fresh or not
    /// older than `u64::MAX` seconds, without touching the network.
    pub const FORCE_CACHE: CacheControl = CacheControl {
        max_age: Some(Duration::from_secs(u64::MAX)),
        max_stale: None,
        min_fresh: None,
        stale_if_error: None,
        stale_while_revalidate: None,
        no_cache: false,
        no_store: false,
        must_revalidate: false,
        no_transform: false,
        immutable: false,
        only_if_cached: true,
        must_understand: false,
    };

    /// Parse a Cache-Control header value into structured directives.
    ///
    /// Never fails: worst case the result is `CacheControl::default()`.
    ///
    /// ```rust
    /// use rfc_http_cache::cache::CacheControl;
    /// use std::time::Duration;
    ///
    /// let cc = CacheControl::parse("MAX-AGE=\"32\", max-stale, min-fresh=99999999999999999999999");
    /// assert_eq!(cc.max_age, Some(Duration::from_secs(32)));
    /// assert_eq!(cc.max_stale, Some(CacheControl::UNBOUNDED));
    /// assert_eq!(cc.min_fresh, None);
    /// ```
    pub fn parse(header_value: &str) -> Self {
        let mut result = Self::default();

        for directive in header_value.split(',') {
            let directive = directive.trim();
            if directive.is_empty() {
                continue;
            }

            let (name, value) = match directive.split_once('=') {
                Some((name, value)) => (name.trim(), Some(value.trim().trim_matches('"'))),
                None => (directive, None),
            };
            let name = name.to_ascii_lowercase();

            match (name.as_str(), value) {
                ("no-cache", _) => result.no_cache = true,
                ("no-store", None) => result.no_store = true,
                ("must-revalidate", None) => result.must_revalidate = true,
                ("no-transform", None) => result.no_transform = true,
                ("immutable", None) => result.immutable = true,
                ("only-if-cached", None) => result.only_if_cached = true,
                ("must-understand", None) => result.must_understand = true,
                ("max-age", Some(v)) => result.max_age = parse_seconds(v),
                ("min-fresh", Some(v)) => result.min_fresh = parse_seconds(v),
                ("max-stale", v) => result.max_stale = parse_open_seconds(v),
                ("stale-if-error", v) => result.stale_if_error = parse_open_seconds(v),
                ("stale-while-revalidate", v) => {
                    result.stale_while_revalidate = parse_open_seconds(v)
                }
                _ => {
                    // Unknown or malformed directive, ignore
                }
            }
        }

        result
    }

    /// Parse every `Cache-Control` field of a header map.
    ///
    /// Repeated fields are treated as one comma-joined list.
    pub fn of(headers: &HeaderMap) -> Self {
        let joined = headers
            .get_all(CACHE_CONTROL)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join(",");

        Self::parse(&joined)
    }

    pub fn builder() -> CacheControlBuilder {
        CacheControlBuilder::default()
    }

    /// True when the directives carry nothing at all.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn parse_seconds(value: &str) -> Option<Duration> {
    // u64::from_str also accepts a leading '+', which is not a delta-seconds
    if !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse::<u64>().ok().map(Duration::from_secs)
}

fn parse_open_seconds(value: Option<&str>) -> Option<Duration> {
    match value {
        None => Some(CacheControl::UNBOUNDED),
        Some(v) => parse_seconds(v),
    }
}

impl fmt::Display for CacheControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();

        let flags = [
            (self.no_cache, "no-cache"),
            (self.no_store, "no-store"),
            (self.must_revalidate, "must-revalidate"),
            (self.no_transform, "no-transform"),
            (self.immutable, "immutable"),
            (self.only_if_cached, "only-if-cached"),
            (self.must_understand, "must-understand"),
        ];
        parts.extend(
            flags
                .iter()
                .filter(|(set, _)| *set)
                .map(|(_, name)| name.to_string()),
        );

        let values = [
            ("max-age", self.max_age),
            ("max-stale", self.max_stale),
            ("min-fresh", self.min_fresh),
            ("stale-if-error", self.stale_if_error),
            ("stale-while-revalidate", self.stale_while_revalidate),
        ];
        for (name, value) in values {
            match value {
                Some(d) if d == Self::UNBOUNDED => parts.push(name.to_string()),
                Some(d) => parts.push(format!("{}={}", name, d.as_secs())),
                None => {}
            }
        }

        f.write_str(&parts.join(", "))
    }
}

/// Fluent construction of a directive set.
///
/// Durations are truncated to whole seconds so that every built value
/// survives a `to_string`/`parse` round trip.
#[derive(Debug, Clone, Default)]
pub struct CacheControlBuilder {
    inner: CacheControl,
}

impl CacheControlBuilder {
    pub fn no_cache(mut self) -> Self {
        self.inner.no_cache = true;
        self
    }

    pub fn no_store(mut self) -> Self {
        self.inner.no_store = true;
        self
    }

    pub fn must_revalidate(mut self) -> Self {
        self.inner.must_revalidate = true;
        self
    }

    pub fn no_transform(mut self) -> Self {
        self.inner.no_transform = true;
        self
    }

    pub fn immutable(mut self) -> Self {
        self.inner.immutable = true;
        self
    }

    pub fn only_if_cached(mut self) -> Self {
        self.inner.only_if_cached = true;
        self
    }

    pub fn must_understand(mut self) -> Self {
        self.inner.must_understand = true;
        self
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.inner.max_age = Some(whole_seconds(max_age));
        self
    }

    pub fn min_fresh(mut self, min_fresh: Duration) -> Self {
        self.inner.min_fresh = Some(whole_seconds(min_fresh));
        self
    }

    /// `max-stale=<secs>`; pass [`CacheControl::UNBOUNDED`] for a bare `max-stale`.
    pub fn max_stale(mut self, max_stale: Duration) -> Self {
        self.inner.max_stale = Some(open_seconds(max_stale));
        self
    }

    pub fn stale_if_error(mut self, window: Duration) -> Self {
        self.inner.stale_if_error = Some(open_seconds(window));
        self
    }

    pub fn stale_while_revalidate(mut self, window: Duration) -> Self {
        self.inner.stale_while_revalidate = Some(open_seconds(window));
        self
    }

    pub fn build(self) -> CacheControl {
        self.inner
    }
}

fn whole_seconds(d: Duration) -> Duration {
    Duration::from_secs(d.as_secs())
}

fn open_seconds(d: Duration) -> Duration {
    if d == CacheControl::UNBOUNDED {
        d
    } else {
        whole_seconds(d)
    }
}
