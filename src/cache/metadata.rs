//! Entry metadata and freshness engine (RFC 7234 §4.2).
//!
//! `EntryMetadata` pairs the request that produced a response with the
//! response head and the two client-side timestamps bracketing the exchange.
//! Every freshness question is answered against the injected [`Clock`], so the
//! math is deterministic under test.
//!
//! All times are epoch milliseconds (`i64`). Durations coming from directives
//! saturate at `i64::MAX`, which is how unbounded values participate.

use std::sync::Arc;
use std::time::Duration;

use http::header::{HeaderName, HeaderValue, AGE, DATE, ETAG, EXPIRES, LAST_MODIFIED, WARNING};
use http::HeaderMap;
use parking_lot::RwLock;

use super::clock::{duration_millis, Clock};
use super::control::CacheControl;
use super::entry::{RequestInfo, ResponseInfo};
use super::headers::{self, WARNING_HEURISTIC_EXPIRATION};
use crate::constants::{HEURISTIC_LIFETIME_CAP_MILLIS, HEURISTIC_LIFETIME_PERCENT};

/// Request header values selected by the response's `Vary`.
///
/// A name whose request header was absent is kept with an empty value list,
/// so absence is part of the variant too.
pub type VaryValues = Vec<(HeaderName, Vec<HeaderValue>)>;

#[derive(Debug)]
pub struct EntryMetadata {
    request: RequestInfo,
    clock: Arc<dyn Clock>,
    state: RwLock<State>,
}

#[derive(Debug, Clone)]
struct State {
    request_time: i64,
    response_time: i64,
    response: ResponseInfo,
    derived: Derived,
}

/// Everything computed from the response headers.
#[derive(Debug, Clone)]
struct Derived {
    vary: VaryValues,
    cache_control: CacheControl,
    date: Option<i64>,
    date_string: Option<String>,
    lifetime: i64,
    heuristic: bool,
    age_header: i64,
}

impl Derived {
    fn compute(request: &RequestInfo, response: &ResponseInfo, response_time: i64) -> Self {
        let headers = &response.headers;
        let cache_control = CacheControl::of(headers);

        let date_string = headers::first_value(headers, &DATE).map(str::to_string);
        let date = date_string.as_deref().and_then(headers::parse_http_date);
        let effective_date = date.unwrap_or(response_time);

        let mut heuristic = false;
        let lifetime = if let Some(max_age) = cache_control.max_age {
            duration_millis(max_age)
        } else if let Some(expires) = headers::date_header(headers, &EXPIRES) {
            // An invalid Expires means "already expired"
            expires
                .map(|at| at.saturating_sub(effective_date).max(0))
                .unwrap_or(0)
        } else if let Some(Some(last_modified)) = headers::date_header(headers, &LAST_MODIFIED) {
            if request.uri.query().is_some() {
                0
            } else {
                let l = (effective_date.saturating_sub(last_modified) / 100 * HEURISTIC_LIFETIME_PERCENT)
                    .min(HEURISTIC_LIFETIME_CAP_MILLIS);
                heuristic = l > 0;
                l.max(0)
            }
        } else {
            0
        };

        let age_header = headers::first_value(headers, &AGE)
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| duration_millis(Duration::from_secs(secs)))
            .unwrap_or(0);

        let vary = headers::vary_names(headers)
            .into_iter()
            .map(|name| {
                let values: Vec<HeaderValue> =
                    request.headers.get_all(&name).iter().cloned().collect();
                (name, values)
            })
            .collect();

        Self {
            vary,
            cache_control,
            date,
            date_string,
            lifetime,
            heuristic,
            age_header,
        }
    }
}

impl State {
    fn current_age(&self, now: i64) -> i64 {
        let date = self.derived.date.unwrap_or(self.response_time);

        let apparent_age = self.response_time.saturating_sub(date).max(0);
        let response_delay = self.response_time.saturating_sub(self.request_time);
        let corrected_age_value = self.derived.age_header.saturating_add(response_delay);
        let corrected_initial_age = apparent_age.max(corrected_age_value);
        let resident_time = now.saturating_sub(self.response_time);

        corrected_initial_age.saturating_add(resident_time)
    }

    fn needs_heuristic_warning(&self, now: i64) -> bool {
        self.derived.heuristic && self.current_age(now) > self.derived.lifetime
    }

    fn has_warning(&self, code: &str) -> bool {
        self.response
            .headers
            .get_all(WARNING)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.starts_with(code) && v[code.len()..].starts_with(' '))
    }
}

impl EntryMetadata {
    /// Build metadata for a response received at `response_time_millis` for a
    /// request sent at `request_time_millis`.
    ///
    /// The heuristic expiration warning is evaluated once right away.
    pub fn new(
        request_time_millis: i64,
        response_time_millis: i64,
        response: ResponseInfo,
        request: RequestInfo,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let derived = Derived::compute(&request, &response, response_time_millis);
        let metadata = Self {
            request,
            clock,
            state: RwLock::new(State {
                request_time: request_time_millis,
                response_time: response_time_millis,
                response,
                derived,
            }),
        };
        metadata.update_warnings();
        metadata
    }

    pub fn request(&self) -> &RequestInfo {
        &self.request
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Snapshot of the stored response head.
    pub fn response(&self) -> ResponseInfo {
        self.state.read().response.clone()
    }

    pub fn response_cache_control(&self) -> CacheControl {
        self.state.read().derived.cache_control.clone()
    }

    pub fn request_time_millis(&self) -> i64 {
        self.state.read().request_time
    }

    pub fn response_time_millis(&self) -> i64 {
        self.state.read().response_time
    }

    /// Current age of the stored response.
    pub fn age(&self) -> Duration {
        let age = self.state.read().current_age(self.clock.millis());
        Duration::from_millis(age.max(0) as u64)
    }

    pub fn freshness_lifetime(&self) -> Duration {
        Duration::from_millis(self.state.read().derived.lifetime.max(0) as u64)
    }

    /// True when the lifetime was inferred from `Last-Modified`.
    pub fn is_heuristic(&self) -> bool {
        self.state.read().derived.heuristic
    }

    /// How far past its freshness lifetime the response is; zero while fresh.
    pub fn stale_for(&self) -> Duration {
        let state = self.state.read();
        let stale = state
            .current_age(self.clock.millis())
            .saturating_sub(state.derived.lifetime);
        Duration::from_millis(stale.max(0) as u64)
    }

    /// Whether the stored response may be served without contacting the origin.
    pub fn is_fresh(&self, request_cc: &CacheControl) -> bool {
        let state = self.state.read();
        let lifetime = state.derived.lifetime;
        if lifetime <= 0 || state.derived.cache_control.no_cache {
            return false;
        }

        let age = state.current_age(self.clock.millis());

        if let Some(max_age) = request_cc.max_age {
            if duration_millis(max_age) < age {
                return false;
            }
        }

        if let Some(max_stale) = request_cc.max_stale {
            if age >= lifetime {
                return !state.derived.cache_control.must_revalidate
                    && age - lifetime <= duration_millis(max_stale);
            }
        }

        if let Some(min_fresh) = request_cc.min_fresh {
            if lifetime - age < duration_millis(min_fresh) {
                return false;
            }
        }

        age < lifetime
    }

    /// Whether a stale response may stand in for a failed or 5xx exchange.
    ///
    /// The wider of the request and response `stale-if-error` windows applies.
    pub fn within_stale_if_error(&self, request_cc: &CacheControl) -> bool {
        let state = self.state.read();
        let window = match (
            request_cc.stale_if_error,
            state.derived.cache_control.stale_if_error,
        ) {
            (None, None) => return false,
            (a, b) => duration_millis(a.max(b).unwrap_or_default()),
        };

        let age = state.current_age(self.clock.millis());
        age <= state.derived.lifetime.saturating_add(window)
    }

    /// Attach `Warning: 113` when a heuristic lifetime has been exceeded.
    ///
    /// Concurrent callers add the value at most once.
    pub fn update_warnings(&self) {
        let now = self.clock.millis();
        {
            let state = self.state.read();
            if !state.needs_heuristic_warning(now) || state.has_warning("113") {
                return;
            }
        }

        let mut state = self.state.write();
        if state.needs_heuristic_warning(now) && !state.has_warning("113") {
            state.response.headers.append(
                WARNING,
                HeaderValue::from_static(WARNING_HEURISTIC_EXPIRATION),
            );
        }
    }

    /// Request header values named by the response's `Vary`, absent ones omitted.
    pub fn vary_headers(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, values) in &self.state.read().derived.vary {
            for value in values {
                map.append(name.clone(), value.clone());
            }
        }
        map
    }

    /// `Vary` names with the original request's values, absent ones included.
    pub fn vary_values(&self) -> VaryValues {
        self.state.read().derived.vary.clone()
    }

    /// Whether `request` selects the same variant as the stored one.
    pub fn matches_variant(&self, request: &RequestInfo) -> bool {
        self.state.read().derived.vary.iter().all(|(name, values)| {
            request
                .headers
                .get_all(name)
                .iter()
                .eq(values.iter())
        })
    }

    pub fn etag(&self) -> Option<HeaderValue> {
        self.state.read().response.headers.get(ETAG).cloned()
    }

    pub fn last_modified(&self) -> Option<HeaderValue> {
        self.state.read().response.headers.get(LAST_MODIFIED).cloned()
    }

    /// Date to send as `If-Modified-Since` when revalidating.
    ///
    /// `Last-Modified` is preferred. Otherwise, for responses that had a
    /// freshness lifetime, the `Date` header or the response time.
    pub fn date_for_revalidation(&self) -> Option<String> {
        let state = self.state.read();
        if let Some(last_modified) = headers::first_value(&state.response.headers, &LAST_MODIFIED) {
            return Some(last_modified.to_string());
        }
        if state.derived.lifetime > 0 {
            return Some(
                state
                    .derived
                    .date_string
                    .clone()
                    .unwrap_or_else(|| headers::format_http_date(state.response_time)),
            );
        }
        None
    }

    /// Worth storing: either fresh for a while or revalidatable.
    pub fn is_applicable(&self) -> bool {
        let state = self.state.read();
        state.derived.lifetime > 0 || state.response.headers.contains_key(ETAG)
    }

    /// Merge the headers of a `304 Not Modified` into the stored response.
    ///
    /// `1xx` warnings are dropped, each header named in `new_headers` replaces
    /// the stored values of that name, and both timestamps move to the new
    /// exchange.
    pub fn update(&self, new_headers: &HeaderMap, request_time_millis: i64, response_time_millis: i64) {
        let mut state = self.state.write();

        let kept: Vec<HeaderValue> = state
            .response
            .headers
            .get_all(WARNING)
            .iter()
            .filter(|v| !v.as_bytes().starts_with(b"1"))
            .cloned()
            .collect();
        state.response.headers.remove(WARNING);
        for value in kept {
            state.response.headers.append(WARNING, value);
        }

        for name in new_headers.keys() {
            state.response.headers.remove(name);
            for value in new_headers.get_all(name) {
                state.response.headers.append(name.clone(), value.clone());
            }
        }

        state.request_time = request_time_millis;
        state.response_time = response_time_millis;
        state.derived = Derived::compute(&self.request, &state.response, response_time_millis);
    }
}
