// Constants module - centralized default values for configuration
//
// Defaults shared by the builders and the serde configuration layer.

// =============================================================================
// Store defaults
// =============================================================================

/// Default maximum number of stored variants per store
pub const DEFAULT_MAX_ITEMS: usize = 8192;

/// Default in-memory body budget in megabytes
pub const DEFAULT_MAX_CACHE_SIZE_MB: u64 = 64;

/// Default disk body budget in megabytes
pub const DEFAULT_MAX_DISK_CACHE_SIZE_MB: u64 = 1024;

/// Default directory of the disk store
pub const DEFAULT_CACHE_DIR: &str = "/var/cache/rfc-http-cache";

// =============================================================================
// Freshness defaults
// =============================================================================

/// Share of `Date - Last-Modified` used as heuristic freshness, in percent
pub const HEURISTIC_LIFETIME_PERCENT: i64 = 10;

/// Upper bound on heuristic freshness (24 hours) in milliseconds
pub const HEURISTIC_LIFETIME_CAP_MILLIS: i64 = 24 * 60 * 60 * 1000;

// =============================================================================
// Logging defaults
// =============================================================================

/// Filter applied when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "info";
