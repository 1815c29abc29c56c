//! Shared constants and invariants

pub const DEFAULT_REFRESH_BUFFER_SECONDS: u64 = 10;

pub const DEFAULT_RETRY_FACTOR: f64 = 1.55;
pub const DEFAULT_RETRY_INITIAL_DELAY_MS: u64 = 3_000;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 50_000;
pub const DEFAULT_RETRY_MAX_RETRIES: u32 = 8;

pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 5_000;

/// Lifetime assumed for a token without an `exp` claim.
pub const MISSING_EXPIRY_FALLBACK_MS: i64 = 60_000;

// Cache key sentinels
pub const SESSION_TEMPLATE: &str = "__session__";
pub const PERSONAL_ORGANIZATION: &str = "__personal__";
pub const CACHE_KEY_SEPARATOR: char = ':';

// Fetch modes, used as metric labels
pub const MODE_FOREGROUND: &str = "foreground";
pub const MODE_BACKGROUND: &str = "background";
pub const MODE_BYPASS: &str = "bypass";
