//! Environment variable utilities
//!
//! Typed lookups with defaults, used by `LoopConfig::from_env()` and the
//! logging setup.
//!
//! ```ignore
//! use microloop_core::env::{env_get, env_get_bool, env_get_ms};
//!
//! let workers: usize = env_get("ML_POOL_SIZE", 4);
//! let flush = env_get_bool("ML_FLUSH_EPRINT", false);
//! let timeout = env_get_ms("ML_WAIT_TIMEOUT_MS");
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Parse `key` as `T`, falling back to `default` when unset or unparsable.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// `"1"`, `"true"`, `"yes"`, `"on"` (any case) are true; any other set
/// value is false; unset yields `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Milliseconds as a `Duration`. Negative or unparsable values mean "unset".
#[inline]
pub fn env_get_ms(key: &str) -> Option<Duration> {
    env_get_opt::<i64>(key)
        .filter(|ms| *ms >= 0)
        .map(|ms| Duration::from_millis(ms as u64))
}
