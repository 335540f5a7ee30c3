//! Event loop configuration
//!
//! Library defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder calls on the returned value
//! 2. Environment variables (`from_env()`)
//! 3. Library defaults (`defaults`)
//!
//! ```rust,ignore
//! use microloop::LoopConfig;
//!
//! let config = LoopConfig::from_env()
//!     .pool_size(8)
//!     .wait_timeout(Some(Duration::from_millis(100)));
//! ```

use microloop_core::env::{env_get, env_get_ms};
use std::time::Duration;

/// Library defaults.
pub mod defaults {
    /// Worker pool size
    pub const POOL_SIZE: usize = 4;
    /// Upper bound on the worker pool size
    pub const MAX_POOL_SIZE: usize = 64;
    /// Ready descriptors returned by one wait
    pub const MAX_EVENTS: usize = 128;
    /// Idle worker park timeout
    pub const PARK_TIMEOUT_MS: u64 = 1;
}

/// Reactor configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Number of worker threads for blocking `start()` calls
    pub pool_size: usize,
    /// Maximum ready descriptors handled per `tick()`
    pub max_events: usize,
    /// Readiness wait timeout; `None` waits indefinitely
    pub wait_timeout: Option<Duration>,
    /// How long an idle worker parks before re-checking the queue
    pub park_timeout: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopConfig {
    /// Library defaults, no environment lookup.
    pub fn new() -> Self {
        Self {
            pool_size: defaults::POOL_SIZE,
            max_events: defaults::MAX_EVENTS,
            wait_timeout: None,
            park_timeout: Duration::from_millis(defaults::PARK_TIMEOUT_MS),
        }
    }

    /// Defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `ML_POOL_SIZE` - Worker thread count
    /// - `ML_MAX_EVENTS` - Ready descriptors per tick
    /// - `ML_WAIT_TIMEOUT_MS` - Tick wait timeout (negative = unbounded)
    /// - `ML_PARK_TIMEOUT_MS` - Idle worker park timeout
    pub fn from_env() -> Self {
        Self {
            pool_size: env_get("ML_POOL_SIZE", defaults::POOL_SIZE),
            max_events: env_get("ML_MAX_EVENTS", defaults::MAX_EVENTS),
            wait_timeout: env_get_ms("ML_WAIT_TIMEOUT_MS"),
            park_timeout: Duration::from_millis(env_get(
                "ML_PARK_TIMEOUT_MS",
                defaults::PARK_TIMEOUT_MS,
            )),
        }
        .normalized()
    }

    // Builder methods

    pub fn pool_size(mut self, n: usize) -> Self {
        self.pool_size = n;
        self.normalized()
    }

    pub fn max_events(mut self, n: usize) -> Self {
        self.max_events = n;
        self.normalized()
    }

    pub fn wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn park_timeout(mut self, d: Duration) -> Self {
        self.park_timeout = d;
        self
    }

    /// `epoll_wait` timeout argument: -1 for unbounded.
    pub(crate) fn wait_timeout_ms(&self) -> i32 {
        match self.wait_timeout {
            None => -1,
            Some(d) => d.as_millis().min(i32::MAX as u128) as i32,
        }
    }

    pub(crate) fn normalized(mut self) -> Self {
        self.pool_size = self.pool_size.clamp(1, defaults::MAX_POOL_SIZE);
        self.max_events = self.max_events.max(1);
        self
    }
}
