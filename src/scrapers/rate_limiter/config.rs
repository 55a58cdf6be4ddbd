//! Rate limiter configuration and statistics.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Window for detecting 403 rate limit patterns.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(30);

/// Unique URLs answered with 403 inside the window before backing off.
pub const RATE_LIMIT_403_THRESHOLD: usize = 3;

/// Configuration for per-host rate limiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Base delay between requests to the same host, in milliseconds.
    pub base_delay_ms: u64,
    /// Floor for the delay while recovering.
    pub min_delay_ms: u64,
    /// Ceiling for backoff.
    pub max_delay_ms: u64,
    /// Delay multiplier applied on 429/503.
    pub backoff_multiplier: f64,
    /// Delay multiplier applied on recovery (< 1.0).
    pub recovery_multiplier: f64,
    /// Consecutive successes before the delay is reduced.
    pub recovery_threshold: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            min_delay_ms: 100,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
            recovery_multiplier: 0.8,
            recovery_threshold: 5,
        }
    }
}

impl RateLimitConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Snapshot of one host's limiter state.
#[derive(Debug, Clone)]
pub struct HostStats {
    pub current_delay: Duration,
    pub in_backoff: bool,
    pub total_requests: u64,
    pub rate_limit_hits: u64,
}
