//! Adaptive per-host rate limiter.
//!
//! Tracks request timing per host and adapts delays based on responses.
//! Backs off on 429/503, gradually recovers on success.

mod config;
mod host_state;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

pub use config::{HostStats, RateLimitConfig};
use host_state::HostState;

/// Multiplier applied on 5xx responses other than 503.
const SERVER_ERROR_MULTIPLIER: f64 = 1.5;

/// Adaptive rate limiter shared by every client talking to the same hosts.
///
/// Cloning yields a handle onto the same per-host state.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    hosts: Arc<RwLock<HashMap<String, HostState>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_config(RateLimitConfig::default())
    }

    pub fn with_config(config: RateLimitConfig) -> Self {
        Self {
            config,
            hosts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Extract the host from a URL.
    pub fn extract_host(url: &str) -> Option<String> {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|s| s.to_string()))
    }

    /// Wait until the host is ready, then mark a request as started.
    ///
    /// Returns the host, or `None` for URLs without one.
    pub async fn acquire(&self, url: &str) -> Option<String> {
        let host = Self::extract_host(url)?;

        let wait_time = {
            let hosts = self.hosts.read().await;
            hosts
                .get(&host)
                .map(|s| s.time_until_ready())
                .unwrap_or(Duration::ZERO)
        };

        if wait_time > Duration::ZERO {
            debug!("Rate limiting {}: waiting {:?}", host, wait_time);
            tokio::time::sleep(wait_time).await;
        }

        let mut hosts = self.hosts.write().await;
        let state = hosts
            .entry(host.clone())
            .or_insert_with(|| HostState::new(self.config.base_delay()));
        state.last_request = Some(Instant::now());
        state.total_requests += 1;

        Some(host)
    }

    /// Feed a response status back into the host's delay.
    pub async fn report_response_status(
        &self,
        host: &str,
        status_code: u16,
        url: &str,
        has_retry_after: bool,
    ) {
        match status_code {
            429 | 503 => self.report_rate_limit(host, status_code).await,
            403 => {
                self.report_403(host, url, has_retry_after).await;
            }
            500..=599 => self.report_server_error(host).await,
            200..=399 => self.report_success(host).await,
            _ => {}
        }
    }

    /// Report a successful request; may decrease the delay.
    pub async fn report_success(&self, host: &str) {
        let mut hosts = self.hosts.write().await;
        let Some(state) = hosts.get_mut(host) else {
            return;
        };

        state.consecutive_successes += 1;
        state.recent_403s.clear();

        if state.in_backoff && state.consecutive_successes >= self.config.recovery_threshold {
            let reduced = Duration::from_secs_f64(
                state.current_delay.as_secs_f64() * self.config.recovery_multiplier,
            );
            state.current_delay = reduced.max(self.config.min_delay());
            state.consecutive_successes = 0;

            if state.current_delay <= self.config.base_delay() {
                state.in_backoff = false;
                state.current_delay = self.config.base_delay();
                info!("Host {} recovered from rate limit backoff", host);
            } else {
                debug!("Host {} delay reduced to {:?}", host, state.current_delay);
            }
        }
    }

    /// Report a 403. Only backs off when several distinct URLs are refused
    /// in a short window or the server sent Retry-After.
    pub async fn report_403(&self, host: &str, url: &str, has_retry_after: bool) -> bool {
        let mut hosts = self.hosts.write().await;
        let Some(state) = hosts.get_mut(host) else {
            return false;
        };

        let pattern = state.add_403(url);
        state.consecutive_successes = 0;

        if has_retry_after || pattern {
            let count = state.unique_403_count();
            state.back_off(self.config.backoff_multiplier, self.config.max_delay());
            warn!(
                "Rate limited by {} ({} URLs refused with 403), backing off to {:?}",
                host, count, state.current_delay
            );
            true
        } else {
            debug!("403 from {} for {}, treating as access denied", host, url);
            false
        }
    }

    /// Report a definite rate limit (429 or 503).
    pub async fn report_rate_limit(&self, host: &str, status_code: u16) {
        let mut hosts = self.hosts.write().await;
        if let Some(state) = hosts.get_mut(host) {
            state.back_off(self.config.backoff_multiplier, self.config.max_delay());
            warn!(
                "Rate limited by {} (HTTP {}), backing off to {:?}",
                host, status_code, state.current_delay
            );
        }
    }

    /// Report a server error other than 503; mild backoff.
    pub async fn report_server_error(&self, host: &str) {
        let mut hosts = self.hosts.write().await;
        if let Some(state) = hosts.get_mut(host) {
            let next = Duration::from_secs_f64(
                state.current_delay.as_secs_f64() * SERVER_ERROR_MULTIPLIER,
            );
            state.current_delay = next.min(self.config.max_delay());
            debug!(
                "Server error for {}, delay increased to {:?}",
                host, state.current_delay
            );
        }
    }

    /// Statistics for every host seen so far.
    pub async fn stats(&self) -> HashMap<String, HostStats> {
        let hosts = self.hosts.read().await;
        hosts
            .iter()
            .map(|(host, s)| {
                (
                    host.clone(),
                    HostStats {
                        current_delay: s.current_delay,
                        in_backoff: s.in_backoff,
                        total_requests: s.total_requests,
                        rate_limit_hits: s.rate_limit_hits,
                    },
                )
            })
            .collect()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> RateLimitConfig {
        RateLimitConfig {
            base_delay_ms: 0,
            min_delay_ms: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_extract_host() {
        assert_eq!(
            RateLimiter::extract_host("https://images.unsplash.com/photo-1?w=1080"),
            Some("images.unsplash.com".to_string())
        );
        assert_eq!(RateLimiter::extract_host("not a url"), None);
    }

    #[tokio::test]
    async fn test_backoff_on_rate_limit() {
        let limiter = RateLimiter::with_config(RateLimitConfig {
            base_delay_ms: 10,
            ..Default::default()
        });

        limiter.acquire("https://example.com/1").await;
        limiter.report_response_status("example.com", 429, "https://example.com/1", false).await;

        let stats = limiter.stats().await;
        let host = stats.get("example.com").unwrap();
        assert!(host.current_delay > Duration::from_millis(15));
        assert!(host.in_backoff);
        assert_eq!(host.rate_limit_hits, 1);
    }

    #[tokio::test]
    async fn test_recovers_after_successes() {
        let limiter = RateLimiter::with_config(RateLimitConfig {
            recovery_threshold: 2,
            recovery_multiplier: 0.1,
            ..fast_config()
        });

        limiter.acquire("https://example.com/1").await;
        limiter.report_rate_limit("example.com", 503).await;
        limiter.report_success("example.com").await;
        limiter.report_success("example.com").await;

        let stats = limiter.stats().await;
        assert!(!stats["example.com"].in_backoff);
    }

    #[tokio::test]
    async fn test_single_403_is_not_rate_limit() {
        let limiter = RateLimiter::with_config(fast_config());
        limiter.acquire("https://example.com/a").await;

        assert!(!limiter.report_403("example.com", "https://example.com/a", false).await);
        assert!(limiter.report_403("example.com", "https://example.com/b", true).await);
    }

    #[tokio::test]
    async fn test_clones_share_hosts() {
        let limiter = RateLimiter::with_config(fast_config());
        let other = limiter.clone();
        other.acquire("https://example.com/1").await;
        assert_eq!(limiter.stats().await["example.com"].total_requests, 1);
    }
}
