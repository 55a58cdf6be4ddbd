//! Per-host rate limiting state.

use std::time::{Duration, Instant};

use super::config::{RATE_LIMIT_403_THRESHOLD, RATE_LIMIT_WINDOW};

/// Timing and backoff state for a single host.
#[derive(Debug, Clone)]
pub struct HostState {
    pub current_delay: Duration,
    pub last_request: Option<Instant>,
    pub consecutive_successes: u32,
    /// Recent 403 responses, oldest first.
    pub recent_403s: Vec<(Instant, String)>,
    pub in_backoff: bool,
    pub total_requests: u64,
    pub rate_limit_hits: u64,
}

impl HostState {
    pub fn new(base_delay: Duration) -> Self {
        Self {
            current_delay: base_delay,
            last_request: None,
            consecutive_successes: 0,
            recent_403s: Vec::new(),
            in_backoff: false,
            total_requests: 0,
            rate_limit_hits: 0,
        }
    }

    /// Multiply the delay, capped at `max`, and enter backoff.
    pub fn back_off(&mut self, multiplier: f64, max: Duration) {
        let next = Duration::from_secs_f64(self.current_delay.as_secs_f64() * multiplier);
        self.current_delay = next.min(max);
        self.in_backoff = true;
        self.rate_limit_hits += 1;
        self.consecutive_successes = 0;
        self.recent_403s.clear();
    }

    /// Track a 403 and report whether enough distinct URLs were refused
    /// within the window to look like rate limiting.
    pub fn add_403(&mut self, url: &str) -> bool {
        let now = Instant::now();
        self.recent_403s
            .retain(|(at, _)| now.duration_since(*at) < RATE_LIMIT_WINDOW);
        self.recent_403s.push((now, url.to_string()));
        self.unique_403_count() >= RATE_LIMIT_403_THRESHOLD
    }

    pub fn unique_403_count(&self) -> usize {
        let mut urls: Vec<&str> = self.recent_403s.iter().map(|(_, u)| u.as_str()).collect();
        urls.sort_unstable();
        urls.dedup();
        urls.len()
    }

    /// Time until this host may be contacted again.
    pub fn time_until_ready(&self) -> Duration {
        match self.last_request {
            Some(last) => self.current_delay.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_403_pattern_needs_distinct_urls() {
        let mut state = HostState::new(Duration::from_millis(100));
        assert!(!state.add_403("https://h/1"));
        assert!(!state.add_403("https://h/1"));
        assert!(!state.add_403("https://h/2"));
        assert!(state.add_403("https://h/3"));
    }

    #[test]
    fn test_back_off_caps_delay() {
        let mut state = HostState::new(Duration::from_secs(40));
        state.back_off(2.0, Duration::from_secs(60));
        assert_eq!(state.current_delay, Duration::from_secs(60));
        assert!(state.in_backoff);
        assert_eq!(state.rate_limit_hits, 1);
    }

    #[test]
    fn test_fresh_host_is_ready() {
        let state = HostState::new(Duration::from_secs(5));
        assert_eq!(state.time_until_ready(), Duration::ZERO);
    }
}
