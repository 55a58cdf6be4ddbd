//! User agent selection.
//!
//! API sources get the collector's own identifier. HTML sources that refuse
//! non-browser clients are configured with `"impersonate"` and rotate through
//! a small pool of desktop browser strings, one per client built.

use std::sync::atomic::{AtomicUsize, Ordering};

pub const USER_AGENT: &str =
    "jamhot-collector/0.3 (training image collection; github.com/jamhot/jamhot)";

/// Config value that selects a browser user agent.
pub const IMPERSONATE: &str = "impersonate";

const BROWSER_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Safari/605.1.15",
];

static NEXT_BROWSER: AtomicUsize = AtomicUsize::new(0);

fn next_browser_user_agent() -> &'static str {
    let slot = NEXT_BROWSER.fetch_add(1, Ordering::Relaxed);
    BROWSER_USER_AGENTS[slot % BROWSER_USER_AGENTS.len()]
}

/// The user agent header for a configured value (None means our own).
pub fn resolve_user_agent(config: Option<&str>) -> String {
    match config.map(str::trim) {
        None | Some("") => USER_AGENT.to_string(),
        Some(IMPERSONATE) => next_browser_user_agent().to_string(),
        Some(custom) => custom.to_string(),
    }
}
