//! Image sources for the collector.
//!
//! Every source implements [`SourceAdapter`]: given a category and a request
//! count it returns a lazy, finite [`CandidateStream`]. Sources own their
//! pagination and rate limiting; the collector only sees events.

mod fetch_pool;
mod google_images;
mod http_client;
mod rate_limiter;
mod unsplash;
mod url_list;

pub use fetch_pool::{CandidateEmitter, FetchOutcome, FetchPool, DEFAULT_MAX_IMAGE_BYTES};
pub use google_images::{extract_image_urls, GoogleImagesAdapter};
pub use http_client::{is_image_content_type, HttpClient, HttpClientBuilder, HttpResponse, IMPERSONATE};
pub use rate_limiter::{HostStats, RateLimitConfig, RateLimiter};
pub use unsplash::{UnsplashAdapter, UnsplashConfig};
pub use url_list::{parse_url_list, UrlListAdapter};

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::models::{Candidate, Category};

/// Buffer between an adapter's producer task and the collector.
pub const STREAM_BUFFER: usize = 16;

/// Errors that end a source's stream early.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("Authentication failed for {source_name}: {message}")]
    Auth {
        source_name: String,
        message: String,
    },
    #[error("Network error from {source_name}: {message}")]
    Network {
        source_name: String,
        message: String,
    },
    #[error("Unexpected response from {source_name}: {message}")]
    Parse {
        source_name: String,
        message: String,
    },
    #[error("Cannot read {path}: {message}")]
    Io { path: PathBuf, message: String },
    #[error("{source_name} is not configured: {message}")]
    NotConfigured {
        source_name: String,
        message: String,
    },
}

/// One item pulled from a source.
#[derive(Debug)]
pub enum SourceEvent {
    /// A downloaded image ready for evaluation.
    Candidate(Candidate),
    /// The download hit the per-request timeout.
    TimedOut { url: String },
    /// The download failed for this URL only.
    Failed { url: String, reason: String },
    /// The whole source failed; no further events follow.
    Aborted(SourceError),
}

impl SourceEvent {
    /// URL the event is about, if any.
    pub fn url(&self) -> Option<&str> {
        match self {
            SourceEvent::Candidate(c) => Some(&c.url),
            SourceEvent::TimedOut { url } | SourceEvent::Failed { url, .. } => Some(url),
            SourceEvent::Aborted(_) => None,
        }
    }
}

/// Lazy sequence of events from one `fetch` call.
///
/// Dropping the stream stops the producer. Not restartable: a fresh `fetch`
/// re-queries the source.
pub struct CandidateStream {
    source: String,
    receiver: mpsc::Receiver<SourceEvent>,
}

impl CandidateStream {
    pub fn new(source: &str, receiver: mpsc::Receiver<SourceEvent>) -> Self {
        Self {
            source: source.to_string(),
            receiver,
        }
    }

    /// Create a stream plus the sender its producer writes to.
    pub fn channel(source: &str) -> (mpsc::Sender<SourceEvent>, Self) {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        (tx, Self::new(source, rx))
    }

    /// A stream that ends immediately.
    pub fn empty(source: &str) -> Self {
        Self::from_events(source, Vec::new())
    }

    /// A stream that yields one abort and ends.
    pub fn aborted(source: &str, error: SourceError) -> Self {
        Self::from_events(source, vec![SourceEvent::Aborted(error)])
    }

    /// A stream over already-known events.
    pub fn from_events(source: &str, events: Vec<SourceEvent>) -> Self {
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            // Capacity covers every event
            let _ = tx.try_send(event);
        }
        Self::new(source, rx)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Next event, or `None` once the source is exhausted.
    pub async fn next(&mut self) -> Option<SourceEvent> {
        self.receiver.recv().await
    }
}

/// Read-only view of URLs already handled, so sources can skip them
/// before downloading.
#[async_trait]
pub trait SeenUrls: Send + Sync {
    async fn is_seen(&self, url: &str) -> bool;
}

/// A source of candidate images.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Name used in logs and reports.
    fn name(&self) -> &str;

    /// Start pulling up to `max_candidates` candidates for `category`.
    ///
    /// Single-item failures arrive as `Failed`/`TimedOut` events; a total
    /// source failure arrives as a final `Aborted` event. Never panics or
    /// returns early with an error.
    async fn fetch(&self, category: &Category, max_candidates: usize) -> CandidateStream;
}
