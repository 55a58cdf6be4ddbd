//! Bounded-concurrency image downloads.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

use super::http_client::{is_image_content_type, BodyError, HttpClient};
use super::{SeenUrls, SourceEvent};
use crate::models::Candidate;

/// Result of downloading one URL.
#[derive(Debug)]
pub enum FetchOutcome {
    Fetched {
        url: String,
        bytes: Vec<u8>,
        content_type: Option<String>,
    },
    TimedOut {
        url: String,
    },
    Failed {
        url: String,
        reason: String,
    },
}

impl FetchOutcome {
    /// Convert into a stream event for `category` from `source`.
    pub fn into_event(self, category: &str, source: &str) -> SourceEvent {
        match self {
            FetchOutcome::Fetched {
                url,
                bytes,
                content_type,
            } => SourceEvent::Candidate(
                Candidate::new(url, bytes, category, source).with_content_type(content_type),
            ),
            FetchOutcome::TimedOut { url } => SourceEvent::TimedOut { url },
            FetchOutcome::Failed { url, reason } => SourceEvent::Failed { url, reason },
        }
    }
}

/// Largest image body downloaded by default (20 MiB).
pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 20 * 1024 * 1024;

/// Downloads image bytes with a concurrency bound, a per-request timeout
/// and a body size cap.
#[derive(Clone)]
pub struct FetchPool {
    client: HttpClient,
    concurrency: usize,
    timeout: Duration,
    max_bytes: u64,
}

impl FetchPool {
    pub fn new(client: HttpClient, concurrency: usize, timeout: Duration) -> Self {
        Self {
            client,
            concurrency: concurrency.max(1),
            timeout,
            max_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }

    /// Fail downloads whose body exceeds `max_bytes`.
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes.max(1);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Download one URL. Timeouts are reported separately from failures.
    pub async fn fetch_one(&self, url: String) -> FetchOutcome {
        match tokio::time::timeout(self.timeout, self.download(&url)).await {
            Ok(Ok((bytes, content_type))) => FetchOutcome::Fetched {
                url,
                bytes,
                content_type,
            },
            Ok(Err(DownloadError::Timeout)) | Err(_) => {
                debug!("Timed out fetching {}", url);
                FetchOutcome::TimedOut { url }
            }
            Ok(Err(DownloadError::Failed(reason))) => {
                debug!("Failed to fetch {}: {}", url, reason);
                FetchOutcome::Failed { url, reason }
            }
        }
    }

    /// Download many URLs, yielding outcomes in input order.
    pub fn fetch_all(&self, urls: Vec<String>) -> impl Stream<Item = FetchOutcome> + '_ {
        stream::iter(urls)
            .map(move |url| self.fetch_one(url))
            .buffered(self.concurrency)
    }

    async fn download(&self, url: &str) -> Result<(Vec<u8>, Option<String>), DownloadError> {
        let response = self.client.get(url).await.map_err(DownloadError::from)?;

        if !response.is_success() {
            return Err(DownloadError::Failed(format!("HTTP {}", response.status)));
        }

        let content_type = response.content_type();
        if let Some(ref ct) = content_type {
            if !is_image_content_type(ct) {
                return Err(DownloadError::Failed(format!(
                    "Not an image (Content-Type: {})",
                    ct
                )));
            }
        }

        let bytes = response
            .bytes_limited(self.max_bytes)
            .await
            .map_err(DownloadError::from)?;
        if bytes.is_empty() {
            return Err(DownloadError::Failed("Empty body".to_string()));
        }
        if content_type.is_none() && !infer::is_image(&bytes) {
            return Err(DownloadError::Failed(
                "Not an image (no Content-Type, unrecognized bytes)".to_string(),
            ));
        }

        Ok((bytes, content_type))
    }
}

enum DownloadError {
    Timeout,
    Failed(String),
}

impl From<reqwest::Error> for DownloadError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            DownloadError::Timeout
        } else {
            DownloadError::Failed(e.to_string())
        }
    }
}

impl From<BodyError> for DownloadError {
    fn from(e: BodyError) -> Self {
        match e {
            BodyError::Http(e) => DownloadError::from(e),
            too_large => DownloadError::Failed(too_large.to_string()),
        }
    }
}

/// Sends download results from a producer task into a candidate stream.
///
/// Skips URLs already seen (globally or earlier in this call) before
/// downloading them, and stops once `max_candidates` events were sent.
pub struct CandidateEmitter {
    tx: mpsc::Sender<SourceEvent>,
    seen: Option<Arc<dyn SeenUrls>>,
    emitted: HashSet<String>,
    remaining: usize,
    category: String,
    source: String,
}

impl CandidateEmitter {
    pub fn new(
        tx: mpsc::Sender<SourceEvent>,
        seen: Option<Arc<dyn SeenUrls>>,
        category: &str,
        source: &str,
        max_candidates: usize,
    ) -> Self {
        Self {
            tx,
            seen,
            emitted: HashSet::new(),
            remaining: max_candidates,
            category: category.to_string(),
            source: source.to_string(),
        }
    }

    /// Room left before the request count is reached.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// True once the request count is reached or the consumer went away.
    pub fn is_done(&self) -> bool {
        self.remaining == 0 || self.tx.is_closed()
    }

    /// Drop URLs that were already handled, keeping at most `remaining`.
    pub async fn select(&mut self, urls: Vec<String>) -> Vec<String> {
        let mut selected = Vec::new();
        for url in urls {
            if selected.len() >= self.remaining {
                break;
            }
            if self.emitted.contains(&url) {
                continue;
            }
            if let Some(seen) = &self.seen {
                if seen.is_seen(&url).await {
                    continue;
                }
            }
            self.emitted.insert(url.clone());
            selected.push(url);
        }
        selected
    }

    /// Download a batch of URLs and forward the results.
    ///
    /// Returns false if the consumer dropped the stream.
    pub async fn emit_urls(&mut self, pool: &FetchPool, urls: Vec<String>) -> bool {
        let urls = self.select(urls).await;
        if urls.is_empty() {
            return !self.tx.is_closed();
        }

        let mut outcomes = std::pin::pin!(pool.fetch_all(urls));
        while let Some(outcome) = outcomes.next().await {
            let event = outcome.into_event(&self.category, &self.source);
            if self.tx.send(event).await.is_err() {
                return false;
            }
            self.remaining = self.remaining.saturating_sub(1);
        }
        true
    }

    /// End the stream with a source failure.
    pub async fn abort(self, error: super::SourceError) {
        let _ = self.tx.send(SourceEvent::Aborted(error)).await;
    }
}
