//! Collection rounds.
//!
//! A round pulls candidates for one category from its sources, skips URLs
//! already handled, runs the quality filter, stores accepted images and
//! records every handled URL. Afterwards the sampler learns from the yield.

mod events;
mod report;

pub use events::CollectorEvent;
pub use report::{RoundOutcome, RoundReport, FETCH_FAILED, WRITE_FAILED};

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dedup::{DedupError, DedupStore};
use crate::models::{AcceptedImage, Candidate, Category, CategorySet};
use crate::quality::{QualityFilter, Verdict};
use crate::sampler::{AdaptiveSampler, SamplerError};
use crate::scrapers::{CandidateStream, SourceAdapter, SourceEvent};
use crate::storage::ImageLibrary;
use report::RoundTally;

/// Records written between dedup flushes.
pub const DEFAULT_FLUSH_EVERY: usize = 10;

/// Errors that end a round. Per-item failures never do.
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("unknown category '{0}'")]
    UnknownCategory(String),
    #[error("no sources configured for '{0}'")]
    NoAdapters(String),
    #[error("failed to persist processed URLs: {0}")]
    Dedup(#[from] DedupError),
    #[error("failed to persist sampler state: {0}")]
    Sampler(#[from] SamplerError),
}

/// Runs collection rounds against shared dedup and sampler state.
///
/// Cheap to clone; rounds for different categories may run concurrently.
#[derive(Clone)]
pub struct Collector {
    categories: Arc<CategorySet>,
    dedup: DedupStore,
    sampler: AdaptiveSampler,
    filter: QualityFilter,
    library: ImageLibrary,
    flush_every: usize,
    events: Option<mpsc::Sender<CollectorEvent>>,
}

impl Collector {
    pub fn new(
        categories: CategorySet,
        dedup: DedupStore,
        sampler: AdaptiveSampler,
        filter: QualityFilter,
        library: ImageLibrary,
    ) -> Self {
        Self {
            categories: Arc::new(categories),
            dedup,
            sampler,
            filter,
            library,
            flush_every: DEFAULT_FLUSH_EVERY,
            events: None,
        }
    }

    /// Flush the dedup store after this many new records (minimum 1).
    pub fn with_flush_every(mut self, records: usize) -> Self {
        self.flush_every = records.max(1);
        self
    }

    /// Send progress events to `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<CollectorEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn categories(&self) -> &CategorySet {
        &self.categories
    }

    pub fn dedup(&self) -> &DedupStore {
        &self.dedup
    }

    pub fn sampler(&self) -> &AdaptiveSampler {
        &self.sampler
    }

    pub fn library(&self) -> &ImageLibrary {
        &self.library
    }

    /// Run one round for `category` until `target` images are accepted or
    /// the sources run dry.
    ///
    /// Only configuration and state persistence errors are returned; a
    /// shortfall is reported as [`RoundOutcome::Exhausted`].
    pub async fn run(
        &self,
        category: &str,
        target: usize,
        adapters: &[Arc<dyn SourceAdapter>],
    ) -> Result<RoundReport, CollectorError> {
        let category = self
            .categories
            .get(category)
            .cloned()
            .ok_or_else(|| CollectorError::UnknownCategory(category.to_string()))?;
        if adapters.is_empty() {
            return Err(CollectorError::NoAdapters(category.name().to_string()));
        }

        let budget = self.sampler.urls_needed(target).await;
        info!(
            "Collecting {} {} images (budget {} URLs, {} sources)",
            target,
            category,
            budget,
            adapters.len()
        );
        self.emit(CollectorEvent::Started {
            category: category.name().to_string(),
            target,
            budget,
        })
        .await;

        let tally = self.collect(&category, target, budget, adapters).await?;

        let requested = tally.requested();
        let feedback = self
            .sampler
            .update(category.name(), requested, tally.accepted)
            .await?;
        self.dedup.flush().await?;

        let multiplier = self.sampler.multiplier().await;
        let report = tally.into_report(category.name(), target, budget, feedback, multiplier);

        info!(
            "{}: {} accepted, {} rejected, {} duplicates, {} timed out ({:?})",
            category,
            report.accepted,
            report.rejected,
            report.skipped_duplicate,
            report.timed_out,
            report.outcome
        );
        self.emit(CollectorEvent::Finished {
            category: category.name().to_string(),
            accepted: report.accepted,
            target,
        })
        .await;

        Ok(report)
    }

    async fn collect(
        &self,
        category: &Category,
        target: usize,
        budget: usize,
        adapters: &[Arc<dyn SourceAdapter>],
    ) -> Result<RoundTally, CollectorError> {
        let mut tally = RoundTally::default();
        if target == 0 || budget == 0 {
            return Ok(tally);
        }

        let mut streams: Vec<CandidateStream> = Vec::with_capacity(adapters.len());
        for adapter in adapters {
            streams.push(adapter.fetch(category, budget).await);
        }

        let mut round_urls = HashSet::new();
        let mut consumed = 0;
        let mut unflushed = 0;
        let mut next = 0;

        // Round-robin over sources, in adapter order
        while !streams.is_empty() && consumed < budget && tally.accepted < target {
            next %= streams.len();
            let Some(event) = streams[next].next().await else {
                debug!("{} exhausted for {}", streams[next].source(), category);
                streams.remove(next);
                continue;
            };
            let source = streams[next].source().to_string();
            next += 1;

            if let SourceEvent::Aborted(error) = event {
                warn!("Source {} failed for {}: {}", source, category, error);
                tally.source_errors.push(format!("{}: {}", source, error));
                self.emit(CollectorEvent::SourceAborted {
                    category: category.name().to_string(),
                    source,
                    error: error.to_string(),
                })
                .await;
                // Aborted is terminal for that stream
                next -= 1;
                streams.remove(next);
                continue;
            }

            consumed += 1;
            if self.process(category, event, &mut tally, &mut round_urls).await {
                unflushed += 1;
                if unflushed >= self.flush_every {
                    self.dedup.flush().await?;
                    unflushed = 0;
                }
            }
        }

        // Dropping the streams stops the producers
        drop(streams);
        Ok(tally)
    }

    /// Handle one event. Returns true if a URL was recorded.
    async fn process(
        &self,
        category: &Category,
        event: SourceEvent,
        tally: &mut RoundTally,
        round_urls: &mut HashSet<String>,
    ) -> bool {
        let name = category.name();

        match event {
            SourceEvent::TimedOut { url } => {
                debug!("Timed out: {}", url);
                tally.timed_out += 1;
                self.emit(CollectorEvent::TimedOut {
                    category: name.to_string(),
                    url,
                })
                .await;
                false
            }
            SourceEvent::Failed { url, reason } => {
                if self.is_duplicate(&url, round_urls).await {
                    tally.skipped_duplicate += 1;
                    self.emit_duplicate(name, url).await;
                    return false;
                }
                debug!("Fetch failed for {}: {}", url, reason);
                tally.reject(FETCH_FAILED);
                let recorded = self.dedup.record(name, &url).await;
                self.emit(CollectorEvent::Rejected {
                    category: name.to_string(),
                    url,
                    reason,
                })
                .await;
                recorded
            }
            SourceEvent::Candidate(candidate) => {
                if self.is_duplicate(&candidate.url, round_urls).await {
                    tally.skipped_duplicate += 1;
                    self.emit_duplicate(name, candidate.url).await;
                    return false;
                }
                self.evaluate(category, candidate, tally).await
            }
            SourceEvent::Aborted(_) => false,
        }
    }

    async fn evaluate(&self, category: &Category, candidate: Candidate, tally: &mut RoundTally) -> bool {
        let name = category.name();
        let decision = self.filter.evaluate(&candidate.bytes, category).await;

        if let Verdict::Reject(reason) = decision.verdict {
            debug!(
                "Rejected {} at {}: {}",
                candidate.url,
                decision.stage.as_deref().unwrap_or("-"),
                reason
            );
            tally.reject(reason.code());
            // Retryable rejections say nothing about the image
            let recorded = if reason.is_retryable() {
                self.dedup.release(&candidate.url).await;
                false
            } else {
                self.dedup.record(name, &candidate.url).await
            };
            self.emit(CollectorEvent::Rejected {
                category: name.to_string(),
                url: candidate.url,
                reason: reason.to_string(),
            })
            .await;
            return recorded;
        }

        match self.library.save(name, &candidate.bytes) {
            Ok((counter, path)) => {
                let recorded = self.dedup.record(name, &candidate.url).await;
                tally.accepted += 1;
                self.emit(CollectorEvent::Accepted {
                    category: name.to_string(),
                    url: candidate.url.clone(),
                    counter,
                    path: path.clone(),
                })
                .await;
                tally.accepted_images.push(AcceptedImage {
                    url: candidate.url,
                    category: name.to_string(),
                    source: candidate.source,
                    counter,
                    path,
                    size: candidate.bytes.len() as u64,
                    saved_at: Utc::now(),
                });
                recorded
            }
            Err(e) => {
                // Not recorded, so the URL is retried on a later round
                warn!("Failed to store image from {}: {}", candidate.url, e);
                self.dedup.release(&candidate.url).await;
                tally.reject(WRITE_FAILED);
                self.emit(CollectorEvent::Rejected {
                    category: name.to_string(),
                    url: candidate.url,
                    reason: e.to_string(),
                })
                .await;
                false
            }
        }
    }

    /// Seen earlier this round, or handled (or being handled) in any
    /// category. A false return means this round holds the claim on `url`
    /// and must record or release it.
    async fn is_duplicate(&self, url: &str, round_urls: &mut HashSet<String>) -> bool {
        if !round_urls.insert(url.to_string()) {
            return true;
        }
        !self.dedup.claim(url).await
    }

    async fn emit_duplicate(&self, category: &str, url: String) {
        debug!("Skipping already handled URL: {}", url);
        self.emit(CollectorEvent::Duplicate {
            category: category.to_string(),
            url,
        })
        .await;
    }

    async fn emit(&self, event: CollectorEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }
}
