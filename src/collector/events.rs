//! Progress events emitted during a round.

use std::path::PathBuf;

/// Events emitted while a round runs.
#[derive(Debug, Clone)]
pub enum CollectorEvent {
    /// Round started with this URL budget.
    Started {
        category: String,
        target: usize,
        budget: usize,
    },
    /// Image accepted and written.
    Accepted {
        category: String,
        url: String,
        counter: u64,
        path: PathBuf,
    },
    /// Candidate rejected (or fetch failed).
    Rejected {
        category: String,
        url: String,
        reason: String,
    },
    /// Candidate skipped as already handled.
    Duplicate { category: String, url: String },
    /// Download timed out; left for a later round.
    TimedOut { category: String, url: String },
    /// A source gave up for this round.
    SourceAborted {
        category: String,
        source: String,
        error: String,
    },
    /// Round finished.
    Finished {
        category: String,
        accepted: usize,
        target: usize,
    },
}

impl CollectorEvent {
    pub fn category(&self) -> &str {
        match self {
            CollectorEvent::Started { category, .. }
            | CollectorEvent::Accepted { category, .. }
            | CollectorEvent::Rejected { category, .. }
            | CollectorEvent::Duplicate { category, .. }
            | CollectorEvent::TimedOut { category, .. }
            | CollectorEvent::SourceAborted { category, .. }
            | CollectorEvent::Finished { category, .. } => category,
        }
    }
}
