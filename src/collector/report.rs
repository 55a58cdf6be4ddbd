//! Round results.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::AcceptedImage;
use crate::sampler::UpdateOutcome;

/// Reason code for downloads that failed outright.
pub const FETCH_FAILED: &str = "fetch_failed";
/// Reason code for accepted images that could not be written.
pub const WRITE_FAILED: &str = "write_failed";

/// How a round ended. Both are successful terminations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundOutcome {
    TargetMet,
    /// Sources ran dry (or the budget was spent) before the target.
    Exhausted,
}

/// Counts for one round.
///
/// `accepted + rejected + skipped_duplicate == candidates_seen`. Timeouts are
/// not candidates.
#[derive(Debug, Clone, Serialize)]
pub struct RoundReport {
    pub category: String,
    pub target: usize,
    /// URLs the sampler asked for.
    pub urls_budget: usize,
    /// URLs actually worked on: accepted + rejected + timed out.
    pub requested: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub skipped_duplicate: usize,
    pub timed_out: usize,
    pub candidates_seen: usize,
    pub outcome: RoundOutcome,
    pub feedback: UpdateOutcome,
    pub multiplier: f64,
    pub rejections_by_reason: BTreeMap<String, usize>,
    pub source_errors: Vec<String>,
    pub accepted_images: Vec<AcceptedImage>,
}

/// Running counters while a round is in progress.
#[derive(Debug, Default)]
pub(crate) struct RoundTally {
    pub accepted: usize,
    pub rejected: usize,
    pub skipped_duplicate: usize,
    pub timed_out: usize,
    pub rejections_by_reason: BTreeMap<String, usize>,
    pub source_errors: Vec<String>,
    pub accepted_images: Vec<AcceptedImage>,
}

impl RoundTally {
    pub fn reject(&mut self, code: &str) {
        self.rejected += 1;
        *self.rejections_by_reason.entry(code.to_string()).or_default() += 1;
    }

    pub fn candidates_seen(&self) -> usize {
        self.accepted + self.rejected + self.skipped_duplicate
    }

    pub fn requested(&self) -> usize {
        self.accepted + self.rejected + self.timed_out
    }

    pub fn into_report(
        self,
        category: &str,
        target: usize,
        urls_budget: usize,
        feedback: UpdateOutcome,
        multiplier: f64,
    ) -> RoundReport {
        let outcome = if self.accepted >= target {
            RoundOutcome::TargetMet
        } else {
            RoundOutcome::Exhausted
        };
        RoundReport {
            category: category.to_string(),
            target,
            urls_budget,
            requested: self.requested(),
            accepted: self.accepted,
            rejected: self.rejected,
            skipped_duplicate: self.skipped_duplicate,
            timed_out: self.timed_out,
            candidates_seen: self.candidates_seen(),
            outcome,
            feedback,
            multiplier,
            rejections_by_reason: self.rejections_by_reason,
            source_errors: self.source_errors,
            accepted_images: self.accepted_images,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_counts() {
        let mut tally = RoundTally::default();
        tally.accepted = 2;
        tally.reject("no_subject");
        tally.reject("no_subject");
        tally.reject(FETCH_FAILED);
        tally.skipped_duplicate = 1;
        tally.timed_out = 4;

        assert_eq!(tally.candidates_seen(), 6);
        assert_eq!(tally.requested(), 9);

        let report = tally.into_report("apple", 3, 30, UpdateOutcome::NoData, 10.0);
        assert_eq!(report.outcome, RoundOutcome::Exhausted);
        assert_eq!(report.rejections_by_reason["no_subject"], 2);
        assert_eq!(
            report.accepted + report.rejected + report.skipped_duplicate,
            report.candidates_seen
        );
    }
}
