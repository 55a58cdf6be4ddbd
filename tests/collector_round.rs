//! End-to-end collection rounds against scripted sources.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use tempfile::tempdir;

use common::*;
use jamhot_collector::collector::{Collector, RoundOutcome};
use jamhot_collector::models::{Category, CategorySet};
use jamhot_collector::quality::{
    DecodedImage, Detection, FilterStage, SingleSubjectConfig, SingleSubjectStage, SubjectDetector,
    Verdict, VisionError,
};
use jamhot_collector::sampler::UpdateOutcome;
use jamhot_collector::scrapers::{SourceAdapter, SourceError, SourceEvent};

struct FixedDetector(Vec<Detection>);

#[async_trait]
impl SubjectDetector for FixedDetector {
    async fn detect(&self, _image: &DecodedImage) -> Result<Vec<Detection>, VisionError> {
        Ok(self.0.clone())
    }
}

struct DownDetector;

#[async_trait]
impl SubjectDetector for DownDetector {
    async fn detect(&self, _image: &DecodedImage) -> Result<Vec<Detection>, VisionError> {
        Err(VisionError::Unavailable("connection refused".to_string()))
    }
}

/// Accepts everything after a pause, holding the URL in flight.
struct SlowStage;

#[async_trait]
impl FilterStage for SlowStage {
    fn name(&self) -> &str {
        "slow"
    }

    async fn evaluate(&self, _image: &DecodedImage, _target: &Category) -> Verdict {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        Verdict::Accept
    }
}

fn apple(confidence: f32) -> Detection {
    Detection {
        label: "apple".to_string(),
        confidence,
    }
}

#[tokio::test]
async fn test_round_stops_at_target() {
    let dir = tempdir().unwrap();
    let collector = collector(dir.path(), basic_filter()).await;
    let source = ScriptedSource::new("list", good_candidates("https://img.test/a", 50, "apple", "list"));
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![source];

    let report = collector.run("apple", 5, &adapters).await.unwrap();

    assert_eq!(report.outcome, RoundOutcome::TargetMet);
    assert_eq!(report.urls_budget, 50);
    assert_eq!(report.accepted, 5);
    assert_eq!(report.requested, 5);
    assert_eq!(report.rejected, 0);
    assert_eq!(collector.dedup().len().await, 5);
    assert_eq!(collector.library().count("apple").unwrap(), 5);

    let counters: Vec<u64> = report.accepted_images.iter().map(|i| i.counter).collect();
    assert_eq!(counters, vec![1, 2, 3, 4, 5]);
    assert!(report.accepted_images[0]
        .path
        .ends_with("apple/00001_apple.png"));

    // 0.9 * 10 + 0.1 * (5 / 5)
    assert!((report.multiplier - 9.1).abs() < 1e-9);
    assert!(matches!(report.feedback, UpdateOutcome::Updated { .. }));
}

#[tokio::test]
async fn test_repeated_url_within_round_is_skipped() {
    let dir = tempdir().unwrap();
    let collector = collector(dir.path(), basic_filter()).await;
    let bytes = good_image();
    let source = ScriptedSource::new(
        "list",
        vec![
            candidate("https://img.test/1", "apple", "list", bytes.clone()),
            candidate("https://img.test/1", "apple", "list", bytes.clone()),
            candidate("https://img.test/2", "apple", "list", bytes),
        ],
    );
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![source];

    let report = collector.run("apple", 5, &adapters).await.unwrap();

    assert_eq!(report.accepted, 2);
    assert_eq!(report.skipped_duplicate, 1);
    assert_eq!(report.candidates_seen, 3);
    assert_eq!(report.requested, 2);
    assert_eq!(report.outcome, RoundOutcome::Exhausted);
    assert_eq!(collector.library().count("apple").unwrap(), 2);
}

#[tokio::test]
async fn test_url_recorded_for_another_category_is_skipped() {
    let dir = tempdir().unwrap();
    let collector = collector(dir.path(), basic_filter()).await;
    collector.dedup().record("apple", "https://img.test/shared").await;

    let bytes = good_image();
    let source = ScriptedSource::new(
        "list",
        vec![
            candidate("https://img.test/shared", "banana", "list", bytes.clone()),
            candidate("https://img.test/banana", "banana", "list", bytes),
        ],
    );
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![source];

    let report = collector.run("banana", 2, &adapters).await.unwrap();

    assert_eq!(report.skipped_duplicate, 1);
    assert_eq!(report.accepted, 1);
    let banana_urls = collector.dedup().urls("banana").await;
    assert_eq!(banana_urls, vec!["https://img.test/banana".to_string()]);
    assert_eq!(collector.dedup().category_count("apple").await, 1);
}

#[tokio::test]
async fn test_multiple_subjects_rejected_and_recorded() {
    let dir = tempdir().unwrap();
    let detector = Arc::new(FixedDetector(vec![apple(0.9), apple(0.8)]));
    let filter = basic_filter().with_stage(Arc::new(SingleSubjectStage::new(
        detector,
        SingleSubjectConfig::default(),
    )));
    let collector = collector(dir.path(), filter).await;
    let source = ScriptedSource::new(
        "list",
        vec![candidate("https://img.test/pair", "apple", "list", good_image())],
    );
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![source];

    let report = collector.run("apple", 1, &adapters).await.unwrap();

    assert_eq!(report.accepted, 0);
    assert_eq!(report.rejected, 1);
    assert_eq!(report.rejections_by_reason.get("multiple_subjects"), Some(&1));
    assert!(collector.dedup().contains("https://img.test/pair").await);
    assert_eq!(collector.library().count("apple").unwrap(), 0);
}

#[tokio::test]
async fn test_unavailable_model_leaves_url_unrecorded() {
    let dir = tempdir().unwrap();
    let filter = basic_filter().with_stage(Arc::new(SingleSubjectStage::new(
        Arc::new(DownDetector),
        SingleSubjectConfig::default(),
    )));
    let collector = collector(dir.path(), filter).await;
    let source = ScriptedSource::new(
        "list",
        vec![candidate("https://img.test/retry", "apple", "list", good_image())],
    );
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![source];

    let report = collector.run("apple", 1, &adapters).await.unwrap();

    assert_eq!(report.rejections_by_reason.get("model_unavailable"), Some(&1));
    assert!(!collector.dedup().contains("https://img.test/retry").await);
}

#[tokio::test]
async fn test_timeouts_are_requested_but_not_recorded() {
    let dir = tempdir().unwrap();
    let collector = collector(dir.path(), basic_filter()).await;

    let mut events = good_candidates("https://img.test/ok", 7, "apple", "list");
    for n in 1..=3 {
        events.insert(
            n * 2,
            SourceEvent::TimedOut {
                url: format!("https://img.test/slow{}", n),
            },
        );
    }
    let source = ScriptedSource::new("list", events);
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![source];

    let report = collector.run("apple", 10, &adapters).await.unwrap();

    assert_eq!(report.accepted, 7);
    assert_eq!(report.timed_out, 3);
    assert_eq!(report.requested, 10);
    assert_eq!(report.candidates_seen, 7);
    assert_eq!(report.outcome, RoundOutcome::Exhausted);
    assert_eq!(collector.dedup().len().await, 7);
    for n in 1..=3 {
        assert!(
            !collector
                .dedup()
                .contains(&format!("https://img.test/slow{}", n))
                .await
        );
    }
}

#[tokio::test]
async fn test_failed_download_is_recorded() {
    let dir = tempdir().unwrap();
    let collector = collector(dir.path(), basic_filter()).await;
    let source = ScriptedSource::new(
        "list",
        vec![SourceEvent::Failed {
            url: "https://img.test/gone".to_string(),
            reason: "HTTP 404".to_string(),
        }],
    );
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![source];

    let report = collector.run("apple", 1, &adapters).await.unwrap();

    assert_eq!(report.rejections_by_reason.get("fetch_failed"), Some(&1));
    assert!(collector.dedup().contains("https://img.test/gone").await);
}

#[tokio::test]
async fn test_all_rejected_round_leaves_multiplier() {
    let dir = tempdir().unwrap();
    let collector = collector(dir.path(), basic_filter()).await;
    let events = (1..=5)
        .map(|n| {
            candidate(
                &format!("https://img.test/junk{}", n),
                "apple",
                "list",
                b"<html>not an image</html>".to_vec(),
            )
        })
        .collect();
    let source = ScriptedSource::new("list", events);
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![source];

    let report = collector.run("apple", 2, &adapters).await.unwrap();

    assert_eq!(report.accepted, 0);
    assert_eq!(report.rejected, 5);
    assert_eq!(report.rejections_by_reason.get("decode_error"), Some(&5));
    assert_eq!(report.feedback, UpdateOutcome::Degenerate { streak: 1 });
    assert_eq!(report.multiplier, 10.0);
    assert_eq!(collector.sampler().multiplier().await, 10.0);
    assert_eq!(collector.dedup().len().await, 5);
}

#[tokio::test]
async fn test_sources_are_interleaved() {
    let dir = tempdir().unwrap();
    let collector = collector(dir.path(), basic_filter()).await;
    let a = ScriptedSource::new("a", good_candidates("https://a.test/", 2, "apple", "a"));
    let b = ScriptedSource::new("b", good_candidates("https://b.test/", 2, "apple", "b"));
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![a, b];

    let report = collector.run("apple", 4, &adapters).await.unwrap();

    let urls: Vec<&str> = report
        .accepted_images
        .iter()
        .map(|i| i.url.as_str())
        .collect();
    assert_eq!(
        urls,
        vec![
            "https://a.test/1",
            "https://b.test/1",
            "https://a.test/2",
            "https://b.test/2"
        ]
    );
    assert_eq!(report.accepted_images[1].source, "b");
}

#[tokio::test]
async fn test_aborted_source_does_not_end_round() {
    let dir = tempdir().unwrap();
    let collector = collector(dir.path(), basic_filter()).await;
    let broken = ScriptedSource::new(
        "broken",
        vec![SourceEvent::Aborted(SourceError::Auth {
            source_name: "broken".to_string(),
            message: "HTTP 401".to_string(),
        })],
    );
    let good = ScriptedSource::new("good", good_candidates("https://img.test/g", 3, "apple", "good"));
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![broken, good];

    let report = collector.run("apple", 3, &adapters).await.unwrap();

    assert_eq!(report.outcome, RoundOutcome::TargetMet);
    assert_eq!(report.accepted, 3);
    assert_eq!(report.source_errors.len(), 1);
    assert!(report.source_errors[0].starts_with("broken:"));
}

#[tokio::test]
async fn test_concurrent_rounds_share_one_url_once() {
    let dir = tempdir().unwrap();
    let collector = collector(dir.path(), basic_filter().with_stage(Arc::new(SlowStage))).await;
    let shared = "https://img.test/shared";
    let for_apple: Vec<Arc<dyn SourceAdapter>> = vec![ScriptedSource::new(
        "list",
        vec![candidate(shared, "apple", "list", good_image())],
    )];
    let for_pear: Vec<Arc<dyn SourceAdapter>> = vec![ScriptedSource::new(
        "list",
        vec![candidate(shared, "pear", "list", good_image())],
    )];

    let (apple, pear) = tokio::join!(
        collector.run("apple", 1, &for_apple),
        collector.run("pear", 1, &for_pear)
    );
    let (apple, pear) = (apple.unwrap(), pear.unwrap());

    assert_eq!(apple.accepted + pear.accepted, 1);
    assert_eq!(apple.skipped_duplicate + pear.skipped_duplicate, 1);

    let library = collector.library();
    assert_eq!(library.count("apple").unwrap() + library.count("pear").unwrap(), 1);

    let dedup = collector.dedup();
    assert_eq!(dedup.len().await, 1);
    assert_eq!(
        dedup.category_count("apple").await + dedup.category_count("pear").await,
        1
    );
}

#[tokio::test]
async fn test_retryable_rejection_releases_url_for_next_round() {
    let dir = tempdir().unwrap();
    let down = basic_filter().with_stage(Arc::new(SingleSubjectStage::new(
        Arc::new(DownDetector),
        SingleSubjectConfig::default(),
    )));
    let collector = collector(dir.path(), down).await;
    let url = "https://img.test/later";
    let first: Vec<Arc<dyn SourceAdapter>> = vec![ScriptedSource::new(
        "list",
        vec![candidate(url, "apple", "list", good_image())],
    )];
    collector.run("apple", 1, &first).await.unwrap();
    assert!(!collector.dedup().contains(url).await);

    // Same stores, working filter
    let retry = Collector::new(
        CategorySet::defaults(),
        collector.dedup().clone(),
        collector.sampler().clone(),
        basic_filter(),
        collector.library().clone(),
    );
    let second: Vec<Arc<dyn SourceAdapter>> = vec![ScriptedSource::new(
        "list",
        vec![candidate(url, "apple", "list", good_image())],
    )];
    let report = retry.run("apple", 1, &second).await.unwrap();

    assert_eq!(report.accepted, 1);
    assert_eq!(report.skipped_duplicate, 0);
    assert!(collector.dedup().contains(url).await);
}
