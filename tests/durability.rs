//! State survives a restart: processed URLs, the sampler multiplier and
//! image counters all pick up where the previous process left off.

mod common;

use std::sync::Arc;

use tempfile::tempdir;

use common::*;
use jamhot_collector::dedup::DedupStore;
use jamhot_collector::sampler::{AdaptiveSampler, SamplerConfig};
use jamhot_collector::scrapers::SourceAdapter;
use jamhot_collector::storage::{image_filename, ImageLibrary};

#[tokio::test]
async fn test_rounds_resume_after_restart() {
    let dir = tempdir().unwrap();

    {
        let collector = durable_collector(dir.path(), basic_filter()).await;
        let source = ScriptedSource::new("list", good_candidates("https://img.test/", 2, "apple", "list"));
        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![source];
        let report = collector.run("apple", 2, &adapters).await.unwrap();
        assert_eq!(report.accepted, 2);
    }

    // New process: same directories, fresh handles
    let collector = durable_collector(dir.path(), basic_filter()).await;
    assert_eq!(collector.dedup().category_count("apple").await, 2);
    // 0.9 * 10 + 0.1 * 1
    assert!((collector.sampler().multiplier().await - 9.1).abs() < 1e-9);

    let source = ScriptedSource::new("list", good_candidates("https://img.test/", 4, "apple", "list"));
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![source];
    let report = collector.run("apple", 2, &adapters).await.unwrap();

    assert_eq!(report.skipped_duplicate, 2);
    assert_eq!(report.accepted, 2);
    let counters: Vec<u64> = report.accepted_images.iter().map(|i| i.counter).collect();
    assert_eq!(counters, vec![3, 4]);

    let images = dir.path().join("images").join("apple");
    for counter in 1..=4 {
        assert!(images.join(image_filename(counter, "apple", "png")).exists());
    }
}

#[tokio::test]
async fn test_dedup_reload_sees_flushed_records() {
    let dir = tempdir().unwrap();

    let store = DedupStore::open(dir.path()).await.unwrap();
    assert!(store.record("cherry", "https://img.test/c1").await);
    assert!(store.record("plum", "https://img.test/p1").await);
    assert!(!store.record("plum", "https://img.test/c1").await);
    store.flush().await.unwrap();

    let reopened = DedupStore::open(dir.path()).await.unwrap();
    assert_eq!(reopened.len().await, 2);
    assert!(reopened.contains("https://img.test/c1").await);
    assert_eq!(reopened.urls("plum").await, vec!["https://img.test/p1".to_string()]);
}

#[tokio::test]
async fn test_sampler_reload_keeps_multiplier() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sampler.json");

    let sampler = AdaptiveSampler::load(&path, SamplerConfig::default()).unwrap();
    sampler.update("apple", 20, 4).await.unwrap();
    // 0.9 * 10 + 0.1 * 5
    assert!((sampler.multiplier().await - 9.5).abs() < 1e-9);

    let reloaded = AdaptiveSampler::load(&path, SamplerConfig::default()).unwrap();
    assert!((reloaded.multiplier().await - 9.5).abs() < 1e-9);
    assert_eq!(reloaded.urls_needed(2).await, 19);
}

#[tokio::test]
async fn test_counters_continue_past_foreign_files() {
    let dir = tempdir().unwrap();
    let library = ImageLibrary::new(dir.path());
    let category_dir = library.category_dir("fig");
    std::fs::create_dir_all(&category_dir).unwrap();
    std::fs::write(category_dir.join("holiday.jpg"), b"x").unwrap();
    std::fs::write(category_dir.join("00007_fig.png"), b"x").unwrap();

    let (counter, path) = library.save("fig", &good_image()).unwrap();

    assert_eq!(counter, 8);
    assert!(path.ends_with("00008_fig.png"));
}
