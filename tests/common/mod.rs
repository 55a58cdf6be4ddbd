//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::{ImageBuffer, ImageFormat, Rgb, RgbImage};

use jamhot_collector::collector::Collector;
use jamhot_collector::dedup::DedupStore;
use jamhot_collector::models::{Candidate, Category, CategorySet};
use jamhot_collector::quality::{BasicQualityStage, QualityFilter};
use jamhot_collector::sampler::{AdaptiveSampler, SamplerConfig};
use jamhot_collector::scrapers::{CandidateStream, SourceAdapter, SourceEvent};
use jamhot_collector::storage::ImageLibrary;

/// Noisy grayscale PNG that passes the basic quality checks.
pub fn textured_png(width: u32, height: u32) -> Vec<u8> {
    let mut state: u32 = 0x1234_5678;
    let mut next = move || {
        state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        ((state >> 16) % 200 + 40) as u8
    };
    let img: RgbImage = ImageBuffer::from_fn(width, height, |_, _| {
        let v = next();
        Rgb([v, v, v])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

pub fn good_image() -> Vec<u8> {
    textured_png(200, 160)
}

pub fn candidate(url: &str, category: &str, source: &str, bytes: Vec<u8>) -> SourceEvent {
    SourceEvent::Candidate(Candidate::new(url.to_string(), bytes, category, source))
}

/// `count` good candidates at `{prefix}{n}` for n in 1..=count.
pub fn good_candidates(prefix: &str, count: usize, category: &str, source: &str) -> Vec<SourceEvent> {
    let bytes = good_image();
    (1..=count)
        .map(|n| candidate(&format!("{}{}", prefix, n), category, source, bytes.clone()))
        .collect()
}

/// Source that replays a fixed list of events on its first fetch.
pub struct ScriptedSource {
    name: String,
    events: Mutex<Vec<SourceEvent>>,
}

impl ScriptedSource {
    pub fn new(name: &str, events: Vec<SourceEvent>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            events: Mutex::new(events),
        })
    }
}

#[async_trait]
impl SourceAdapter for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, _category: &Category, _max_candidates: usize) -> CandidateStream {
        let events = std::mem::take(&mut *self.events.lock().unwrap());
        CandidateStream::from_events(&self.name, events)
    }
}

pub fn basic_filter() -> QualityFilter {
    QualityFilter::new().with_stage(Arc::new(BasicQualityStage::default()))
}

/// Collector over `root` with an in-memory sampler.
pub async fn collector(root: &Path, filter: QualityFilter) -> Collector {
    Collector::new(
        CategorySet::defaults(),
        DedupStore::open(root).await.unwrap(),
        AdaptiveSampler::in_memory(SamplerConfig::default()).unwrap(),
        filter,
        ImageLibrary::new(root),
    )
}

/// Collector whose dedup and sampler state both live on disk.
pub async fn durable_collector(root: &Path, filter: QualityFilter) -> Collector {
    let images = root.join("images");
    Collector::new(
        CategorySet::defaults(),
        DedupStore::open(&images).await.unwrap(),
        AdaptiveSampler::load(root.join("sampler.json"), SamplerConfig::default()).unwrap(),
        filter,
        ImageLibrary::new(&images),
    )
}
