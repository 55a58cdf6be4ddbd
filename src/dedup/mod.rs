//! Deduplication store for processed source URLs.
//!
//! Every URL ever handled (accepted or rejected) is recorded under the
//! category it was fetched for. Membership is checked against a global index
//! spanning all categories, so no URL is downloaded twice anywhere in the
//! library. Writes go through one mutex; flushing happens under the same lock.

mod backend;

pub use backend::{JsonDirBackend, RecordBackend};

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::scrapers::SeenUrls;

/// Result type for dedup operations.
pub type DedupResult<T> = Result<T, DedupError>;

/// Errors from the deduplication store.
#[derive(Debug, thiserror::Error)]
pub enum DedupError {
    #[error("Corrupt record file for '{category}' at {path}: {source}")]
    Corrupt {
        category: String,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to serialize records: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// In-memory record sets plus the global URL index.
///
/// Pure state with no I/O; [`DedupStore`] wraps it with locking and
/// persistence.
#[derive(Debug, Default, Clone)]
pub struct DedupIndex {
    records: BTreeMap<String, Vec<String>>,
    owners: HashMap<String, String>,
    dirty: BTreeSet<String>,
    /// URLs claimed by a running round but not yet recorded.
    in_flight: HashSet<String>,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a category's stored records without marking it dirty.
    pub fn insert_loaded(&mut self, category: &str, urls: Vec<String>) {
        for url in &urls {
            self.owners
                .entry(url.clone())
                .or_insert_with(|| category.to_string());
        }
        self.records
            .entry(category.to_string())
            .or_default()
            .extend(urls);
    }

    /// True if the URL has been handled under any category, or is being
    /// handled right now.
    pub fn contains(&self, url: &str) -> bool {
        self.owners.contains_key(url) || self.in_flight.contains(url)
    }

    /// Reserve a URL for processing. Returns false if it is recorded or
    /// already claimed.
    ///
    /// A successful claim ends with [`record`](Self::record) or
    /// [`release`](Self::release).
    pub fn claim(&mut self, url: &str) -> bool {
        if self.contains(url) {
            return false;
        }
        self.in_flight.insert(url.to_string());
        true
    }

    /// Give up a claim without recording, so the URL can be retried.
    pub fn release(&mut self, url: &str) -> bool {
        self.in_flight.remove(url)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Category a URL was first recorded under.
    pub fn owner(&self, url: &str) -> Option<&str> {
        self.owners.get(url).map(|s| s.as_str())
    }

    /// Record a URL as handled, committing any claim on it. Returns false
    /// if it was already recorded.
    pub fn record(&mut self, category: &str, url: &str) -> bool {
        self.in_flight.remove(url);
        if self.owners.contains_key(url) {
            return false;
        }
        self.owners.insert(url.to_string(), category.to_string());
        self.records
            .entry(category.to_string())
            .or_default()
            .push(url.to_string());
        self.dirty.insert(category.to_string());
        true
    }

    /// URLs recorded for a category, in insertion order.
    pub fn urls(&self, category: &str) -> &[String] {
        self.records
            .get(category)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Total number of distinct URLs across all categories.
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    /// Number of records per category.
    pub fn category_counts(&self) -> BTreeMap<String, usize> {
        self.records
            .iter()
            .map(|(k, v)| (k.clone(), v.len()))
            .collect()
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Drain the set of categories with unflushed records.
    pub fn take_dirty(&mut self) -> Vec<String> {
        std::mem::take(&mut self.dirty).into_iter().collect()
    }

    pub fn mark_dirty(&mut self, category: &str) {
        self.dirty.insert(category.to_string());
    }

    /// Drop every record for a category.
    ///
    /// URLs also present in another category's stored list stay known.
    pub fn clear_category(&mut self, category: &str) -> usize {
        let removed = self.records.remove(category).map(|v| v.len()).unwrap_or(0);
        self.dirty.remove(category);

        self.owners.clear();
        for (name, urls) in &self.records {
            for url in urls {
                self.owners
                    .entry(url.clone())
                    .or_insert_with(|| name.clone());
            }
        }
        removed
    }
}

/// Shared handle to the deduplication store.
///
/// Cheap to clone; all clones see the same index and serialize their writes.
#[derive(Clone)]
pub struct DedupStore {
    index: Arc<Mutex<DedupIndex>>,
    backend: Arc<dyn RecordBackend>,
}

impl DedupStore {
    /// Hydrate the store from a backend.
    ///
    /// Missing records are an empty set; corrupt records are an error.
    pub async fn load(backend: Arc<dyn RecordBackend>) -> DedupResult<Self> {
        let mut index = DedupIndex::new();
        for (category, urls) in backend.load_all().await? {
            index.insert_loaded(&category, urls);
        }
        info!(
            "Dedup store loaded: {} URLs across {} categories",
            index.len(),
            index.records.len()
        );

        Ok(Self {
            index: Arc::new(Mutex::new(index)),
            backend,
        })
    }

    /// Open the JSON-directory store rooted at the images directory.
    pub async fn open(images_root: &Path) -> DedupResult<Self> {
        Self::load(Arc::new(JsonDirBackend::new(images_root))).await
    }

    pub async fn contains(&self, url: &str) -> bool {
        self.index.lock().await.contains(url)
    }

    /// Check and reserve a URL under one lock.
    ///
    /// Concurrent rounds racing for the same URL get exactly one `true`.
    pub async fn claim(&self, url: &str) -> bool {
        self.index.lock().await.claim(url)
    }

    /// Drop a claim on a URL that was not recorded.
    pub async fn release(&self, url: &str) {
        if !self.index.lock().await.release(url) {
            debug!("Released unclaimed URL: {}", url);
        }
    }

    /// Record a URL as handled for a category.
    ///
    /// Idempotent: recording a URL that is already known anywhere is a
    /// no-op returning false.
    pub async fn record(&self, category: &str, url: &str) -> bool {
        let added = self.index.lock().await.record(category, url);
        if !added {
            debug!("URL already recorded, ignoring: {}", url);
        }
        added
    }

    /// Write every category with new records back to the backend.
    ///
    /// Returns the number of categories written.
    pub async fn flush(&self) -> DedupResult<usize> {
        let mut index = self.index.lock().await;
        let dirty = index.take_dirty();

        for (i, category) in dirty.iter().enumerate() {
            let urls = index.urls(category).to_vec();
            if let Err(e) = self.backend.store(category, &urls).await {
                warn!("Failed to flush records for {}: {}", category, e);
                for remaining in &dirty[i..] {
                    index.mark_dirty(remaining);
                }
                return Err(e);
            }
        }

        if !dirty.is_empty() {
            debug!("Flushed records for {} categories", dirty.len());
        }
        Ok(dirty.len())
    }

    /// Clear a category's records in memory and durably.
    pub async fn reset(&self, category: &str) -> DedupResult<usize> {
        let mut index = self.index.lock().await;
        self.backend.clear(category).await?;
        let removed = index.clear_category(category);
        info!("Reset {} processed URLs for {}", removed, category);
        Ok(removed)
    }

    pub async fn len(&self) -> usize {
        self.index.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.index.lock().await.is_empty()
    }

    pub async fn category_count(&self, category: &str) -> usize {
        self.index.lock().await.urls(category).len()
    }

    pub async fn category_counts(&self) -> BTreeMap<String, usize> {
        self.index.lock().await.category_counts()
    }

    /// Copy of a category's records, in insertion order.
    pub async fn urls(&self, category: &str) -> Vec<String> {
        self.index.lock().await.urls(category).to_vec()
    }
}

#[async_trait]
impl SeenUrls for DedupStore {
    async fn is_seen(&self, url: &str) -> bool {
        self.contains(url).await
    }
}
