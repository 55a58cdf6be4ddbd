//! Pluggable backend trait for processed-URL record storage.
//!
//! The default backend keeps one JSON array per category next to that
//! category's images. A key-value store can be substituted by implementing
//! [`RecordBackend`] without touching the collector.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{DedupError, DedupResult};
use crate::storage::{write_atomic, RECORD_FILE_NAME};

/// Durable storage for per-category URL record sets.
#[async_trait]
pub trait RecordBackend: Send + Sync {
    /// Load every category's record set, in stored order.
    ///
    /// Categories with no stored records are omitted.
    async fn load_all(&self) -> DedupResult<Vec<(String, Vec<String>)>>;

    /// Replace the stored record set for one category.
    async fn store(&self, category: &str, urls: &[String]) -> DedupResult<()>;

    /// Remove the stored record set for one category.
    async fn clear(&self, category: &str) -> DedupResult<()>;
}

/// Stores `<root>/<category>/processed_urls.json` files.
#[derive(Debug, Clone)]
pub struct JsonDirBackend {
    root: PathBuf,
}

impl JsonDirBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn record_path(&self, category: &str) -> PathBuf {
        self.root.join(category).join(RECORD_FILE_NAME)
    }

    fn read_category(&self, category: &str, path: &Path) -> DedupResult<Option<Vec<String>>> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(DedupError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        let urls: Vec<String> =
            serde_json::from_str(&raw).map_err(|e| DedupError::Corrupt {
                category: category.to_string(),
                path: path.to_path_buf(),
                source: e,
            })?;
        Ok(Some(urls))
    }
}

#[async_trait]
impl RecordBackend for JsonDirBackend {
    async fn load_all(&self) -> DedupResult<Vec<(String, Vec<String>)>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(DedupError::Io {
                    path: self.root.clone(),
                    source: e,
                })
            }
        };

        let mut loaded = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DedupError::Io {
                path: self.root.clone(),
                source: e,
            })?;
            if !entry.path().is_dir() {
                continue;
            }
            let Some(category) = entry.file_name().to_str().map(|s| s.to_string()) else {
                continue;
            };

            let path = self.record_path(&category);
            if let Some(urls) = self.read_category(&category, &path)? {
                debug!("Loaded {} processed URLs for {}", urls.len(), category);
                loaded.push((category, urls));
            }
        }

        loaded.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(loaded)
    }

    async fn store(&self, category: &str, urls: &[String]) -> DedupResult<()> {
        let path = self.record_path(category);
        let json = serde_json::to_vec_pretty(urls).map_err(DedupError::Serialize)?;
        write_atomic(&path, &json).map_err(|e| DedupError::Io { path, source: e })
    }

    async fn clear(&self, category: &str) -> DedupResult<()> {
        let path = self.record_path(category);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DedupError::Io { path, source: e }),
        }
    }
}
