//! Adapter over operator-curated URL lists.
//!
//! Reads `<dir>/<category>.txt`, one URL per line. Blank lines and lines
//! starting with `#` are ignored.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::fetch_pool::{CandidateEmitter, FetchPool};
use super::{CandidateStream, SeenUrls, SourceAdapter, SourceError};
use crate::models::Category;

const SOURCE_NAME: &str = "url_list";

/// URLs to fetch per batch, so early stop leaves the rest untouched.
const BATCH_SIZE: usize = 8;

/// Parse a URL list file body.
pub fn parse_url_list(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| line.starts_with("http://") || line.starts_with("https://"))
        .map(str::to_string)
        .collect()
}

/// Pulls candidates from per-category URL list files.
#[derive(Clone)]
pub struct UrlListAdapter {
    dir: PathBuf,
    pool: FetchPool,
    seen: Option<Arc<dyn SeenUrls>>,
}

impl UrlListAdapter {
    pub fn new(dir: impl Into<PathBuf>, pool: FetchPool) -> Self {
        Self {
            dir: dir.into(),
            pool,
            seen: None,
        }
    }

    pub fn with_seen_urls(mut self, seen: Arc<dyn SeenUrls>) -> Self {
        self.seen = Some(seen);
        self
    }

    pub fn list_path(&self, category: &str) -> PathBuf {
        self.dir.join(format!("{}.txt", category))
    }

    async fn read_list(path: &Path) -> Result<Option<Vec<String>>, io::Error> {
        match tokio::fs::read_to_string(path).await {
            Ok(body) => Ok(Some(parse_url_list(&body))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn produce(self, urls: Vec<String>, mut emitter: CandidateEmitter) {
        for batch in urls.chunks(BATCH_SIZE) {
            if emitter.is_done() {
                return;
            }
            if !emitter.emit_urls(&self.pool, batch.to_vec()).await {
                return;
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for UrlListAdapter {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch(&self, category: &Category, max_candidates: usize) -> CandidateStream {
        let path = self.list_path(category.name());
        let urls = match Self::read_list(&path).await {
            Ok(Some(urls)) => urls,
            Ok(None) => {
                debug!("No URL list for {} at {}", category, path.display());
                return CandidateStream::empty(SOURCE_NAME);
            }
            Err(e) => {
                return CandidateStream::aborted(
                    SOURCE_NAME,
                    SourceError::Io {
                        path,
                        message: e.to_string(),
                    },
                )
            }
        };

        info!(
            "URL list: {} URLs for {} (up to {} candidates)",
            urls.len(),
            category,
            max_candidates
        );

        let (tx, stream) = CandidateStream::channel(SOURCE_NAME);
        let emitter = CandidateEmitter::new(
            tx,
            self.seen.clone(),
            category.name(),
            SOURCE_NAME,
            max_candidates,
        );
        tokio::spawn(self.clone().produce(urls, emitter));
        stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrapers::HttpClient;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_parse_url_list() {
        let body = "\n# apples from the orchard shoot\nhttps://a.example/1.jpg\n  https://a.example/2.jpg  \nftp://nope\nnot a url\n";
        assert_eq!(
            parse_url_list(body),
            vec![
                "https://a.example/1.jpg".to_string(),
                "https://a.example/2.jpg".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_list_is_empty_stream() {
        let dir = tempdir().unwrap();
        let client = HttpClient::builder("url_list", Duration::from_secs(1), Duration::ZERO)
            .build()
            .unwrap();
        let adapter = UrlListAdapter::new(dir.path(), FetchPool::new(client, 2, Duration::from_secs(1)));

        let mut stream = adapter.fetch(&Category::target("apple").unwrap(), 10).await;
        assert!(stream.next().await.is_none());
    }
}
