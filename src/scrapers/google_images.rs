//! Google Images search adapter.
//!
//! Scrapes the image results page for `/imgres?imgurl=` links, which carry
//! the full-size source URL. When those run short, falls back to the
//! `encrypted-tbn` thumbnails embedded in the page.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use super::fetch_pool::{CandidateEmitter, FetchPool};
use super::http_client::HttpClient;
use super::{CandidateStream, SeenUrls, SourceAdapter, SourceError};
use crate::models::Category;

const SOURCE_NAME: &str = "google_images";
const SEARCH_BASE: &str = "https://www.google.com";

static IMGRES_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"a[href*="/imgres?"]"#).unwrap());

static THUMBNAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(https://encrypted-tbn\d\.gstatic\.com/images[^"]+)""#).unwrap()
});

/// Pull the `imgurl` parameter out of an `/imgres` link.
fn imgurl_from_href(href: &str) -> Option<String> {
    let base = Url::parse(SEARCH_BASE).ok()?;
    let link = base.join(href).ok()?;
    link.query_pairs()
        .find(|(k, _)| k == "imgurl")
        .map(|(_, v)| v.into_owned())
}

/// Extract image URLs from a results page, full-size links first.
pub fn extract_image_urls(html: &str, max_images: usize) -> Vec<String> {
    let mut urls = Vec::new();
    let mut seen = HashSet::new();

    let document = Html::parse_document(html);
    for element in document.select(&IMGRES_SELECTOR) {
        if urls.len() >= max_images {
            return urls;
        }
        let Some(image_url) = element.value().attr("href").and_then(imgurl_from_href) else {
            continue;
        };
        if image_url.starts_with("data:") || !image_url.starts_with("http") {
            continue;
        }
        if seen.insert(image_url.clone()) {
            urls.push(image_url);
        }
    }

    for capture in THUMBNAIL_PATTERN.captures_iter(html) {
        if urls.len() >= max_images {
            break;
        }
        let thumb = capture[1].replace("&amp;", "&");
        if seen.insert(thumb.clone()) {
            urls.push(thumb);
        }
    }

    urls
}

/// Pulls candidates from Google Images result pages.
#[derive(Clone)]
pub struct GoogleImagesAdapter {
    search: HttpClient,
    pool: FetchPool,
    seen: Option<Arc<dyn SeenUrls>>,
}

impl GoogleImagesAdapter {
    /// `search` should use a browser user agent; Google serves a stripped
    /// page to unknown clients.
    pub fn new(search: HttpClient, pool: FetchPool) -> Self {
        Self {
            search,
            pool,
            seen: None,
        }
    }

    pub fn with_seen_urls(mut self, seen: Arc<dyn SeenUrls>) -> Self {
        self.seen = Some(seen);
        self
    }

    fn search_url(query: &str) -> String {
        format!(
            "{}/search?q={}&tbm=isch&hl=en",
            SEARCH_BASE,
            urlencoding::encode(query)
        )
    }

    async fn search_page(&self, query: &str) -> Result<String, SourceError> {
        let url = Self::search_url(query);
        let response = self
            .search
            .get_with_headers(
                &url,
                &[
                    ("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
                    ("Accept-Language", "en-US,en;q=0.9"),
                ],
            )
            .await
            .map_err(|e| SourceError::Network {
                source_name: SOURCE_NAME.to_string(),
                message: e.to_string(),
            })?;

        if !response.is_success() {
            return Err(SourceError::Network {
                source_name: SOURCE_NAME.to_string(),
                message: format!("HTTP {}", response.status),
            });
        }

        response.text().await.map_err(|e| SourceError::Network {
            source_name: SOURCE_NAME.to_string(),
            message: e.to_string(),
        })
    }

    async fn produce(self, terms: Vec<String>, mut emitter: CandidateEmitter) {
        let mut failures = 0;
        let term_count = terms.len();

        for term in terms {
            if emitter.is_done() {
                return;
            }

            let html = match self.search_page(&term).await {
                Ok(html) => html,
                Err(e) => {
                    warn!("Google Images search for '{}' failed: {}", term, e);
                    failures += 1;
                    if failures == term_count {
                        emitter.abort(e).await;
                        return;
                    }
                    continue;
                }
            };

            // Ask for extra URLs; some will already have been handled
            let urls = extract_image_urls(&html, emitter.remaining() * 2);
            debug!("Google Images '{}': {} image URLs", term, urls.len());

            if !emitter.emit_urls(&self.pool, urls).await {
                return;
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for GoogleImagesAdapter {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch(&self, category: &Category, max_candidates: usize) -> CandidateStream {
        info!(
            "Google Images: fetching up to {} candidates for {}",
            max_candidates, category
        );

        let (tx, stream) = CandidateStream::channel(SOURCE_NAME);
        let emitter = CandidateEmitter::new(
            tx,
            self.seen.clone(),
            category.name(),
            SOURCE_NAME,
            max_candidates,
        );
        tokio::spawn(self.clone().produce(category.search_terms(), emitter));
        stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULTS_PAGE: &str = r#"
        <html><body>
          <a href="/imgres?imgurl=https://farm.example/apple1.jpg&amp;imgrefurl=https://farm.example/">1</a>
          <a href="/imgres?imgurl=https%3A%2F%2Fcdn.example%2Fapple2.png&amp;tbnid=x">2</a>
          <a href="/imgres?imgurl=https://farm.example/apple1.jpg&amp;imgrefurl=dup">dup</a>
          <a href="/imgres?imgurl=data:image/png;base64,AAAA">inline</a>
          <a href="/search?q=apple">not an image</a>
          <script>var t = ["https://encrypted-tbn0.gstatic.com/images?q=tbn:abc&amp;s=1"];</script>
        </body></html>
    "#;

    #[test]
    fn test_extracts_imgres_links_first() {
        let urls = extract_image_urls(RESULTS_PAGE, 10);
        assert_eq!(
            urls,
            vec![
                "https://farm.example/apple1.jpg".to_string(),
                "https://cdn.example/apple2.png".to_string(),
                "https://encrypted-tbn0.gstatic.com/images?q=tbn:abc&s=1".to_string(),
            ]
        );
    }

    #[test]
    fn test_respects_max_images() {
        let urls = extract_image_urls(RESULTS_PAGE, 1);
        assert_eq!(urls, vec!["https://farm.example/apple1.jpg".to_string()]);
    }

    #[test]
    fn test_search_url_encodes_query() {
        assert_eq!(
            GoogleImagesAdapter::search_url("dragon fruit close up"),
            "https://www.google.com/search?q=dragon%20fruit%20close%20up&tbm=isch&hl=en"
        );
    }
}
