//! Unsplash photo search adapter.
//!
//! Pages through `/search/photos` for each of the category's search terms
//! and downloads the `regular` rendition of each result.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::fetch_pool::{CandidateEmitter, FetchPool};
use super::http_client::HttpClient;
use super::{CandidateStream, SeenUrls, SourceAdapter, SourceError};
use crate::models::Category;

const SOURCE_NAME: &str = "unsplash";

/// Settings for the Unsplash API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UnsplashConfig {
    /// Access key; falls back to `UNSPLASH_ACCESS_KEY`.
    pub access_key: Option<String>,
    pub api_base: String,
    /// Results per page (the API caps this at 30).
    pub per_page: u32,
    /// Pages fetched per search term before moving on.
    pub max_pages: u32,
}

impl Default for UnsplashConfig {
    fn default() -> Self {
        Self {
            access_key: None,
            api_base: "https://api.unsplash.com".to_string(),
            per_page: 30,
            max_pages: 10,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchResponse {
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub results: Vec<Photo>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Photo {
    pub urls: PhotoUrls,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PhotoUrls {
    pub regular: Option<String>,
    pub full: Option<String>,
    pub small: Option<String>,
}

impl Photo {
    fn best_url(self) -> Option<String> {
        self.urls.regular.or(self.urls.full).or(self.urls.small)
    }
}

/// Extract photo URLs from a search response body.
pub(crate) fn parse_search_response(body: &str) -> Result<(Vec<String>, u32), serde_json::Error> {
    let response: SearchResponse = serde_json::from_str(body)?;
    let urls = response
        .results
        .into_iter()
        .filter_map(Photo::best_url)
        .collect();
    Ok((urls, response.total_pages))
}

/// Pulls candidates from the Unsplash search API.
#[derive(Clone)]
pub struct UnsplashAdapter {
    config: UnsplashConfig,
    api: HttpClient,
    pool: FetchPool,
    seen: Option<Arc<dyn SeenUrls>>,
}

impl UnsplashAdapter {
    /// `api` talks to the JSON API; `pool` downloads the images.
    pub fn new(config: UnsplashConfig, api: HttpClient, pool: FetchPool) -> Self {
        Self {
            config,
            api,
            pool,
            seen: None,
        }
    }

    /// Skip URLs the collector has already handled.
    pub fn with_seen_urls(mut self, seen: Arc<dyn SeenUrls>) -> Self {
        self.seen = Some(seen);
        self
    }

    fn access_key(&self) -> Option<String> {
        self.config
            .access_key
            .clone()
            .or_else(|| std::env::var("UNSPLASH_ACCESS_KEY").ok())
            .filter(|k| !k.trim().is_empty())
    }

    fn search_url(&self, query: &str, page: u32) -> String {
        format!(
            "{}/search/photos?query={}&page={}&per_page={}",
            self.config.api_base.trim_end_matches('/'),
            urlencoding::encode(query),
            page,
            self.config.per_page
        )
    }

    async fn search_page(
        &self,
        key: &str,
        query: &str,
        page: u32,
    ) -> Result<(Vec<String>, u32), SourceError> {
        let url = self.search_url(query, page);
        let auth = format!("Client-ID {}", key);
        let response = self
            .api
            .get_with_headers(&url, &[("Authorization", auth.as_str()), ("Accept-Version", "v1")])
            .await
            .map_err(|e| SourceError::Network {
                source_name: SOURCE_NAME.to_string(),
                message: e.to_string(),
            })?;

        match response.status.as_u16() {
            401 | 403 => {
                return Err(SourceError::Auth {
                    source_name: SOURCE_NAME.to_string(),
                    message: format!("HTTP {}", response.status),
                })
            }
            s if !(200..300).contains(&s) => {
                return Err(SourceError::Network {
                    source_name: SOURCE_NAME.to_string(),
                    message: format!("HTTP {}", response.status),
                })
            }
            _ => {}
        }

        let body = response.text().await.map_err(|e| SourceError::Network {
            source_name: SOURCE_NAME.to_string(),
            message: e.to_string(),
        })?;
        parse_search_response(&body).map_err(|e| SourceError::Parse {
            source_name: SOURCE_NAME.to_string(),
            message: e.to_string(),
        })
    }

    async fn produce(self, key: String, terms: Vec<String>, mut emitter: CandidateEmitter) {
        for term in terms {
            for page in 1..=self.config.max_pages {
                if emitter.is_done() {
                    return;
                }

                let (urls, total_pages) = match self.search_page(&key, &term, page).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!("Unsplash search for '{}' failed: {}", term, e);
                        emitter.abort(e).await;
                        return;
                    }
                };
                debug!(
                    "Unsplash '{}' page {}/{}: {} results",
                    term,
                    page,
                    total_pages,
                    urls.len()
                );

                if urls.is_empty() {
                    break;
                }
                if !emitter.emit_urls(&self.pool, urls).await {
                    return;
                }
                if page >= total_pages {
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for UnsplashAdapter {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch(&self, category: &Category, max_candidates: usize) -> CandidateStream {
        let Some(key) = self.access_key() else {
            return CandidateStream::aborted(
                SOURCE_NAME,
                SourceError::NotConfigured {
                    source_name: SOURCE_NAME.to_string(),
                    message: "UNSPLASH_ACCESS_KEY is not set".to_string(),
                },
            );
        };

        info!(
            "Unsplash: fetching up to {} candidates for {}",
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
        tokio::spawn(self.clone().produce(key, category.search_terms(), emitter));
        stream
    }
}
