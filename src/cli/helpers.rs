//! Shared helpers for CLI commands: wiring settings into collector parts.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::warn;

use crate::config::{Config, Settings};
use crate::dedup::DedupStore;
use crate::models::CategorySet;
use crate::quality::{
    BasicQualityStage, CategoryMatchStage, HttpVisionClient, QualityFilter, SingleSubjectStage,
};
use crate::sampler::AdaptiveSampler;
use crate::scrapers::{
    FetchPool, GoogleImagesAdapter, HttpClient, RateLimiter, SeenUrls, SourceAdapter, IMPERSONATE,
    UnsplashAdapter, UrlListAdapter,
};

/// Names accepted by `--source`.
pub const SOURCE_NAMES: &[&str] = &["unsplash", "google_images", "url_list"];

/// Open the dedup store and sampler under the data directory.
pub async fn open_state(
    settings: &Settings,
    config: &Config,
) -> anyhow::Result<(DedupStore, AdaptiveSampler)> {
    let dedup = DedupStore::open(&settings.images_dir)
        .await
        .context("failed to load processed URLs")?;
    let sampler = AdaptiveSampler::load(settings.sampler_path(), config.sampler.clone())
        .context("failed to load sampler state")?;
    Ok((dedup, sampler))
}

/// Build the quality filter cascade from config.
///
/// Without a vision service only the basic checks run.
pub fn build_filter(config: &Config, categories: &CategorySet) -> anyhow::Result<QualityFilter> {
    let quality = &config.quality;
    let mut filter = QualityFilter::new();

    if quality.basic_checks {
        filter.push(Arc::new(BasicQualityStage::new(quality.basic.clone())));
    }

    match HttpVisionClient::from_config(&quality.vision)? {
        Some(vision) => {
            let vision = Arc::new(vision);
            filter.push(Arc::new(SingleSubjectStage::new(
                vision.clone(),
                quality.single_subject.clone(),
            )));
            filter.push(Arc::new(CategoryMatchStage::new(
                vision,
                categories.clone(),
                quality.category_match.clone(),
            )));
        }
        None => warn!(
            "No vision service configured (set JAMHOT_VISION_URL); subject and category checks are disabled"
        ),
    }

    Ok(filter)
}

/// Build source adapters by name, sharing one rate limiter.
pub fn build_adapters(
    settings: &Settings,
    config: &Config,
    names: &[String],
    seen: Arc<dyn SeenUrls>,
) -> anyhow::Result<Vec<Arc<dyn SourceAdapter>>> {
    let limiter = RateLimiter::with_config(config.rate_limit.clone());
    let timeout = Duration::from_secs(settings.request_timeout);
    let delay = Duration::from_millis(settings.request_delay_ms);

    let client = |source: &str, user_agent: Option<&str>, delay: Duration| {
        let mut builder = HttpClient::builder(source, timeout, delay).rate_limiter(limiter.clone());
        if let Some(ua) = user_agent.or(settings.user_agent.as_deref()) {
            builder = builder.user_agent(ua);
        }
        builder
            .build()
            .with_context(|| format!("failed to create HTTP client for {}", source))
    };
    // Downloads hit many hosts; the per-host limiter paces them
    let pool = |source: &str, user_agent: Option<&str>| -> anyhow::Result<FetchPool> {
        Ok(FetchPool::new(
            client(source, user_agent, Duration::ZERO)?,
            settings.fetch_concurrency,
            timeout,
        )
        .with_max_bytes(settings.max_image_bytes))
    };

    let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::with_capacity(names.len());
    for name in names {
        let adapter: Arc<dyn SourceAdapter> = match name.as_str() {
            "unsplash" => Arc::new(
                UnsplashAdapter::new(
                    config.unsplash.clone(),
                    client("unsplash", None, delay)?,
                    pool("unsplash", None)?,
                )
                .with_seen_urls(seen.clone()),
            ),
            "google_images" | "google" => Arc::new(
                GoogleImagesAdapter::new(
                    client("google_images", Some(IMPERSONATE), delay)?,
                    pool("google_images", Some(IMPERSONATE))?,
                )
                .with_seen_urls(seen.clone()),
            ),
            "url_list" => Arc::new(
                UrlListAdapter::new(&settings.url_lists_dir, pool("url_list", None)?)
                    .with_seen_urls(seen.clone()),
            ),
            other => anyhow::bail!(
                "Unknown source '{}' (available: {})",
                other,
                SOURCE_NAMES.join(", ")
            ),
        };
        adapters.push(adapter);
    }

    Ok(adapters)
}
