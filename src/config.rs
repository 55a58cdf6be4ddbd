//! Configuration management using the prefer crate for discovery.
//!
//! A `jamhot` config file (TOML, YAML or JSON) is optional. Settings come
//! from built-in defaults, then the file, then environment variables, then
//! command-line flags.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::models::{normalize_label, Category, CategoryError, CategorySet, NOT_FRUIT, UNKNOWN_FRUIT};
use crate::quality::{BasicQualityConfig, CategoryMatchConfig, SingleSubjectConfig, VisionConfig};
use crate::sampler::SamplerConfig;
use crate::scrapers::{RateLimitConfig, UnsplashConfig};

/// Name prefer uses to discover config files.
const CONFIG_NAME: &str = "jamhot";

const IMAGES_SUBDIR: &str = "images";
const STATE_SUBDIR: &str = "state";
const URL_LISTS_SUBDIR: &str = "url_lists";
const SAMPLER_FILE: &str = "sampler.json";

/// Sources used when `collect` is not given `--source`.
pub const DEFAULT_SOURCES: &[&str] = &["unsplash", "google_images", "url_list"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid category in config: {0}")]
    Category(#[from] CategoryError),
}

/// Resolved settings used by the collector and CLI.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// One subdirectory per category with images and processed URLs.
    pub images_dir: PathBuf,
    /// Sampler state.
    pub state_dir: PathBuf,
    /// `<category>.txt` URL lists.
    pub url_lists_dir: PathBuf,
    pub user_agent: Option<String>,
    /// Per-request download timeout in seconds.
    pub request_timeout: u64,
    /// Delay between requests to one source in milliseconds.
    pub request_delay_ms: u64,
    /// Concurrent downloads per source.
    pub fetch_concurrency: usize,
    /// Downloads larger than this are failed.
    pub max_image_bytes: u64,
    /// Processed-URL records written between flushes.
    pub flush_every: usize,
    pub default_sources: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        // Falls back from the platform data dir to home, then CWD
        let data_dir = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("jamhot");
        Self::with_data_dir(data_dir)
    }
}

impl Settings {
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            images_dir: data_dir.join(IMAGES_SUBDIR),
            state_dir: data_dir.join(STATE_SUBDIR),
            url_lists_dir: data_dir.join(URL_LISTS_SUBDIR),
            data_dir,
            user_agent: None,
            request_timeout: 20,
            request_delay_ms: 250,
            fetch_concurrency: 8,
            max_image_bytes: crate::scrapers::DEFAULT_MAX_IMAGE_BYTES,
            flush_every: crate::collector::DEFAULT_FLUSH_EVERY,
            default_sources: DEFAULT_SOURCES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Move every directory under a new data directory.
    pub fn relocate(&mut self, data_dir: PathBuf) {
        self.images_dir = data_dir.join(IMAGES_SUBDIR);
        self.state_dir = data_dir.join(STATE_SUBDIR);
        self.url_lists_dir = data_dir.join(URL_LISTS_SUBDIR);
        self.data_dir = data_dir;
    }

    pub fn sampler_path(&self) -> PathBuf {
        self.state_dir.join(SAMPLER_FILE)
    }

    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.images_dir)?;
        std::fs::create_dir_all(&self.state_dir)?;
        Ok(())
    }
}

/// A category entry in the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub name: String,
    /// Classifier labels that map onto this category.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    /// Replaces the built-in search term variations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_terms: Vec<String>,
}

impl CategoryConfig {
    fn to_category(&self) -> Result<Category, CategoryError> {
        let category = match normalize_label(&self.name).as_str() {
            UNKNOWN_FRUIT => Category::unknown_fruit(),
            NOT_FRUIT => Category::not_fruit(),
            _ => Category::target(&self.name)?,
        };
        let category = category.with_aliases(&self.aliases);
        Ok(if self.search_terms.is_empty() {
            category
        } else {
            category.with_search_terms(self.search_terms.clone())
        })
    }
}

/// Quality filter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Run the pixel-level checks.
    pub basic_checks: bool,
    pub basic: BasicQualityConfig,
    pub single_subject: SingleSubjectConfig,
    pub category_match: CategoryMatchConfig,
    /// Vision service; without one only the basic checks run.
    pub vision: VisionConfig,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            basic_checks: true,
            basic: BasicQualityConfig::default(),
            single_subject: SingleSubjectConfig::default(),
            category_match: CategoryMatchConfig::default(),
            vision: VisionConfig::default(),
        }
    }
}

/// Configuration file contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_lists_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_image_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flush_every: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,
    pub rate_limit: RateLimitConfig,
    pub sampler: SamplerConfig,
    pub quality: QualityConfig,
    pub unsplash: UnsplashConfig,
    /// Empty means the built-in fruit taxonomy.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<CategoryConfig>,
    /// Path the config was loaded from.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Discover a `jamhot` config file via prefer, falling back to defaults.
    pub async fn load() -> Self {
        match prefer::load(CONFIG_NAME).await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => match Self::load_from_path(path).await {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::warn!("{}; using defaults", e);
                        Self::default()
                    }
                },
                None => Self::default(),
            },
            Err(_) => Self::default(),
        }
    }

    /// Load a config file, choosing the format by extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let mut config = Self::parse(&contents, ext).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })?;

        config.source_path = Some(path.to_path_buf());
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    fn parse(contents: &str, ext: &str) -> Result<Self, String> {
        match ext {
            "toml" => toml::from_str(contents).map_err(|e| format!("invalid TOML: {}", e)),
            "yaml" | "yml" => {
                serde_yaml::from_str(contents).map_err(|e| format!("invalid YAML: {}", e))
            }
            _ => serde_json::from_str(contents).map_err(|e| format!("invalid JSON: {}", e)),
        }
    }

    /// Directory relative paths are resolved against.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Expand `~` and resolve relative paths against `base_dir`.
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.relocate(self.resolve_path(data_dir, base_dir));
        }
        if let Some(ref dir) = self.images_dir {
            settings.images_dir = self.resolve_path(dir, base_dir);
        }
        if let Some(ref dir) = self.state_dir {
            settings.state_dir = self.resolve_path(dir, base_dir);
        }
        if let Some(ref dir) = self.url_lists_dir {
            settings.url_lists_dir = self.resolve_path(dir, base_dir);
        }
        if let Some(ref user_agent) = self.user_agent {
            settings.user_agent = Some(user_agent.clone());
        }
        if let Some(timeout) = self.request_timeout {
            settings.request_timeout = timeout;
        }
        if let Some(delay) = self.request_delay_ms {
            settings.request_delay_ms = delay;
        }
        if let Some(concurrency) = self.fetch_concurrency {
            settings.fetch_concurrency = concurrency.max(1);
        }
        if let Some(max_bytes) = self.max_image_bytes {
            settings.max_image_bytes = max_bytes.max(1);
        }
        if let Some(flush_every) = self.flush_every {
            settings.flush_every = flush_every.max(1);
        }
        if let Some(ref sources) = self.sources {
            settings.default_sources = sources.clone();
        }
    }

    /// The configured taxonomy, or the built-in one.
    pub fn categories(&self) -> Result<CategorySet, ConfigError> {
        if self.categories.is_empty() {
            return Ok(CategorySet::defaults());
        }
        let categories = self
            .categories
            .iter()
            .map(CategoryConfig::to_category)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CategorySet::new(categories)?)
    }
}

/// Options that affect where configuration is loaded from.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file (`--config`).
    pub config_path: Option<PathBuf>,
    /// Data directory override (`--data`).
    pub data_dir: Option<PathBuf>,
}

/// Load settings and config.
///
/// Precedence: `--data` > `JAMHOT_DATA_DIR` > config file > defaults.
pub async fn load_settings(options: LoadOptions) -> Result<(Settings, Config), ConfigError> {
    let config = match options.config_path {
        Some(ref path) => Config::load_from_path(path).await?,
        None => Config::load().await,
    };

    let mut settings = Settings::default();
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let base_dir = config.base_dir().unwrap_or_else(|| cwd.clone());
    config.apply_to_settings(&mut settings, &base_dir);

    let env_data_dir = std::env::var("JAMHOT_DATA_DIR")
        .ok()
        .filter(|s| !s.trim().is_empty());
    let data_dir = options
        .data_dir
        .or_else(|| env_data_dir.map(PathBuf::from));

    if let Some(data_dir) = data_dir {
        let data_dir = config.resolve_path(&data_dir.to_string_lossy(), &cwd);
        tracing::debug!("Using data directory {}", data_dir.display());
        settings.relocate(data_dir);
    }

    Ok((settings, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_settings_layout() {
        let settings = Settings::with_data_dir(PathBuf::from("/data/jamhot"));
        assert_eq!(settings.images_dir, PathBuf::from("/data/jamhot/images"));
        assert_eq!(settings.sampler_path(), PathBuf::from("/data/jamhot/state/sampler.json"));
        assert_eq!(settings.max_image_bytes, 20 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_load_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("jamhot.toml");
        std::fs::write(
            &path,
            r#"
data_dir = "collected"
fetch_concurrency = 4
max_image_bytes = 1048576

[sampler]
initial_multiplier = 6.0

[[categories]]
name = "Apple"
aliases = ["granny smith"]

[[categories]]
name = "not_fruit"
search_terms = ["empty table"]
"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        assert_eq!(config.sampler.initial_multiplier, 6.0);

        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings, &config.base_dir().unwrap());
        assert_eq!(settings.data_dir, dir.path().join("collected"));
        assert_eq!(settings.images_dir, dir.path().join("collected/images"));
        assert_eq!(settings.fetch_concurrency, 4);
        assert_eq!(settings.max_image_bytes, 1_048_576);

        let categories = config.categories().unwrap();
        assert!(categories.get("apple").unwrap().matches_label("Granny Smith"));
        assert_eq!(
            categories.get("not_fruit").unwrap().search_terms(),
            vec!["empty table".to_string()]
        );
        assert!(categories.contains("unknown"));
        assert!(!categories.contains("banana"));
    }

    #[tokio::test]
    async fn test_load_yaml_and_json() {
        let dir = tempdir().unwrap();

        let yaml = dir.path().join("jamhot.yaml");
        std::fs::write(&yaml, "flush_every: 3\nquality:\n  basic_checks: false\n").unwrap();
        let config = Config::load_from_path(&yaml).await.unwrap();
        assert_eq!(config.flush_every, Some(3));
        assert!(!config.quality.basic_checks);

        let json = dir.path().join("jamhot.json");
        std::fs::write(&json, r#"{"sources": ["url_list"]}"#).unwrap();
        let config = Config::load_from_path(&json).await.unwrap();
        assert_eq!(config.sources, Some(vec!["url_list".to_string()]));
    }

    #[tokio::test]
    async fn test_parse_error_names_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("jamhot.toml");
        std::fs::write(&path, "fetch_concurrency = \"many\"").unwrap();

        let err = Config::load_from_path(&path).await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_invalid_category_rejected() {
        let config = Config {
            categories: vec![CategoryConfig {
                name: "apple/../etc".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(matches!(config.categories(), Err(ConfigError::Category(_))));
    }
}
