//! Adaptive sampler for URL request sizing.
//!
//! Keeps one global oversample multiplier: the learned number of URLs to
//! request per desired accepted image. After each round the multiplier moves
//! toward the observed ratio with an exponential moving average and is
//! clamped to a fixed interval.

mod persistence;

pub use persistence::{load_sampler_state, save_sampler_state};

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Errors loading or saving sampler state.
#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    #[error("Corrupt sampler state at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to serialize sampler state: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Invalid sampler configuration: {0}")]
    InvalidConfig(String),
}

/// Tuning for the multiplier update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Multiplier used before any feedback exists.
    pub initial_multiplier: f64,
    /// Learning rate of the moving average.
    pub alpha: f64,
    pub min_multiplier: f64,
    pub max_multiplier: f64,
    /// Consecutive degenerate rounds for one category before escalating.
    pub degenerate_alert_after: u32,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            initial_multiplier: 10.0,
            alpha: 0.1,
            min_multiplier: 2.0,
            max_multiplier: 50.0,
            degenerate_alert_after: 3,
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<(), SamplerError> {
        if !(self.min_multiplier.is_finite() && self.max_multiplier.is_finite())
            || self.min_multiplier <= 0.0
            || self.min_multiplier > self.max_multiplier
        {
            return Err(SamplerError::InvalidConfig(format!(
                "multiplier bounds [{}, {}] are not a valid interval",
                self.min_multiplier, self.max_multiplier
            )));
        }
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(SamplerError::InvalidConfig(format!(
                "alpha {} must be in (0, 1]",
                self.alpha
            )));
        }
        if !self.initial_multiplier.is_finite() {
            return Err(SamplerError::InvalidConfig(
                "initial multiplier must be finite".to_string(),
            ));
        }
        Ok(())
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min_multiplier, self.max_multiplier)
    }
}

/// What an update did to the multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpdateOutcome {
    /// The multiplier moved toward the observed ratio.
    Updated { previous: f64, current: f64 },
    /// URLs were requested but nothing was accepted; multiplier unchanged.
    Degenerate { streak: u32 },
    /// Nothing was requested; multiplier unchanged.
    NoData,
}

impl UpdateOutcome {
    pub fn is_degenerate(&self) -> bool {
        matches!(self, UpdateOutcome::Degenerate { .. })
    }
}

/// Durable sampler state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerState {
    pub multiplier: f64,
    #[serde(default)]
    pub updates: u64,
    /// Consecutive zero-yield rounds per category.
    #[serde(default)]
    pub degenerate_streaks: BTreeMap<String, u32>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl SamplerState {
    pub fn new(config: &SamplerConfig) -> Self {
        Self {
            multiplier: config.clamp(config.initial_multiplier),
            updates: 0,
            degenerate_streaks: BTreeMap::new(),
            updated_at: None,
        }
    }

    /// `ceil(target * multiplier)`.
    pub fn urls_needed(&self, target: usize) -> usize {
        (target as f64 * self.multiplier).ceil() as usize
    }

    /// Feed back one round's yield.
    pub fn apply(
        &mut self,
        config: &SamplerConfig,
        category: &str,
        requested: usize,
        accepted: usize,
    ) -> UpdateOutcome {
        if accepted == 0 {
            if requested == 0 {
                return UpdateOutcome::NoData;
            }
            let streak = self
                .degenerate_streaks
                .entry(category.to_string())
                .or_insert(0);
            *streak += 1;
            self.updated_at = Some(Utc::now());
            return UpdateOutcome::Degenerate { streak: *streak };
        }

        let previous = self.multiplier;
        let observed = requested as f64 / accepted as f64;
        let blended = (1.0 - config.alpha) * previous + config.alpha * observed;

        self.multiplier = config.clamp(blended);
        self.updates += 1;
        self.degenerate_streaks.remove(category);
        self.updated_at = Some(Utc::now());

        UpdateOutcome::Updated {
            previous,
            current: self.multiplier,
        }
    }
}

/// Shared handle to the process-wide sampler.
#[derive(Clone)]
pub struct AdaptiveSampler {
    config: SamplerConfig,
    state: Arc<Mutex<SamplerState>>,
    path: Option<PathBuf>,
}

impl AdaptiveSampler {
    /// Load state from `path`, or start fresh when the file does not exist.
    pub fn load(path: impl Into<PathBuf>, config: SamplerConfig) -> Result<Self, SamplerError> {
        config.validate()?;
        let path = path.into();
        let state = match load_sampler_state(&path)? {
            Some(mut state) => {
                // Bounds may have changed since the state was written
                state.multiplier = config.clamp(state.multiplier);
                state
            }
            None => SamplerState::new(&config),
        };
        debug!("Sampler multiplier {:.3} from {}", state.multiplier, path.display());

        Ok(Self {
            config,
            state: Arc::new(Mutex::new(state)),
            path: Some(path),
        })
    }

    /// Sampler that never touches disk.
    pub fn in_memory(config: SamplerConfig) -> Result<Self, SamplerError> {
        config.validate()?;
        let state = SamplerState::new(&config);
        Ok(Self {
            config,
            state: Arc::new(Mutex::new(state)),
            path: None,
        })
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    pub async fn multiplier(&self) -> f64 {
        self.state.lock().await.multiplier
    }

    pub async fn urls_needed(&self, target: usize) -> usize {
        self.state.lock().await.urls_needed(target)
    }

    pub async fn snapshot(&self) -> SamplerState {
        self.state.lock().await.clone()
    }

    /// Update from one round and persist the result.
    pub async fn update(
        &self,
        category: &str,
        requested: usize,
        accepted: usize,
    ) -> Result<UpdateOutcome, SamplerError> {
        let mut state = self.state.lock().await;
        let outcome = state.apply(&self.config, category, requested, accepted);

        match outcome {
            UpdateOutcome::Updated { previous, current } => {
                debug!(
                    "Sampler multiplier {:.3} -> {:.3} ({} requested / {} accepted)",
                    previous, current, requested, accepted
                );
            }
            UpdateOutcome::Degenerate { streak } => {
                warn!(
                    "Degenerate round for {}: {} URLs requested, 0 accepted; multiplier unchanged at {:.3}",
                    category, requested, state.multiplier
                );
                if streak >= self.config.degenerate_alert_after {
                    error!(
                        "{} consecutive unproductive rounds for {}; check its sources and filters",
                        streak, category
                    );
                }
            }
            UpdateOutcome::NoData => {
                debug!("No URLs requested for {}, sampler unchanged", category);
                return Ok(outcome);
            }
        }

        if let Some(path) = &self.path {
            save_sampler_state(path, &state)?;
        }
        Ok(outcome)
    }

    /// Restore the initial multiplier and clear streaks.
    pub async fn reset(&self) -> Result<(), SamplerError> {
        let mut state = self.state.lock().await;
        *state = SamplerState::new(&self.config);
        if let Some(path) = &self.path {
            save_sampler_state(path, &state)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_urls_needed_rounds_up() {
        let config = SamplerConfig::default();
        let mut state = SamplerState::new(&config);
        assert_eq!(state.urls_needed(5), 50);
        state.multiplier = 2.5;
        assert_eq!(state.urls_needed(3), 8);
        assert_eq!(state.urls_needed(0), 0);
    }

    #[test]
    fn test_update_blends_toward_observed_ratio() {
        let config = SamplerConfig::default();
        let mut state = SamplerState::new(&config);

        let outcome = state.apply(&config, "apple", 5, 5);
        // 0.9 * 10 + 0.1 * 1 = 9.1
        assert!((state.multiplier - 9.1).abs() < 1e-9);
        assert!(matches!(outcome, UpdateOutcome::Updated { .. }));
    }

    #[test]
    fn test_zero_accepted_leaves_multiplier() {
        let config = SamplerConfig::default();
        let mut state = SamplerState::new(&config);

        assert_eq!(
            state.apply(&config, "apple", 20, 0),
            UpdateOutcome::Degenerate { streak: 1 }
        );
        assert_eq!(state.multiplier, 10.0);
        assert_eq!(
            state.apply(&config, "apple", 20, 0),
            UpdateOutcome::Degenerate { streak: 2 }
        );
        assert_eq!(state.apply(&config, "apple", 0, 0), UpdateOutcome::NoData);

        state.apply(&config, "apple", 10, 1);
        assert!(state.degenerate_streaks.get("apple").is_none());
    }

    #[test]
    fn test_multiplier_stays_in_bounds() {
        let config = SamplerConfig::default();
        let mut state = SamplerState::new(&config);

        let feedback = [(1000, 1), (1, 1), (500, 2), (3, 3), (10_000, 1), (1, 100)];
        for _ in 0..50 {
            for (requested, accepted) in feedback {
                state.apply(&config, "fig", requested, accepted);
                assert!(state.multiplier >= config.min_multiplier);
                assert!(state.multiplier <= config.max_multiplier);
            }
        }
    }

    #[test]
    fn test_converges_monotonically_without_overshoot() {
        let config = SamplerConfig::default();
        for ratio in [4.0_f64, 25.0, 1.0, 80.0] {
            let mut state = SamplerState::new(&config);
            let target = config.clamp(ratio);
            let mut previous_gap = (state.multiplier - target).abs();
            let start_side = (state.multiplier - target).signum();

            for _ in 0..300 {
                state.apply(&config, "plum", (ratio * 10.0) as usize, 10);
                let gap = (state.multiplier - target).abs();
                assert!(gap <= previous_gap + 1e-12);
                if gap > 1e-12 {
                    assert_eq!((state.multiplier - target).signum(), start_side);
                }
                previous_gap = gap;
            }
            assert!(previous_gap < 1e-6, "ratio {} settled at {}", ratio, state.multiplier);
        }
    }

    #[test]
    fn test_config_validation() {
        let bad = SamplerConfig {
            min_multiplier: 10.0,
            max_multiplier: 2.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad_alpha = SamplerConfig {
            alpha: 0.0,
            ..Default::default()
        };
        assert!(bad_alpha.validate().is_err());
        assert!(SamplerConfig::default().validate().is_ok());
    }

    #[tokio::test]
    async fn test_update_persists_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("sampler.json");

        let sampler = AdaptiveSampler::load(&path, SamplerConfig::default()).unwrap();
        sampler.update("apple", 5, 5).await.unwrap();
        sampler.update("kiwi", 20, 0).await.unwrap();

        let reloaded = AdaptiveSampler::load(&path, SamplerConfig::default()).unwrap();
        let state = reloaded.snapshot().await;
        assert!((state.multiplier - 9.1).abs() < 1e-9);
        assert_eq!(state.updates, 1);
        assert_eq!(state.degenerate_streaks.get("kiwi"), Some(&1));
    }

    #[tokio::test]
    async fn test_reset_restores_initial() {
        let sampler = AdaptiveSampler::in_memory(SamplerConfig::default()).unwrap();
        sampler.update("apple", 2, 1).await.unwrap();
        assert!(sampler.multiplier().await < 10.0);

        sampler.reset().await.unwrap();
        assert_eq!(sampler.multiplier().await, 10.0);
    }
}
