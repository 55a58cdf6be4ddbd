//! Cheap pixel-level checks that run before any vision model.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{DecodedImage, FilterStage, RejectReason, Verdict};
use crate::models::Category;

/// Thresholds for [`BasicQualityStage`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicQualityConfig {
    /// Smaller payloads are usually icons or placeholders.
    pub min_file_bytes: usize,
    pub min_width: u32,
    pub min_height: u32,
    /// Longest side over shortest side.
    pub max_aspect_ratio: f32,
    /// Mean grayscale value, 0-255.
    pub min_brightness: f32,
    /// Standard deviation of grayscale values.
    pub min_contrast: f32,
}

impl Default for BasicQualityConfig {
    fn default() -> Self {
        Self {
            min_file_bytes: 5000,
            min_width: 100,
            min_height: 100,
            max_aspect_ratio: 5.0,
            min_brightness: 30.0,
            min_contrast: 20.0,
        }
    }
}

/// Rejects tiny, banner-shaped, dark, or flat images.
#[derive(Debug, Clone, Default)]
pub struct BasicQualityStage {
    config: BasicQualityConfig,
}

impl BasicQualityStage {
    pub fn new(config: BasicQualityConfig) -> Self {
        Self { config }
    }

    pub fn check(&self, image: &DecodedImage) -> Verdict {
        let bytes = image.bytes().len();
        if bytes < self.config.min_file_bytes {
            return Verdict::Reject(RejectReason::FileTooSmall { bytes });
        }

        let (width, height) = image.dimensions();
        if width < self.config.min_width || height < self.config.min_height {
            return Verdict::Reject(RejectReason::ImageTooSmall { width, height });
        }

        let ratio = width.max(height) as f32 / width.min(height).max(1) as f32;
        if ratio > self.config.max_aspect_ratio {
            return Verdict::Reject(RejectReason::AspectRatio { ratio });
        }

        let (brightness, contrast) = image.luma_stats();
        if brightness < self.config.min_brightness {
            return Verdict::Reject(RejectReason::TooDark { brightness });
        }
        if contrast < self.config.min_contrast {
            return Verdict::Reject(RejectReason::LowContrast { contrast });
        }

        Verdict::Accept
    }
}

#[async_trait]
impl FilterStage for BasicQualityStage {
    fn name(&self) -> &str {
        "basic_quality"
    }

    async fn evaluate(&self, image: &DecodedImage, _target: &Category) -> Verdict {
        self.check(image)
    }
}
