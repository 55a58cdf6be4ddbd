//! Quality filter: decides from image bytes alone whether an image is usable
//! training data for a target category.
//!
//! The filter is an ordered cascade of [`FilterStage`] strategies. Bytes are
//! decoded once; each stage sees the decoded image and the first rejection
//! wins. Evaluation has no side effects and never returns an error: every
//! failure becomes a rejection with a reason.

mod basic;
mod category_match;
mod subject;
mod vision;

pub use basic::{BasicQualityConfig, BasicQualityStage};
pub use category_match::{CategoryMatchConfig, CategoryMatchStage, ImageClassifier, Prediction};
pub use subject::{Detection, SingleSubjectConfig, SingleSubjectStage, SubjectDetector};
pub use vision::{HttpVisionClient, VisionConfig, VisionError};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use image::{DynamicImage, GenericImageView};
use serde::Serialize;
use tracing::{debug, trace};

use crate::models::Category;

/// Why a candidate was rejected.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    /// Bytes are not a decodable image.
    DecodeError { message: String },
    /// Payload below the minimum size; likely an icon or placeholder.
    FileTooSmall { bytes: usize },
    ImageTooSmall { width: u32, height: u32 },
    /// Banner or strip shaped image.
    AspectRatio { ratio: f32 },
    TooDark { brightness: f32 },
    LowContrast { contrast: f32 },
    NoSubject,
    MultipleSubjects { count: usize },
    /// The dominant prediction belongs to another category (or none).
    CategoryMismatch { predicted: Option<String> },
    LowConfidence { confidence: f32 },
    /// The target does not lead the runner-up by the configured margin.
    AmbiguousMatch { margin: f32 },
    /// A vision model could not be reached; worth retrying later.
    ModelUnavailable { message: String },
}

impl RejectReason {
    /// Stable short code, used as the key in round reports.
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::DecodeError { .. } => "decode_error",
            RejectReason::FileTooSmall { .. } => "file_too_small",
            RejectReason::ImageTooSmall { .. } => "image_too_small",
            RejectReason::AspectRatio { .. } => "aspect_ratio",
            RejectReason::TooDark { .. } => "too_dark",
            RejectReason::LowContrast { .. } => "low_contrast",
            RejectReason::NoSubject => "no_subject",
            RejectReason::MultipleSubjects { .. } => "multiple_subjects",
            RejectReason::CategoryMismatch { .. } => "category_mismatch",
            RejectReason::LowConfidence { .. } => "low_confidence",
            RejectReason::AmbiguousMatch { .. } => "ambiguous_match",
            RejectReason::ModelUnavailable { .. } => "model_unavailable",
        }
    }

    /// Retryable rejections say nothing about the image itself, so the URL
    /// is not recorded as handled.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RejectReason::ModelUnavailable { .. })
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::DecodeError { message } => write!(f, "cannot decode image: {}", message),
            RejectReason::FileTooSmall { bytes } => write!(f, "file too small ({} bytes)", bytes),
            RejectReason::ImageTooSmall { width, height } => {
                write!(f, "image too small ({}x{})", width, height)
            }
            RejectReason::AspectRatio { ratio } => write!(f, "unusual aspect ratio ({:.1}:1)", ratio),
            RejectReason::TooDark { brightness } => {
                write!(f, "image too dark (brightness {:.1})", brightness)
            }
            RejectReason::LowContrast { contrast } => {
                write!(f, "contrast too low ({:.1})", contrast)
            }
            RejectReason::NoSubject => write!(f, "no primary subject detected"),
            RejectReason::MultipleSubjects { count } => {
                write!(f, "{} primary subjects detected", count)
            }
            RejectReason::CategoryMismatch { predicted: Some(p) } => {
                write!(f, "predicted '{}'", p)
            }
            RejectReason::CategoryMismatch { predicted: None } => write!(f, "no prediction"),
            RejectReason::LowConfidence { confidence } => {
                write!(f, "confidence {:.2} below threshold", confidence)
            }
            RejectReason::AmbiguousMatch { margin } => {
                write!(f, "lead over runner-up only {:.2}", margin)
            }
            RejectReason::ModelUnavailable { message } => {
                write!(f, "vision model unavailable: {}", message)
            }
        }
    }
}

/// Outcome of one stage, and of the whole cascade.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accept,
    Reject(RejectReason),
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept)
    }
}

/// Result of evaluating one image.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub verdict: Verdict,
    /// Stage that rejected the image, if any.
    pub stage: Option<String>,
}

impl Decision {
    pub fn accept() -> Self {
        Self {
            verdict: Verdict::Accept,
            stage: None,
        }
    }

    pub fn reject(stage: &str, reason: RejectReason) -> Self {
        Self {
            verdict: Verdict::Reject(reason),
            stage: Some(stage.to_string()),
        }
    }

    pub fn is_accept(&self) -> bool {
        self.verdict.is_accept()
    }

    pub fn reason(&self) -> Option<&RejectReason> {
        match &self.verdict {
            Verdict::Accept => None,
            Verdict::Reject(reason) => Some(reason),
        }
    }
}

/// An image decoded once for the whole cascade.
///
/// Decoding also computes the grayscale statistics, so every pixel pass
/// happens in one place.
pub struct DecodedImage {
    bytes: Vec<u8>,
    image: DynamicImage,
    luma: (f32, f32),
}

impl DecodedImage {
    pub fn decode(bytes: &[u8]) -> Result<Self, image::ImageError> {
        Self::decode_owned(bytes.to_vec())
    }

    fn decode_owned(bytes: Vec<u8>) -> Result<Self, image::ImageError> {
        let image = image::load_from_memory(&bytes)?;
        let luma = compute_luma_stats(&image);
        Ok(Self { bytes, image, luma })
    }

    /// Decode on the blocking pool so large images do not stall other rounds.
    pub async fn decode_blocking(bytes: &[u8]) -> Result<Self, String> {
        let bytes = bytes.to_vec();
        match tokio::task::spawn_blocking(move || Self::decode_owned(bytes)).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(e) => Err(format!("decode task failed: {}", e)),
        }
    }

    /// The original encoded bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// MIME type of the encoded bytes, if recognized.
    pub fn mime_type(&self) -> &'static str {
        infer::get(&self.bytes)
            .map(|t| t.mime_type())
            .unwrap_or("image/jpeg")
    }

    /// Mean and standard deviation of the grayscale pixel values.
    pub fn luma_stats(&self) -> (f32, f32) {
        self.luma
    }
}

fn compute_luma_stats(image: &DynamicImage) -> (f32, f32) {
    let gray = image.to_luma8();
    let count = gray.as_raw().len();
    if count == 0 {
        return (0.0, 0.0);
    }

    let (sum, sum_sq) = gray.as_raw().iter().fold((0f64, 0f64), |(s, sq), &p| {
        let p = p as f64;
        (s + p, sq + p * p)
    });
    let mean = sum / count as f64;
    let variance = (sum_sq / count as f64 - mean * mean).max(0.0);
    (mean as f32, variance.sqrt() as f32)
}

/// One step of the cascade.
#[async_trait]
pub trait FilterStage: Send + Sync {
    /// Name used in decisions and logs.
    fn name(&self) -> &str;

    async fn evaluate(&self, image: &DecodedImage, target: &Category) -> Verdict;
}

/// Ordered cascade of filter stages.
#[derive(Clone, Default)]
pub struct QualityFilter {
    stages: Vec<Arc<dyn FilterStage>>,
}

impl QualityFilter {
    /// A filter with no stages accepts anything that decodes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage; stages run in insertion order.
    pub fn with_stage(mut self, stage: Arc<dyn FilterStage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn push(&mut self, stage: Arc<dyn FilterStage>) {
        self.stages.push(stage);
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Decide whether `bytes` are usable training data for `target`.
    pub async fn evaluate(&self, bytes: &[u8], target: &Category) -> Decision {
        let image = match DecodedImage::decode_blocking(bytes).await {
            Ok(image) => image,
            Err(message) => {
                debug!("Undecodable image ({} bytes): {}", bytes.len(), message);
                return Decision::reject("decode", RejectReason::DecodeError { message });
            }
        };

        for stage in &self.stages {
            match stage.evaluate(&image, target).await {
                Verdict::Accept => trace!("{} passed {}", target, stage.name()),
                Verdict::Reject(reason) => return Decision::reject(stage.name(), reason),
            }
        }

        Decision::accept()
    }
}
