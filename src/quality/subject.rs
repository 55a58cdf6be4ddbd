//! Single-subject check backed by an object detector.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::vision::VisionError;
use super::{DecodedImage, FilterStage, RejectReason, Verdict};
use crate::models::{normalize_label, Category, CategoryKind};

/// One detected object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
}

/// Object detection model.
#[async_trait]
pub trait SubjectDetector: Send + Sync {
    async fn detect(&self, image: &DecodedImage) -> Result<Vec<Detection>, VisionError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SingleSubjectConfig {
    /// Detections below this confidence are ignored.
    pub min_confidence: f32,
    /// Labels that count as a subject. Empty counts every label.
    pub subject_labels: Vec<String>,
}

impl Default for SingleSubjectConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            subject_labels: vec![
                "apple".into(),
                "orange".into(),
                "banana".into(),
                "fruit".into(),
            ],
        }
    }
}

/// Requires exactly one primary subject in frame.
///
/// Not-fruit scenes have no single subject to look for, so they pass.
pub struct SingleSubjectStage {
    detector: Arc<dyn SubjectDetector>,
    config: SingleSubjectConfig,
}

impl SingleSubjectStage {
    pub fn new(detector: Arc<dyn SubjectDetector>, config: SingleSubjectConfig) -> Self {
        let mut config = config;
        config.subject_labels = config
            .subject_labels
            .iter()
            .map(|l| normalize_label(l))
            .collect();
        Self { detector, config }
    }

    fn is_subject(&self, detection: &Detection) -> bool {
        detection.confidence >= self.config.min_confidence
            && (self.config.subject_labels.is_empty()
                || self
                    .config
                    .subject_labels
                    .contains(&normalize_label(&detection.label)))
    }
}

#[async_trait]
impl FilterStage for SingleSubjectStage {
    fn name(&self) -> &str {
        "single_subject"
    }

    async fn evaluate(&self, image: &DecodedImage, target: &Category) -> Verdict {
        if target.kind() == CategoryKind::NotFruit {
            return Verdict::Accept;
        }

        let detections = match self.detector.detect(image).await {
            Ok(detections) => detections,
            Err(e) => {
                warn!("Object detection failed: {}", e);
                return Verdict::Reject(RejectReason::ModelUnavailable {
                    message: e.to_string(),
                });
            }
        };

        let count = detections.iter().filter(|d| self.is_subject(d)).count();
        debug!(
            "{}: {} subjects among {} detections",
            target,
            count,
            detections.len()
        );

        match count {
            0 => Verdict::Reject(RejectReason::NoSubject),
            1 => Verdict::Accept,
            count => Verdict::Reject(RejectReason::MultipleSubjects { count }),
        }
    }
}
