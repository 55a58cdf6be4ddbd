//! Category check backed by an image classifier.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::vision::VisionError;
use super::{DecodedImage, FilterStage, RejectReason, Verdict};
use crate::models::{Category, CategorySet};

/// One classifier output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
}

/// Image classification model.
#[async_trait]
pub trait ImageClassifier: Send + Sync {
    /// Predictions in any order.
    async fn classify(&self, image: &DecodedImage) -> Result<Vec<Prediction>, VisionError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryMatchConfig {
    pub min_confidence: f32,
    /// Required lead over the best competing category.
    pub margin: f32,
}

impl Default for CategoryMatchConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            margin: 0.1,
        }
    }
}

/// Requires the classifier to agree with the target category.
///
/// Labels are mapped to categories through their aliases. For the sentinel
/// targets the dominant prediction must not belong to any in-taxonomy
/// category.
pub struct CategoryMatchStage {
    classifier: Arc<dyn ImageClassifier>,
    categories: CategorySet,
    config: CategoryMatchConfig,
}

impl CategoryMatchStage {
    pub fn new(
        classifier: Arc<dyn ImageClassifier>,
        categories: CategorySet,
        config: CategoryMatchConfig,
    ) -> Self {
        Self {
            classifier,
            categories,
            config,
        }
    }

    /// Judge a prediction list for `target`.
    pub fn judge(&self, mut predictions: Vec<Prediction>, target: &Category) -> Verdict {
        predictions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let Some(top) = predictions.first() else {
            if target.is_sentinel() {
                return Verdict::Accept;
            }
            return Verdict::Reject(RejectReason::CategoryMismatch { predicted: None });
        };

        if target.is_sentinel() {
            return match self.categories.resolve_label(&top.label) {
                Some(category) => Verdict::Reject(RejectReason::CategoryMismatch {
                    predicted: Some(category.name().to_string()),
                }),
                None => Verdict::Accept,
            };
        }

        if !target.matches_label(&top.label) {
            let predicted = self
                .categories
                .resolve_label(&top.label)
                .map(|c| c.name().to_string())
                .unwrap_or_else(|| top.label.clone());
            return Verdict::Reject(RejectReason::CategoryMismatch {
                predicted: Some(predicted),
            });
        }

        if top.confidence < self.config.min_confidence {
            return Verdict::Reject(RejectReason::LowConfidence {
                confidence: top.confidence,
            });
        }

        let runner_up = predictions
            .iter()
            .skip(1)
            .filter(|p| !target.matches_label(&p.label))
            .find(|p| self.categories.resolve_label(&p.label).is_some())
            .map(|p| p.confidence)
            .unwrap_or(0.0);

        let lead = top.confidence - runner_up;
        if lead < self.config.margin {
            return Verdict::Reject(RejectReason::AmbiguousMatch { margin: lead });
        }

        Verdict::Accept
    }
}

#[async_trait]
impl FilterStage for CategoryMatchStage {
    fn name(&self) -> &str {
        "category_match"
    }

    async fn evaluate(&self, image: &DecodedImage, target: &Category) -> Verdict {
        match self.classifier.classify(image).await {
            Ok(predictions) => {
                debug!("{}: {} predictions", target, predictions.len());
                self.judge(predictions, target)
            }
            Err(e) => {
                warn!("Classification failed: {}", e);
                Verdict::Reject(RejectReason::ModelUnavailable {
                    message: e.to_string(),
                })
            }
        }
    }
}
