//! HTTP client for a vision inference service.
//!
//! The service exposes two endpoints taking the same request body:
//!
//! - `POST {base}/detect` returns `{"detections": [{"label", "confidence"}]}`
//! - `POST {base}/classify` returns `{"predictions": [{"label", "confidence"}]}`
//!
//! Either may instead return `{"error": "..."}`.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::category_match::{ImageClassifier, Prediction};
use super::subject::{Detection, SubjectDetector};
use super::DecodedImage;
use crate::scrapers::{HttpClient, RateLimitConfig, RateLimiter};

#[derive(Debug, Clone, thiserror::Error)]
pub enum VisionError {
    /// The service could not be reached or answered with a server error.
    #[error("vision service unavailable: {0}")]
    Unavailable(String),
    #[error("vision request rejected: HTTP {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("invalid vision response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// Base URL of the inference service; falls back to `JAMHOT_VISION_URL`.
    pub url: Option<String>,
    pub timeout_secs: u64,
    /// Top-k predictions requested from the classifier.
    pub top_k: usize,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: 30,
            top_k: 5,
        }
    }
}

impl VisionConfig {
    pub fn resolved_url(&self) -> Option<String> {
        self.url
            .clone()
            .or_else(|| std::env::var("JAMHOT_VISION_URL").ok())
            .filter(|u| !u.trim().is_empty())
    }
}

#[derive(Debug, Serialize)]
struct VisionRequest<'a> {
    mime_type: &'a str,
    /// Base64 encoded image bytes.
    data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<Detection>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
    error: Option<String>,
}

/// Object detector and classifier backed by one inference service.
#[derive(Clone)]
pub struct HttpVisionClient {
    client: HttpClient,
    base_url: String,
    top_k: usize,
}

impl HttpVisionClient {
    pub fn new(base_url: &str, timeout: Duration, top_k: usize) -> Result<Self, VisionError> {
        // A single inference service; requests are not paced
        let limiter = RateLimiter::with_config(RateLimitConfig {
            base_delay_ms: 0,
            min_delay_ms: 0,
            ..Default::default()
        });
        let client = HttpClient::builder("vision", timeout, Duration::ZERO)
            .rate_limiter(limiter)
            .header("Accept", "application/json")
            .build()
            .map_err(|e| VisionError::Unavailable(format!("failed to build client: {}", e)))?;
        Ok(Self::with_client(client, base_url, top_k))
    }

    pub fn from_config(config: &VisionConfig) -> Result<Option<Self>, VisionError> {
        match config.resolved_url() {
            Some(url) => Self::new(&url, Duration::from_secs(config.timeout_secs), config.top_k)
                .map(Some),
            None => Ok(None),
        }
    }

    pub fn with_client(client: HttpClient, base_url: &str, top_k: usize) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            top_k,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request<'a>(image: &'a DecodedImage, top_k: Option<usize>) -> VisionRequest<'a> {
        VisionRequest {
            mime_type: image.mime_type(),
            data: base64::engine::general_purpose::STANDARD.encode(image.bytes()),
            top_k,
        }
    }

    async fn call(&self, endpoint: &str, body: &VisionRequest<'_>) -> Result<String, VisionError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .client
            .post_json(&url, body)
            .await
            .map_err(|e| VisionError::Unavailable(e.to_string()))?;

        let status = response.status.as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| VisionError::Unavailable(e.to_string()))?;

        match status {
            200..=299 => Ok(text),
            429 | 500..=599 => Err(VisionError::Unavailable(format!("HTTP {}", status))),
            _ => Err(VisionError::Rejected {
                status,
                message: text.chars().take(200).collect(),
            }),
        }
    }
}

fn parse_detect_response(body: &str) -> Result<Vec<Detection>, VisionError> {
    let response: DetectResponse =
        serde_json::from_str(body).map_err(|e| VisionError::InvalidResponse(e.to_string()))?;
    match response.error {
        Some(error) => Err(VisionError::Unavailable(error)),
        None => Ok(response.detections),
    }
}

fn parse_classify_response(body: &str) -> Result<Vec<Prediction>, VisionError> {
    let response: ClassifyResponse =
        serde_json::from_str(body).map_err(|e| VisionError::InvalidResponse(e.to_string()))?;
    match response.error {
        Some(error) => Err(VisionError::Unavailable(error)),
        None => Ok(response.predictions),
    }
}

#[async_trait]
impl SubjectDetector for HttpVisionClient {
    async fn detect(&self, image: &DecodedImage) -> Result<Vec<Detection>, VisionError> {
        let body = self.call("detect", &Self::request(image, None)).await?;
        let detections = parse_detect_response(&body)?;
        debug!("Vision service returned {} detections", detections.len());
        Ok(detections)
    }
}

#[async_trait]
impl ImageClassifier for HttpVisionClient {
    async fn classify(&self, image: &DecodedImage) -> Result<Vec<Prediction>, VisionError> {
        let body = self
            .call("classify", &Self::request(image, Some(self.top_k)))
            .await?;
        parse_classify_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_images::flat_png;
    use super::*;

    #[test]
    fn test_parse_detect_response() {
        let detections = parse_detect_response(
            r#"{"detections": [{"label": "apple", "confidence": 0.92}, {"label": "bowl", "confidence": 0.4}]}"#,
        )
        .unwrap();
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].label, "apple");
    }

    #[test]
    fn test_service_error_is_unavailable() {
        let err = parse_classify_response(r#"{"error": "model loading"}"#).unwrap_err();
        assert!(matches!(err, VisionError::Unavailable(ref m) if m == "model loading"));
        assert!(matches!(
            parse_classify_response("nope"),
            Err(VisionError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_request_encodes_image() {
        let image = DecodedImage::decode(&flat_png(4, 4, 50)).unwrap();
        let request = HttpVisionClient::request(&image, Some(3));
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["mime_type"], "image/png");
        assert_eq!(json["top_k"], 3);

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(json["data"].as_str().unwrap())
            .unwrap();
        assert_eq!(decoded, image.bytes());
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = HttpVisionClient::new("http://localhost:8500/", Duration::from_secs(1), 5).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8500");
    }
}
