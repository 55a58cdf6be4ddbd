//! HTTP response wrapper.

use std::collections::HashMap;

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;

/// Response with headers lifted into a plain map.
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HashMap<String, String>,
    pub(crate) response: Response,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Content-Type header, without parameters, lowercased.
    pub fn content_type(&self) -> Option<String> {
        self.headers.get("content-type").map(|s| {
            s.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }

    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get("content-length")
            .and_then(|s| s.parse().ok())
    }

    pub async fn bytes(self) -> Result<Vec<u8>, reqwest::Error> {
        self.response.bytes().await.map(|b| b.to_vec())
    }

    /// Read the body, giving up as soon as it exceeds `limit` bytes.
    pub async fn bytes_limited(mut self, limit: u64) -> Result<Vec<u8>, BodyError> {
        if let Some(declared) = self.content_length() {
            if declared > limit {
                return Err(BodyError::TooLarge { limit });
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = self.response.chunk().await.map_err(BodyError::Http)? {
            append_within_limit(&mut body, &chunk, limit)?;
        }
        Ok(body)
    }

    pub async fn text(self) -> Result<String, reqwest::Error> {
        self.response.text().await
    }

    pub async fn json<T: DeserializeOwned>(self) -> Result<T, reqwest::Error> {
        self.response.json().await
    }
}

/// Failure reading a size-capped body.
#[derive(Debug, thiserror::Error)]
pub enum BodyError {
    #[error("Body larger than {limit} bytes")]
    TooLarge { limit: u64 },
    #[error(transparent)]
    Http(reqwest::Error),
}

fn append_within_limit(body: &mut Vec<u8>, chunk: &[u8], limit: u64) -> Result<(), BodyError> {
    if (body.len() + chunk.len()) as u64 > limit {
        return Err(BodyError::TooLarge { limit });
    }
    body.extend_from_slice(chunk);
    Ok(())
}

/// True if a Content-Type names an image.
pub fn is_image_content_type(content_type: &str) -> bool {
    content_type.trim().to_ascii_lowercase().starts_with("image/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_image_content_type() {
        assert!(is_image_content_type("image/jpeg"));
        assert!(is_image_content_type("Image/PNG"));
        assert!(!is_image_content_type("text/html; charset=utf-8"));
    }

    #[test]
    fn test_append_stops_at_limit() {
        let mut body = Vec::new();
        append_within_limit(&mut body, &[1; 6], 10).unwrap();
        append_within_limit(&mut body, &[2; 4], 10).unwrap();
        assert_eq!(body.len(), 10);

        let err = append_within_limit(&mut body, &[3], 10).unwrap_err();
        assert!(matches!(err, BodyError::TooLarge { limit: 10 }));
        assert_eq!(body.len(), 10);
    }
}
