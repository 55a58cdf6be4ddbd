//! Candidate and accepted image records.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// An unevaluated image pulled from a source.
///
/// Exists only for one filter-and-maybe-accept cycle.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Source URL of the image.
    pub url: String,
    /// Raw image bytes as downloaded.
    pub bytes: Vec<u8>,
    /// Category the adapter was asked to fill.
    pub category: String,
    /// Name of the adapter that produced this candidate.
    pub source: String,
    /// Content-Type reported by the server, if any.
    pub content_type: Option<String>,
}

impl Candidate {
    pub fn new(url: String, bytes: Vec<u8>, category: &str, source: &str) -> Self {
        Self {
            url,
            bytes,
            category: category.to_string(),
            source: source.to_string(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }
}

/// A candidate that passed the quality filter and was written to disk.
#[derive(Debug, Clone, Serialize)]
pub struct AcceptedImage {
    pub url: String,
    pub category: String,
    pub source: String,
    /// Per-category sequence number embedded in the filename.
    pub counter: u64,
    pub path: PathBuf,
    pub size: u64,
    pub saved_at: DateTime<Utc>,
}
