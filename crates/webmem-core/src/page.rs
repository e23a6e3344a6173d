//! Core data model: `Page`, the primary entity of the document store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dense integer id, assigned on first insert, immutable thereafter.
pub type PageId = i64;

/// A single indexed web page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    /// Canonical full URL including path and query string; unique key.
    pub url: String,
    pub title: String,
    /// Enrichment output: a one- or two-sentence summary.
    pub description: String,
    /// Enrichment output: comma-separated keyword list.
    pub keywords: String,
    /// Extracted main text, bounded to <= 10,000 chars on ingest.
    pub content: String,
    pub favicon_url: Option<String>,
    /// Dense embedding of dimension D; absent if enrichment failed.
    pub embedding: Option<Vec<f32>>,
    pub visit_count: u64,
    pub first_visited: DateTime<Utc>,
    pub last_visited: DateTime<Utc>,
    pub indexed_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    /// Derived score in [0, 1]; see [`crate::arc`].
    pub access_frequency: f64,
    /// Derived score in [0, 1]; see [`crate::arc`].
    pub recency_score: f64,
    /// 0.6 * access_frequency + 0.4 * recency_score.
    pub arc_score: f64,
}

impl Page {
    /// Construct a fresh page row for a URL seen for the first time, with
    /// placeholder title/content (used by visit-tracking's find-or-create path).
    pub fn placeholder(url: &str, at: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            url: url.to_string(),
            title: url.to_string(),
            description: String::new(),
            keywords: String::new(),
            content: String::new(),
            favicon_url: None,
            embedding: None,
            visit_count: 0,
            first_visited: at,
            last_visited: at,
            indexed_at: at,
            last_updated_at: at,
            access_frequency: 0.0,
            recency_score: 0.0,
            arc_score: 0.0,
        }
    }
}

/// Maximum content length enforced on ingest.
pub const MAX_CONTENT_CHARS: usize = 10_000;

/// Minimum content length required to accept a page for indexing.
pub const MIN_CONTENT_CHARS: usize = 100;

/// Truncate `content` to at most `MAX_CONTENT_CHARS` characters, discarding
/// the tail. Operates on char boundaries so multi-byte UTF-8 is never split.
pub fn truncate_content(content: &str) -> String {
    if content.chars().count() <= MAX_CONTENT_CHARS {
        return content.to_string();
    }
    content.chars().take(MAX_CONTENT_CHARS).collect()
}
