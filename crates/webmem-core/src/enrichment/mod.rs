//! Enrichment client (C3): derives keywords, a description, and an embedding
//! for a page's extracted content.
//!
//! Grounded in the provider-abstraction pattern used for LLM backends
//! elsewhere in the example pack: a small async trait plus a concrete
//! implementation per backend, so the indexing and retrieval pipelines
//! never know whether they're talking to a live API or a test double.

mod live;
mod mock;

pub use live::LiveProvider;
pub use mock::{top_tokens, MockProvider};

use async_trait::async_trait;

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EnrichmentError {
    #[error("enrichment request failed: {0}")]
    Request(String),
    #[error("enrichment response was malformed: {0}")]
    Malformed(String),
    #[error("retry budget exhausted after {attempts} attempts: {source}")]
    RetriesExhausted { attempts: u32, source: String },
}

pub type Result<T> = std::result::Result<T, EnrichmentError>;

/// Structured enrichment output for a single page.
#[derive(Debug, Clone, PartialEq)]
pub struct Enrichment {
    pub keywords: String,
    pub description: String,
}

/// A synthesized placeholder used when a provider exhausts its retry
/// budget on `enrich`: title as description, top frequent content tokens as
/// keywords. `enrich` never surfaces `Err` to its caller for this reason —
/// ingestion must never be blocked by an enrichment outage.
pub fn synthesize_placeholder(title: &str, content: &str) -> Enrichment {
    Enrichment {
        keywords: top_tokens(content, 5).join(", "),
        description: title.to_string(),
    }
}

/// Keyword/description extraction and dense embedding generation, each
/// called independently by the indexing pipeline (C6) via `tokio::join!` so
/// a slow or failing embedding call never blocks the keyword/description
/// call, and vice versa.
#[async_trait]
pub trait EnrichmentClient: Send + Sync {
    /// Derive keywords and a one- or two-sentence description from page
    /// content. Never fails: after the retry budget is exhausted this
    /// degrades to [`synthesize_placeholder`] rather than returning `Err`.
    async fn enrich(&self, title: &str, content: &str) -> Result<Enrichment>;

    /// Embed arbitrary text (page content on ingest, the query string on
    /// search) into a dense vector of [`EnrichmentClient::dimension`].
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Declared embedding dimension for this provider; every vector this
    /// provider returns must have exactly this length.
    fn dimension(&self) -> usize;

    /// Cheap liveness probe, exposed through the control surface's `stats`
    /// so an operator can see whether the configured provider is reachable
    /// without waiting on a full enrich/embed round trip.
    async fn health_check(&self) -> bool;
}
