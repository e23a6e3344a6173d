//! Error kinds shared across the indexing and retrieval pipelines.
//!
//! Each component reports its own kind; the control surface in
//! `webmem-server` maps these down to a small user-visible set.

/// Top-level error type returned by the public API of this crate.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum WebMemError {
    /// Bad input: malformed URL, empty query, content too short. Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// The document store is unavailable or corrupt. Fatal to the request.
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// Vector index error: dimension mismatch is a programmer error and
    /// surfaces; unknown-id removal is never represented as an error (it is
    /// idempotent) so this variant only carries the mismatch case.
    #[error("vector index error: expected dimension {expected}, got {actual}")]
    VectorDimensionMismatch { expected: usize, actual: usize },

    /// C3 exhausted its retry budget. Never surfaced on ingest (the caller
    /// degrades to a placeholder/no-embedding); on search it triggers the
    /// lexical-surrogate fallback.
    #[error("enrichment provider unavailable: {0}")]
    EnrichmentUnavailable(String),

    /// The query-embedding cache file was missing or unreadable. Logged,
    /// never surfaced — the cache simply starts empty.
    #[error("cache file corrupt: {0}")]
    CacheCorrupt(String),

    /// The query cache's internal lock was poisoned by a panicking holder.
    #[error("cache error: {0}")]
    Cache(#[from] crate::cache::CacheError),

    /// An internal synchronization primitive (e.g. the vector index's
    /// mutex) was poisoned by a panicking holder.
    #[error("internal error: {0}")]
    Internal(String),

    /// A suspending call exceeded its deadline.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// IO error underlying a persistence operation (cache file, db directory).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WebMemError>;

impl From<crate::vector::VectorError> for WebMemError {
    fn from(e: crate::vector::VectorError) -> Self {
        match e {
            crate::vector::VectorError::DimensionMismatch { expected, actual } => {
                WebMemError::VectorDimensionMismatch { expected, actual }
            }
        }
    }
}

impl From<crate::arc::ArcError> for WebMemError {
    fn from(e: crate::arc::ArcError) -> Self {
        match e {
            crate::arc::ArcError::Store(s) => WebMemError::Store(s),
        }
    }
}

impl From<crate::indexing::IndexingError> for WebMemError {
    fn from(e: crate::indexing::IndexingError) -> Self {
        match e {
            crate::indexing::IndexingError::Store(s) => WebMemError::Store(s),
            crate::indexing::IndexingError::Validation(v) => WebMemError::Validation(v),
        }
    }
}

impl From<crate::retrieval::RetrievalError> for WebMemError {
    fn from(e: crate::retrieval::RetrievalError) -> Self {
        match e {
            crate::retrieval::RetrievalError::Store(s) => WebMemError::Store(s),
            crate::retrieval::RetrievalError::Vector(v) => v.into(),
            crate::retrieval::RetrievalError::Cache(c) => WebMemError::Cache(c),
            crate::retrieval::RetrievalError::Internal(s) => WebMemError::Internal(s),
        }
    }
}

impl From<crate::enrichment::EnrichmentError> for WebMemError {
    fn from(e: crate::enrichment::EnrichmentError) -> Self {
        WebMemError::EnrichmentUnavailable(e.to_string())
    }
}
