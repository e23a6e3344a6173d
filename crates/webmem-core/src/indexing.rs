//! Indexing pipeline (C6): validate, persist a searchable shell, then
//! enrich in the background so an ingest call never waits on a keyword or
//! embedding provider.
//!
//! Grounded in the teacher's fire-and-forget `tokio::spawn` pattern for
//! post-write background work, generalized here to the two-call
//! keyword+embedding enrichment fan-out.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::enrichment::EnrichmentClient;
use crate::page::{truncate_content, PageId, MIN_CONTENT_CHARS};
use crate::store::{DocumentStore, PageUpsert};
use crate::vector::VectorIndex;

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum IndexingError {
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
    #[error("validation error: {0}")]
    Validation(String),
}

/// Outcome status for [`index_page`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    Indexed,
    AlreadyIndexed,
    Reindexed,
}

#[derive(Debug, Clone)]
pub struct IndexOutcome {
    pub id: PageId,
    pub status: IndexStatus,
}

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub indexed: bool,
    pub page_id: Option<PageId>,
    pub needs_reindex: bool,
    pub last_updated: Option<DateTime<Utc>>,
}

fn looks_web_like(url: &str) -> bool {
    match url::Url::parse(url) {
        Ok(u) => matches!(u.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

/// Answer `probe(url)` from C1 alone, with no enrichment side effects.
pub fn probe(
    store: &DocumentStore,
    url: &str,
    staleness: chrono::Duration,
    now: DateTime<Utc>,
) -> Result<ProbeResult, IndexingError> {
    Ok(match store.get_by_url(url)? {
        Some(page) => ProbeResult {
            indexed: true,
            page_id: Some(page.id),
            needs_reindex: now - page.last_updated_at > staleness,
            last_updated: Some(page.last_updated_at),
        },
        None => ProbeResult {
            indexed: false,
            page_id: None,
            needs_reindex: false,
            last_updated: None,
        },
    })
}

/// Validate, upsert-by-staleness, and (unless the row was already fresh)
/// spawn background enrichment. Returns as soon as the shell row is
/// persisted — the page is lexically searchable immediately. Content too
/// short or a non-web url is a validation error, not an outcome status.
#[allow(clippy::too_many_arguments)]
pub async fn index_page(
    store: Arc<DocumentStore>,
    vectors: Arc<Mutex<VectorIndex>>,
    enrichment: Arc<dyn EnrichmentClient>,
    url: String,
    title: String,
    content: String,
    favicon_url: Option<String>,
    staleness: chrono::Duration,
    now: DateTime<Utc>,
) -> Result<IndexOutcome, IndexingError> {
    if content.chars().count() < MIN_CONTENT_CHARS || !looks_web_like(&url) {
        return Err(IndexingError::Validation(
            "content too short or url is not web-like".to_string(),
        ));
    }

    let truncated = truncate_content(&content);

    // Pre-check purely to short-circuit a fresh row without writing, and to
    // carry over the prior enrichment (description/keywords/embedding) into
    // a stale reindex so it isn't blanked out until the background task
    // below re-populates it. The actual write always goes through
    // `upsert_by_url`, which is the only place that resolves a url-
    // uniqueness race against a concurrent ingest of the same page.
    let existing = store.get_by_url(&url)?;
    if let Some(page) = &existing {
        if now - page.last_updated_at <= staleness {
            return Ok(IndexOutcome { id: page.id, status: IndexStatus::AlreadyIndexed });
        }
    }

    let (id, was_new) = store.upsert_by_url(&PageUpsert {
        url: url.clone(),
        title: title.clone(),
        description: existing.as_ref().map(|p| p.description.clone()).unwrap_or_default(),
        keywords: existing.as_ref().map(|p| p.keywords.clone()).unwrap_or_default(),
        content: truncated.clone(),
        favicon_url: favicon_url.clone(),
        embedding: existing.as_ref().and_then(|p| p.embedding.clone()),
        at: now,
    })?;
    let status = if was_new { IndexStatus::Indexed } else { IndexStatus::Reindexed };

    if status != IndexStatus::AlreadyIndexed {
        tokio::spawn(run_enrichment(store, vectors, enrichment, id, title, truncated, now));
    }

    Ok(IndexOutcome { id, status })
}

/// The background enrichment step: keywords/description and embedding are
/// requested concurrently, each written back independently so a failure in
/// one never withholds the other. Discards its own result if a newer
/// ingest has already superseded this page (tie-break, §4.6 step 7).
async fn run_enrichment(
    store: Arc<DocumentStore>,
    vectors: Arc<Mutex<VectorIndex>>,
    enrichment: Arc<dyn EnrichmentClient>,
    id: PageId,
    title: String,
    content: String,
    scheduled_at: DateTime<Utc>,
) {
    let embed_input = format!("{title}\n{content}");
    let (enrich_result, embed_result) =
        tokio::join!(enrichment.enrich(&title, &content), enrichment.embed(&embed_input));

    let current = match store.get_by_id(id) {
        Ok(Some(p)) => p,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!(error = %e, page_id = id, "could not load page for enrichment writeback");
            return;
        }
    };
    if current.last_updated_at > scheduled_at {
        tracing::debug!(page_id = id, "discarding enrichment result superseded by a newer ingest");
        return;
    }

    if let Ok(enriched) = enrich_result {
        let fields = PageUpsert {
            url: current.url.clone(),
            title: current.title.clone(),
            description: enriched.description,
            keywords: enriched.keywords,
            content: current.content.clone(),
            favicon_url: current.favicon_url.clone(),
            embedding: current.embedding.clone(),
            at: Utc::now(),
        };
        if let Err(e) = store.update_content(id, &fields) {
            tracing::warn!(error = %e, page_id = id, "failed to persist keywords/description");
        }
    }

    match embed_result {
        Ok(embedding) => {
            if let Err(e) = store.set_embedding(id, &embedding, Utc::now()) {
                tracing::warn!(error = %e, page_id = id, "failed to persist embedding");
                return;
            }
            match vectors.lock() {
                Ok(mut idx) => {
                    if let Err(e) = idx.replace(id, embedding) {
                        tracing::warn!(error = %e, page_id = id, "failed to replace vector in index");
                    }
                }
                Err(_) => tracing::warn!(page_id = id, "vector index lock poisoned"),
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, page_id = id, "embedding generation failed, page remains lexically searchable");
        }
    }
}
