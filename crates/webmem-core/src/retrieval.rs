//! Retrieval pipeline (C7): fuses C1's lexical search with C2's semantic
//! search, boosts by C5's `arc_score`, and trims a weakly-relevant tail.
//!
//! The two branches are awaited together with `tokio::join!`, the same
//! pattern the example pack uses to overlap a cheap store read with a
//! suspending provider call rather than serializing them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::arc::apply_derived_scores;
use crate::cache::QueryEmbeddingCache;
use crate::config::Config;
use crate::enrichment::EnrichmentClient;
use crate::page::PageId;
use crate::store::DocumentStore;
use crate::vector::VectorIndex;

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
    #[error(transparent)]
    Vector(#[from] crate::vector::VectorError),
    #[error(transparent)]
    Cache(#[from] crate::cache::CacheError),
    #[error("internal error: {0}")]
    Internal(String),
}

/// One search hit with the per-component scores that produced `final_score`,
/// so a caller can surface them as diagnostic metadata.
#[derive(Debug, Clone)]
pub struct ScoredResult {
    pub id: PageId,
    pub semantic_score: f64,
    pub keyword_score: f64,
    pub access_count: u64,
    pub final_score: f64,
}

/// Truncate a descending-by-score list at the first adjacent pair whose
/// relative drop is at least `drop_ratio` AND whose latter absolute score
/// falls below `min_absolute`. Shared between C2's own `filtered_search`
/// and this module's fused result set so both apply the identical rule.
pub fn drop_filter<T>(
    mut items: Vec<T>,
    drop_ratio: f32,
    min_absolute: f32,
    score_of: impl Fn(&T) -> f32,
) -> Vec<T> {
    if items.len() < 2 {
        return items;
    }
    for i in 1..items.len() {
        let prev = score_of(&items[i - 1]);
        let cur = score_of(&items[i]);
        if prev > 0.0 {
            let relative_drop = 1.0 - (cur / prev);
            if relative_drop >= drop_ratio && cur < min_absolute {
                items.truncate(i);
                return items;
            }
        }
    }
    items
}

/// `keyword ∈ [0,1]`: `1.0 - 0.1 * (rank_position - 1)`, floored at 0.1.
/// `rank_position` is 1-based, best lexical hit first.
fn keyword_score_for_rank(rank_position: usize) -> f64 {
    (1.0 - 0.1 * (rank_position as f64 - 1.0)).max(0.1)
}

/// Outcome of resolving the query's embedding independently of the lexical
/// branch: either a ready vector (cache hit or live provider call), or a
/// signal that the provider is down and the caller must fall back to the
/// lexical branch's top hit once it, too, has resolved.
enum EmbeddingResolution {
    Resolved(Option<Vec<f32>>),
    NeedsLexicalSurrogate,
}

/// A cache hit short-circuits; otherwise a live provider call is made and
/// cached on success. This never touches the lexical branch's results, so
/// it can run concurrently with `full_text_search` inside `tokio::join!`
/// rather than strictly after it.
async fn resolve_query_embedding(
    cache: &QueryEmbeddingCache,
    enrichment: &dyn EnrichmentClient,
    normalized_query: &str,
) -> Result<EmbeddingResolution, RetrievalError> {
    if let Some(cached) = cache.get(normalized_query)? {
        return Ok(EmbeddingResolution::Resolved(Some(cached)));
    }
    match enrichment.embed(normalized_query).await {
        Ok(embedding) => {
            cache.put(normalized_query.to_string(), embedding.clone())?;
            Ok(EmbeddingResolution::Resolved(Some(embedding)))
        }
        Err(e) => {
            tracing::warn!(error = %e, "query embedding unavailable, falling back to lexical surrogate");
            Ok(EmbeddingResolution::NeedsLexicalSurrogate)
        }
    }
}

/// Run the full fused search for `query`, returning at most
/// `config.search_max_results` hits ordered best-first.
pub async fn search(
    store: &DocumentStore,
    vectors: &std::sync::Mutex<VectorIndex>,
    cache: &QueryEmbeddingCache,
    enrichment: &dyn EnrichmentClient,
    query: &str,
    config: &Config,
    now: DateTime<Utc>,
) -> Result<Vec<ScoredResult>, RetrievalError> {
    let normalized = crate::cache::normalize_query(query);
    if normalized.is_empty() {
        return Ok(Vec::new());
    }

    let k_lexical = config.search_k_lexical as u32;

    // The embedding provider call is the one suspending network I/O in this
    // pipeline; join it against the lexical store read so the two overlap
    // instead of serializing the provider call after a cache miss.
    let (lexical, embedding_resolution) = tokio::join!(
        async { store.full_text_search(&normalized, k_lexical) },
        resolve_query_embedding(cache, enrichment, &normalized)
    );
    let lexical = lexical?;

    let embedding = match embedding_resolution? {
        EmbeddingResolution::Resolved(v) => v,
        EmbeddingResolution::NeedsLexicalSurrogate => match lexical.first() {
            Some(&(top_id, _)) => store.get_by_id(top_id)?.and_then(|p| p.embedding),
            None => None,
        },
    };

    let semantic: Vec<(PageId, f32)> = match &embedding {
        Some(v) => {
            let idx = vectors.lock().map_err(|_| RetrievalError::Internal("vector index lock poisoned".into()))?;
            idx.search(v, config.search_k_lexical)?
        }
        None => Vec::new(),
    };

    let keyword_map: HashMap<PageId, f64> = lexical
        .iter()
        .enumerate()
        .map(|(idx, &(id, _))| (id, keyword_score_for_rank(idx + 1)))
        .collect();
    let semantic_map: HashMap<PageId, f64> =
        semantic.iter().map(|&(id, score)| (id, score as f64)).collect();

    let mut candidate_ids: Vec<PageId> = keyword_map.keys().copied().collect();
    for id in semantic_map.keys() {
        if !keyword_map.contains_key(id) {
            candidate_ids.push(*id);
        }
    }

    let mut results = Vec::with_capacity(candidate_ids.len());
    for id in candidate_ids {
        let Some(mut page) = store.get_by_id(id)? else {
            continue;
        };
        apply_derived_scores(&mut page, now);

        let semantic_score = semantic_map.get(&id).copied().unwrap_or(0.0);
        let keyword_score = keyword_map.get(&id).copied().unwrap_or(0.0);
        let frequency_boost = config.search_freq_weight * page.arc_score;
        let final_score = config.search_semantic_weight * semantic_score
            + config.search_keyword_weight * keyword_score
            + frequency_boost;

        results.push(ScoredResult {
            id,
            semantic_score,
            keyword_score,
            access_count: page.visit_count,
            final_score,
        });
    }

    results.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.semantic_score.partial_cmp(&a.semantic_score).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| b.keyword_score.partial_cmp(&a.keyword_score).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| b.id.cmp(&a.id))
    });

    let mut results = drop_filter(
        results,
        config.search_drop_ratio as f32,
        config.search_min_absolute as f32,
        |r: &ScoredResult| r.final_score as f32,
    );

    results.truncate(config.search_max_results);
    Ok(results)
}
