//! Wire DTOs for the HTTP control surface.
//!
//! These mirror `webmem_core::Engine`'s operations field-for-field; nothing
//! here carries business logic, only (de)serialization and the mapping from
//! an internal result to the JSON shape a client expects.

use serde::{Deserialize, Serialize};

use webmem_core::{
    CacheStats, EngineStats, EvictionCandidate, EvictionReport, EvictionStats, IndexOutcome,
    IndexStatus, Page, ProbeResult, SearchHit,
};

#[derive(Debug, Deserialize)]
pub struct IndexPageRequest {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub favicon_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IndexPageResponse {
    pub id: i64,
    pub status: &'static str,
    pub message: String,
}

impl From<IndexOutcome> for IndexPageResponse {
    fn from(o: IndexOutcome) -> Self {
        let status = match o.status {
            IndexStatus::Indexed => "indexed",
            IndexStatus::AlreadyIndexed => "already_indexed",
            IndexStatus::Reindexed => "reindexed",
        };
        let message = match o.status {
            IndexStatus::Indexed => "page indexed".to_string(),
            IndexStatus::AlreadyIndexed => "page already indexed within the staleness window".to_string(),
            IndexStatus::Reindexed => "page content was stale and has been reindexed".to_string(),
        };
        Self { id: o.id, status, message }
    }
}

#[derive(Debug, Deserialize)]
pub struct ProbeQuery {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct ProbeResponse {
    pub indexed: bool,
    pub page_id: Option<i64>,
    pub needs_reindex: bool,
    pub last_updated: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<ProbeResult> for ProbeResponse {
    fn from(p: ProbeResult) -> Self {
        Self {
            indexed: p.indexed,
            page_id: p.page_id,
            needs_reindex: p.needs_reindex,
            last_updated: p.last_updated,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
}

#[derive(Debug, Serialize)]
pub struct SearchResultMetadata {
    pub vector_score: f64,
    pub keyword_score: f64,
    pub access_count: u64,
    pub final_score: f64,
}

#[derive(Debug, Serialize)]
pub struct SearchResultItem {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub description: String,
    pub keywords: String,
    pub favicon_url: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub relevance_score: f64,
    pub metadata: SearchResultMetadata,
}

impl From<SearchHit> for SearchResultItem {
    fn from(h: SearchHit) -> Self {
        Self {
            id: h.id,
            url: h.url,
            title: h.title,
            description: h.description,
            keywords: h.keywords,
            favicon_url: h.favicon_url,
            created_at: h.created_at,
            relevance_score: h.relevance_score,
            metadata: SearchResultMetadata {
                vector_score: h.semantic_score,
                keyword_score: h.keyword_score,
                access_count: h.access_count,
                final_score: h.relevance_score,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResultItem>,
    pub query: String,
    pub total_found: usize,
}

#[derive(Debug, Deserialize)]
pub struct TrackVisitRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct TrackVisitResponse {
    pub page_id: i64,
    pub visit_count: u64,
    pub arc_score: f64,
}

#[derive(Debug, Serialize)]
pub struct PageResponse {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub description: String,
    pub keywords: String,
    pub content: String,
    pub favicon_url: Option<String>,
    pub visit_count: u64,
    pub first_visited_at: chrono::DateTime<chrono::Utc>,
    pub last_visited_at: chrono::DateTime<chrono::Utc>,
    pub indexed_at: chrono::DateTime<chrono::Utc>,
    pub last_updated_at: chrono::DateTime<chrono::Utc>,
    pub arc_score: f64,
}

impl From<Page> for PageResponse {
    fn from(p: Page) -> Self {
        Self {
            id: p.id,
            url: p.url,
            title: p.title,
            description: p.description,
            keywords: p.keywords,
            content: p.content,
            favicon_url: p.favicon_url,
            visit_count: p.visit_count,
            first_visited_at: p.first_visited,
            last_visited_at: p.last_visited,
            indexed_at: p.indexed_at,
            last_updated_at: p.last_updated_at,
            arc_score: p.arc_score,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListPagesQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ListPagesResponse {
    pub pages: Vec<PageResponse>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

#[derive(Debug, Serialize)]
pub struct DeletePageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct DbStatsResponse {
    pub total_pages: u64,
}

#[derive(Debug, Serialize)]
pub struct VectorStatsResponse {
    pub total_vectors: usize,
    pub dimension: usize,
    pub memory_mb: f64,
}

#[derive(Debug, Serialize)]
pub struct CacheStatsResponse {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

impl From<CacheStats> for CacheStatsResponse {
    fn from(s: CacheStats) -> Self {
        Self { size: s.size, capacity: s.capacity, hits: s.hits, misses: s.misses }
    }
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub db: DbStatsResponse,
    pub vector: VectorStatsResponse,
    pub cache: CacheStatsResponse,
}

impl From<EngineStats> for StatsResponse {
    fn from(s: EngineStats) -> Self {
        Self {
            db: DbStatsResponse { total_pages: s.db.total_pages },
            vector: VectorStatsResponse {
                total_vectors: s.vector.total_vectors,
                dimension: s.vector.dimension,
                memory_mb: s.vector.memory_mb,
            },
            cache: s.cache.into(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct CacheTopEntry {
    pub query: String,
    pub access_count: u64,
}

#[derive(Debug, Serialize)]
pub struct CacheTopResponse {
    pub entries: Vec<CacheTopEntry>,
}

#[derive(Debug, Serialize)]
pub struct CacheClearResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct CacheCleanupResponse {
    pub removed: usize,
}

#[derive(Debug, Deserialize, Default)]
pub struct CountQuery {
    pub count: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct EvictionCandidateResponse {
    pub id: i64,
    pub url: String,
    pub arc_score: f64,
    pub last_visited: chrono::DateTime<chrono::Utc>,
}

impl From<EvictionCandidate> for EvictionCandidateResponse {
    fn from(c: EvictionCandidate) -> Self {
        Self { id: c.id, url: c.url, arc_score: c.arc_score, last_visited: c.last_visited }
    }
}

#[derive(Debug, Serialize)]
pub struct EvictionPreviewResponse {
    pub candidates: Vec<EvictionCandidateResponse>,
}

#[derive(Debug, Serialize)]
pub struct EvictionRunResponse {
    pub removed_ids: Vec<i64>,
}

impl From<EvictionReport> for EvictionRunResponse {
    fn from(r: EvictionReport) -> Self {
        Self { removed_ids: r.removed_ids }
    }
}

#[derive(Debug, Serialize)]
pub struct EvictionStatsResponse {
    pub total_pages: u64,
    pub capacity: usize,
    pub headroom: usize,
    pub protect_window_minutes: i64,
}

impl From<EvictionStats> for EvictionStatsResponse {
    fn from(s: EvictionStats) -> Self {
        Self {
            total_pages: s.total_pages,
            capacity: s.capacity,
            headroom: s.headroom,
            protect_window_minutes: s.protect_window_minutes,
        }
    }
}

/// The small user-visible error kind set from spec §7, carried in every
/// non-2xx response body as `{"error": {"kind": ..., "message": ...}}`.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Store,
    NotFound,
    Internal,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_outcome_maps_status_to_wire_string() {
        let resp: IndexPageResponse = IndexOutcome { id: 7, status: IndexStatus::Reindexed }.into();
        assert_eq!(resp.status, "reindexed");
        assert_eq!(resp.id, 7);
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::NotFound).unwrap();
        assert_eq!(json, "\"not_found\"");
    }
}
