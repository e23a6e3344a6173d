//! Core engine for a local personal web-memory search service: ingests
//! visited pages, enriches them with AI-derived keywords/description and a
//! dense embedding, and answers interactive queries by fusing lexical and
//! semantic relevance with access-frequency signals.
//!
//! This crate is transport-agnostic: `Engine` exposes every operation a
//! control surface needs (`webmem-server` binds it to HTTP); nothing here
//! depends on how a request arrived.

pub mod arc;
pub mod cache;
pub mod config;
pub mod enrichment;
pub mod error;
pub mod indexing;
pub mod page;
pub mod retrieval;
pub mod store;
pub mod vector;

use std::sync::{Arc, Mutex};

use chrono::Utc;

pub use arc::{EvictionCandidate, EvictionReport, VisitOutcome};
pub use cache::{CacheError, CacheStats, QueryEmbeddingCache};
pub use config::{Config, ConfigFile};
pub use enrichment::{EnrichmentClient, EnrichmentError, LiveProvider, MockProvider};
pub use error::{Result, WebMemError};
pub use indexing::{IndexOutcome, IndexStatus, ProbeResult};
pub use page::{Page, PageId};
pub use retrieval::ScoredResult;
pub use store::{DocumentStore, StoreError};
pub use vector::{VectorError, VectorIndex};

/// A search hit with the page fields a client needs to render a result,
/// alongside the fusion metadata that produced its ranking.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: PageId,
    pub url: String,
    pub title: String,
    pub description: String,
    pub keywords: String,
    pub favicon_url: Option<String>,
    pub created_at: chrono::DateTime<Utc>,
    pub relevance_score: f64,
    pub semantic_score: f64,
    pub keyword_score: f64,
    pub access_count: u64,
}

#[derive(Debug, Clone)]
pub struct DbStats {
    pub total_pages: u64,
}

#[derive(Debug, Clone)]
pub struct VectorStats {
    pub total_vectors: usize,
    pub dimension: usize,
    pub memory_mb: f64,
}

#[derive(Debug, Clone)]
pub struct EngineStats {
    pub db: DbStats,
    pub vector: VectorStats,
    pub cache: CacheStats,
}

#[derive(Debug, Clone)]
pub struct EvictionStats {
    pub total_pages: u64,
    pub capacity: usize,
    pub headroom: usize,
    pub protect_window_minutes: i64,
}

/// Facade wiring C1-C7 together behind the operation set C8 exposes.
/// Holds the shared, internally-synchronized state each pipeline needs:
/// the document store (its own reader/writer locks), the vector index
/// (exclusive access via one mutex), and the query-embedding cache.
pub struct Engine {
    store: Arc<DocumentStore>,
    vectors: Arc<Mutex<VectorIndex>>,
    cache: Arc<QueryEmbeddingCache>,
    enrichment: Arc<dyn EnrichmentClient>,
    config: Config,
}

impl Engine {
    /// Open the store at `config.store_path`, rebuild the vector index from
    /// its persisted embeddings, and load the query cache from disk.
    pub fn new(config: Config, enrichment: Arc<dyn EnrichmentClient>) -> Result<Self> {
        let store = DocumentStore::open(&config.store_path)?;

        let mut vectors = VectorIndex::with_soft_cap(config.embedding_dimension, config.vector_soft_cap);
        for (id, embedding) in store.all_embeddings()? {
            if let Err(e) = vectors.add(id, embedding) {
                tracing::warn!(page_id = id, error = %e, "dropping stored embedding with wrong dimension on startup");
            }
        }

        let cache = QueryEmbeddingCache::load(
            config.cache_capacity,
            config.cache_ttl_days,
            config.cache_persistence_path.clone(),
            config.cache_persist_every_n_mutations,
        );

        Ok(Self {
            store: Arc::new(store),
            vectors: Arc::new(Mutex::new(vectors)),
            cache: Arc::new(cache),
            enrichment,
            config,
        })
    }

    /// An engine over an in-memory store, for tests and short-lived
    /// embedded use. `config.cache_persistence_path` still backs the query
    /// cache's on-disk file.
    pub fn in_memory(config: Config, enrichment: Arc<dyn EnrichmentClient>) -> Result<Self> {
        let store = DocumentStore::open_in_memory()?;
        let vectors = VectorIndex::with_soft_cap(config.embedding_dimension, config.vector_soft_cap);
        let cache = QueryEmbeddingCache::new(
            config.cache_capacity,
            config.cache_ttl_days,
            config.cache_persistence_path.clone(),
            config.cache_persist_every_n_mutations,
        );
        Ok(Self {
            store: Arc::new(store),
            vectors: Arc::new(Mutex::new(vectors)),
            cache: Arc::new(cache),
            enrichment,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn staleness(&self) -> chrono::Duration {
        chrono::Duration::days(self.config.store_staleness_days)
    }

    fn protect_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.config.eviction_protect_window_minutes)
    }

    pub async fn ingest(
        &self,
        url: String,
        title: String,
        content: String,
        favicon_url: Option<String>,
    ) -> Result<IndexOutcome> {
        let outcome = indexing::index_page(
            self.store.clone(),
            self.vectors.clone(),
            self.enrichment.clone(),
            url,
            title,
            content,
            favicon_url,
            self.staleness(),
            Utc::now(),
        )
        .await?;
        Ok(outcome)
    }

    pub fn probe(&self, url: &str) -> Result<ProbeResult> {
        Ok(indexing::probe(&self.store, url, self.staleness(), Utc::now())?)
    }

    /// Fused lexical+semantic search, joined with page fields for direct
    /// presentation to a client.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let now = Utc::now();
        let scored = retrieval::search(
            &self.store,
            &self.vectors,
            &self.cache,
            self.enrichment.as_ref(),
            query,
            &self.config,
            now,
        )
        .await?;

        let mut hits = Vec::with_capacity(scored.len());
        for r in scored {
            let Some(page) = self.store.get_by_id(r.id)? else {
                continue;
            };
            hits.push(SearchHit {
                id: page.id,
                url: page.url,
                title: page.title,
                description: page.description,
                keywords: page.keywords,
                favicon_url: page.favicon_url,
                created_at: page.indexed_at,
                relevance_score: r.final_score,
                semantic_score: r.semantic_score,
                keyword_score: r.keyword_score,
                access_count: r.access_count,
            });
        }
        Ok(hits)
    }

    /// Record a visit, recompute derived scores, and — per the
    /// probabilistic eviction trigger — occasionally run an eviction sweep
    /// in the same call.
    pub fn track_visit(&self, url: &str) -> Result<VisitOutcome> {
        let outcome = arc::track_visit(&self.store, url, Utc::now())?;

        if arc::should_randomly_trigger_eviction(self.config.eviction_random_trigger_probability) {
            if let Err(e) = self.run_eviction() {
                tracing::warn!(error = %e, "probabilistic eviction sweep failed");
            }
        }

        Ok(outcome)
    }

    pub fn get_page(&self, id: PageId) -> Result<Option<Page>> {
        let page = self.store.get_by_id(id)?;
        Ok(page.map(|mut p| {
            arc::apply_derived_scores(&mut p, Utc::now());
            p
        }))
    }

    pub fn list_pages(&self, limit: u32, offset: u32) -> Result<(Vec<Page>, u64)> {
        let mut pages = self.store.list(limit, offset)?;
        let now = Utc::now();
        for p in &mut pages {
            arc::apply_derived_scores(p, now);
        }
        let total = self.store.count()?;
        Ok((pages, total))
    }

    pub fn delete_page(&self, id: PageId) -> Result<bool> {
        let deleted = self.store.delete(id)?;
        if deleted {
            let mut vectors = self
                .vectors
                .lock()
                .map_err(|_| WebMemError::Internal("vector index lock poisoned".into()))?;
            vectors.remove(id);
        }
        Ok(deleted)
    }

    pub fn stats(&self) -> Result<EngineStats> {
        let total_pages = self.store.count()?;
        let (total_vectors, dimension) = {
            let vectors = self
                .vectors
                .lock()
                .map_err(|_| WebMemError::Internal("vector index lock poisoned".into()))?;
            (vectors.size(), vectors.dimension())
        };
        let memory_mb = (total_vectors * dimension * std::mem::size_of::<f32>()) as f64 / (1024.0 * 1024.0);

        Ok(EngineStats {
            db: DbStats { total_pages },
            vector: VectorStats { total_vectors, dimension, memory_mb },
            cache: self.cache.stats()?,
        })
    }

    pub fn cache_stats(&self) -> Result<CacheStats> {
        Ok(self.cache.stats()?)
    }

    pub fn cache_top(&self, n: usize) -> Result<Vec<(String, u64)>> {
        Ok(self.cache.top(n)?)
    }

    pub fn cache_clear(&self) -> Result<()> {
        Ok(self.cache.clear()?)
    }

    pub fn cache_cleanup(&self) -> Result<usize> {
        Ok(self.cache.cleanup_expired()?)
    }

    /// Preview the worst `count` eviction candidates without deleting
    /// anything.
    pub fn eviction_preview(&self, count: usize) -> Result<Vec<EvictionCandidate>> {
        let now = Utc::now();
        let total = self.store.count()? as u32;
        let mut pages = self.store.list(total, 0)?;
        for p in &mut pages {
            arc::apply_derived_scores(p, now);
        }
        Ok(arc::select_eviction_candidates(&pages, now, self.protect_window(), count))
    }

    /// Run an eviction sweep now, regardless of the probabilistic trigger.
    pub fn run_eviction(&self) -> Result<EvictionReport> {
        let mut vectors = self
            .vectors
            .lock()
            .map_err(|_| WebMemError::Internal("vector index lock poisoned".into()))?;
        let report = arc::run_eviction(
            &self.store,
            &mut *vectors,
            Utc::now(),
            self.config.eviction_capacity,
            self.config.eviction_headroom,
            self.protect_window(),
        )?;
        Ok(report)
    }

    pub fn eviction_stats(&self) -> Result<EvictionStats> {
        Ok(EvictionStats {
            total_pages: self.store.count()?,
            capacity: self.config.eviction_capacity,
            headroom: self.config.eviction_headroom,
            protect_window_minutes: self.config.eviction_protect_window_minutes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> (tempfile::TempDir, Engine) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::defaults_for_test(dir.path());
        let enrichment: Arc<dyn EnrichmentClient> = Arc::new(MockProvider::new(config.embedding_dimension));
        let engine = Engine::in_memory(config, enrichment).unwrap();
        (dir, engine)
    }

    #[tokio::test]
    async fn ingest_then_search_finds_the_page() {
        let (_dir, engine) = engine();
        let outcome = engine
            .ingest(
                "https://a.test/fastapi".to_string(),
                "Python FastAPI Tutorial".to_string(),
                "fastapi tutorial covering routing dependency injection and async endpoints in depth"
                    .to_string(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(outcome.status, IndexStatus::Indexed);

        // Enrichment runs in a spawned background task; give it a turn.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let hits = engine.search("fastapi tutorial").await.unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].id, outcome.id);
    }

    #[tokio::test]
    async fn probe_reports_unindexed_url() {
        let (_dir, engine) = engine();
        let result = engine.probe("https://a.test/nope").unwrap();
        assert!(!result.indexed);
    }

    #[test]
    fn track_visit_creates_a_page_and_returns_its_score() {
        let (_dir, engine) = engine();
        let outcome = engine.track_visit("https://a.test/visited").unwrap();
        assert!(outcome.was_new);
        assert_eq!(outcome.page.visit_count, 1);
    }

    #[test]
    fn delete_page_removes_it_from_store_and_vector_index() {
        let (_dir, engine) = engine();
        let outcome = engine.track_visit("https://a.test/x").unwrap();
        assert!(engine.delete_page(outcome.page.id).unwrap());
        assert!(engine.get_page(outcome.page.id).unwrap().is_none());
    }

    #[test]
    fn stats_reflect_store_and_vector_state() {
        let (_dir, engine) = engine();
        engine.track_visit("https://a.test/x").unwrap();
        let stats = engine.stats().unwrap();
        assert_eq!(stats.db.total_pages, 1);
    }
}
