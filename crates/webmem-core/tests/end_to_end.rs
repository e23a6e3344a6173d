//! End-to-end scenarios from spec.md §8, exercised against `Engine` the way
//! a control surface would call it: ingest, let background enrichment run a
//! turn, then probe/search/evict.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use webmem_core::{Config, Engine, EnrichmentClient, IndexStatus, MockProvider};

/// Wraps `MockProvider` with an `embed` call counter (scenario 5) and an
/// on/off outage switch (scenario 4), so tests can assert cache behavior and
/// provider-down fallbacks without a real network dependency.
struct CountingProvider {
    inner: MockProvider,
    embed_calls: AtomicUsize,
    down: std::sync::atomic::AtomicBool,
}

impl CountingProvider {
    fn new(dimension: usize) -> Self {
        Self {
            inner: MockProvider::new(dimension),
            embed_calls: AtomicUsize::new(0),
            down: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn embed_call_count(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EnrichmentClient for CountingProvider {
    async fn enrich(&self, title: &str, content: &str) -> webmem_core::enrichment::Result<webmem_core::enrichment::Enrichment> {
        if self.down.load(Ordering::SeqCst) {
            return Ok(webmem_core::enrichment::synthesize_placeholder(title, content));
        }
        self.inner.enrich(title, content).await
    }

    async fn embed(&self, text: &str) -> webmem_core::enrichment::Result<Vec<f32>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(webmem_core::EnrichmentError::RetriesExhausted {
                attempts: 3,
                source: "provider disabled for test".to_string(),
            });
        }
        self.inner.embed(text).await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn health_check(&self) -> bool {
        !self.down.load(Ordering::SeqCst)
    }
}

fn engine_with(provider: Arc<CountingProvider>) -> (tempfile::TempDir, Engine) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::defaults_for_test(dir.path());
    config.embedding_dimension = provider.dimension();
    let enrichment: Arc<dyn EnrichmentClient> = provider;
    let engine = Engine::in_memory(config, enrichment).unwrap();
    (dir, engine)
}

async fn settle() {
    tokio::task::yield_now().await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
}

#[tokio::test]
async fn scenario_1_fresh_ingest_then_exact_title_search() {
    let provider = Arc::new(CountingProvider::new(16));
    let (_dir, engine) = engine_with(provider);

    let outcome = engine
        .ingest(
            "https://a.test/x".to_string(),
            "Python FastAPI Tutorial".to_string(),
            "fastapi tutorial covering routing dependency injection and async endpoints in great depth"
                .to_string(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(outcome.status, IndexStatus::Indexed);
    settle().await;

    let hits = engine.search("fastapi tutorial").await.unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].id, outcome.id);
    assert!(hits[0].keyword_score >= 0.9);
    assert!(hits[0].semantic_score > 0.0);
}

#[tokio::test]
async fn scenario_2_duplicate_ingest_within_staleness_window_is_already_indexed() {
    let provider = Arc::new(CountingProvider::new(16));
    let (_dir, engine) = engine_with(provider);

    let content = "a".repeat(200);
    let first = engine
        .ingest("https://a.test/dup".to_string(), "Title".to_string(), content.clone(), None)
        .await
        .unwrap();
    assert_eq!(first.status, IndexStatus::Indexed);
    settle().await;

    let first_page = engine.get_page(first.id).unwrap().unwrap();

    let second = engine
        .ingest("https://a.test/dup".to_string(), "Title".to_string(), content, None)
        .await
        .unwrap();

    assert_eq!(second.status, IndexStatus::AlreadyIndexed);
    assert_eq!(second.id, first.id);
    let second_page = engine.get_page(second.id).unwrap().unwrap();
    assert_eq!(second_page.last_updated_at, first_page.last_updated_at);
}

#[tokio::test]
async fn scenario_3_stale_reingest_refreshes_content_and_embedding() {
    // Drive the indexing pipeline directly so the staleness clock can be
    // advanced without sleeping the test thread for real days.
    let store = Arc::new(webmem_core::DocumentStore::open_in_memory().unwrap());
    let vectors = Arc::new(std::sync::Mutex::new(webmem_core::VectorIndex::new(16)));
    let provider: Arc<dyn EnrichmentClient> = Arc::new(MockProvider::new(16));

    let now = Utc::now();
    let first = webmem_core::indexing::index_page(
        store.clone(),
        vectors.clone(),
        provider.clone(),
        "https://a.test/stale".to_string(),
        "Old Title".to_string(),
        "old content about rust programming".repeat(5),
        None,
        chrono::Duration::days(3),
        now,
    )
    .await
    .unwrap();
    assert_eq!(first.status, IndexStatus::Indexed);

    let later = now + chrono::Duration::days(4);
    let second = webmem_core::indexing::index_page(
        store.clone(),
        vectors,
        provider,
        "https://a.test/stale".to_string(),
        "New Title".to_string(),
        "new content about python programming".repeat(5),
        None,
        chrono::Duration::days(3),
        later,
    )
    .await
    .unwrap();

    assert_eq!(second.status, IndexStatus::Reindexed);
    assert_eq!(second.id, first.id);
    let page = store.get_by_id(second.id).unwrap().unwrap();
    assert!(page.content.contains("python"));
    assert_eq!(page.last_updated_at, later);
}

#[tokio::test]
async fn scenario_4_provider_outage_search_falls_back_to_lexical_surrogate() {
    let provider = Arc::new(CountingProvider::new(16));
    let (_dir, engine) = engine_with(provider.clone());

    for (url, title, content) in [
        ("https://a.test/one", "Gardening Basics", "tips for growing tomatoes and herbs at home"),
        ("https://a.test/two", "Alpha Centauri Primer", "an introduction to the nearest star system alpha"),
        ("https://a.test/three", "Bread Baking Guide", "sourdough starter and kneading technique overview"),
    ] {
        let outcome = engine.ingest(url.to_string(), title.to_string(), content.to_string(), None).await.unwrap();
        assert_eq!(outcome.status, IndexStatus::Indexed);
    }
    settle().await;

    provider.set_down(true);
    let hits = engine.search("alpha").await.unwrap();

    assert!(!hits.is_empty());
    let page_two = hits.iter().find(|h| h.url == "https://a.test/two").expect("page two should match lexically");
    assert!(page_two.keyword_score >= 0.9);
    // The lexical-surrogate fallback uses page two's own embedding as the
    // query vector, so its cosine similarity with itself is ~1.0.
    assert!(page_two.semantic_score > 0.99);
}

#[tokio::test]
async fn scenario_5_cache_hit_avoids_a_second_provider_call() {
    let provider = Arc::new(CountingProvider::new(16));
    let (_dir, engine) = engine_with(provider.clone());

    engine
        .ingest(
            "https://a.test/beta".to_string(),
            "Beta Testing Guide".to_string(),
            "beta testing software release process and feedback loops explained".to_string(),
            None,
        )
        .await
        .unwrap();
    settle().await;

    let first = engine.search("beta").await.unwrap();
    let calls_after_first = provider.embed_call_count();
    assert!(calls_after_first > 0);

    let second = engine.search("beta").await.unwrap();
    let calls_after_second = provider.embed_call_count();

    assert_eq!(calls_after_first, calls_after_second, "second search must hit the query cache, not the provider");
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.id, b.id);
    }
}

#[tokio::test]
async fn scenario_6_eviction_under_capacity_pressure_spares_the_frequently_visited_page() {
    let provider = Arc::new(CountingProvider::new(16));
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::defaults_for_test(dir.path());
    config.embedding_dimension = provider.dimension();
    config.eviction_capacity = 3;
    config.eviction_headroom = 0;
    config.eviction_protect_window_minutes = 0;
    let enrichment: Arc<dyn EnrichmentClient> = provider;
    let engine = Engine::in_memory(config, enrichment).unwrap();

    let mut ids = Vec::new();
    for i in 0..4 {
        let outcome = engine
            .ingest(
                format!("https://a.test/page{i}"),
                format!("Page {i}"),
                "x".repeat(200),
                None,
            )
            .await
            .unwrap();
        ids.push(outcome.id);
    }
    settle().await;

    // Visit the first page twice more so its arc_score is clearly the
    // highest and it must survive eviction.
    engine.track_visit("https://a.test/page0").unwrap();
    engine.track_visit("https://a.test/page0").unwrap();

    let report = engine.run_eviction().unwrap();
    assert_eq!(report.removed_ids.len(), 1);
    assert!(!report.removed_ids.contains(&ids[0]));
    assert!(engine.get_page(report.removed_ids[0]).unwrap().is_none());

    let stats = engine.stats().unwrap();
    assert_eq!(stats.db.total_pages, 3);
}
