//! Query-embedding cache (C4): a size- and TTL-bounded LRU cache mapping a
//! normalized query string to its embedding, persisted to a single JSON
//! file so semantic search survives both process restarts and enrichment
//! provider outages.
//!
//! Grounded in the teacher's `query_cache: Mutex<LruCache<String, Vec<f32>>>`
//! field on `Storage`, generalized from a fixed unpersisted 100-entry cache
//! to the full contract: TTL expiry, dirty-counter-triggered
//! write-temp-then-rename persistence, `top(n)` and `stats()`.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};

/// A single cached query -> embedding mapping (§3.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub query_text: String,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistMeta {
    hits: u64,
    misses: u64,
}

/// On-disk shape: `{ entries: [...], meta: {...} }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistFile {
    entries: Vec<CacheEntry>,
    meta: PersistMeta,
}

/// Normalize a query the same way the retrieval pipeline does before
/// looking it up here, so the two never disagree on a key.
pub fn normalize_query(q: &str) -> String {
    q.trim().to_lowercase()
}

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("query cache lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

struct Inner {
    entries: LruCache<String, CacheEntry>,
    ttl: chrono::Duration,
    persistence_path: PathBuf,
    persist_every_n: u32,
    dirty_count: u32,
    hits: u64,
    misses: u64,
}

/// Bounded LRU + TTL cache of query -> embedding, single monitor shared by
/// every reader/writer (spec.md §4.4/§5: "single logical monitor; concurrent
/// readers and writers are serialized").
pub struct QueryEmbeddingCache {
    inner: Mutex<Inner>,
}

impl QueryEmbeddingCache {
    /// Construct an empty cache with the given bounds; does not touch disk.
    pub fn new(capacity: usize, ttl_days: i64, persistence_path: PathBuf, persist_every_n: u32) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                ttl: chrono::Duration::days(ttl_days),
                persistence_path,
                persist_every_n: persist_every_n.max(1),
                dirty_count: 0,
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Construct a cache and load its persisted state from disk. A
    /// missing or corrupt file is tolerated: the cache simply starts empty
    /// (spec.md §4.4(f), §7 `CacheCorrupt`).
    pub fn load(capacity: usize, ttl_days: i64, persistence_path: PathBuf, persist_every_n: u32) -> Self {
        let cache = Self::new(capacity, ttl_days, persistence_path.clone(), persist_every_n);
        if persistence_path.exists() {
            match std::fs::read_to_string(&persistence_path) {
                Ok(text) => match serde_json::from_str::<PersistFile>(&text) {
                    Ok(file) => match cache.inner.lock() {
                        Ok(mut inner) => {
                            for entry in file.entries {
                                inner.entries.put(entry.query_text.clone(), entry);
                            }
                            inner.hits = file.meta.hits;
                            inner.misses = file.meta.misses;
                        }
                        Err(_) => tracing::warn!("cache lock poisoned while loading persisted entries, starting empty"),
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, path = %persistence_path.display(), "cache file corrupt, starting empty");
                    }
                },
                Err(e) => {
                    tracing::warn!(error = %e, path = %persistence_path.display(), "cache file unreadable, starting empty");
                }
            }
        }
        cache
    }

    fn is_expired(entry: &CacheEntry, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - entry.created_at > ttl
    }

    /// Look up `query` (already normalized by the caller). A live hit moves
    /// the entry to MRU, updates `last_accessed`, and increments
    /// `access_count`. An expired entry is treated as a miss and left for
    /// [`cleanup_expired`] to reap.
    pub fn get(&self, query: &str) -> Result<Option<Vec<f32>>> {
        let mut inner = self.inner.lock().map_err(|_| CacheError::LockPoisoned)?;
        let now = Utc::now();
        let ttl = inner.ttl;

        let expired = match inner.entries.peek(query) {
            Some(entry) => Self::is_expired(entry, ttl, now),
            None => {
                inner.misses += 1;
                return Ok(None);
            }
        };
        if expired {
            inner.misses += 1;
            return Ok(None);
        }

        let embedding = {
            let entry = inner.entries.get_mut(query).expect("checked present above");
            entry.last_accessed = now;
            entry.access_count += 1;
            entry.embedding.clone()
        };
        inner.hits += 1;
        inner.dirty_count += 1;
        Self::maybe_persist(&mut inner);
        Ok(Some(embedding))
    }

    /// Insert or refresh the entry for `query`. Evicts the LRU entry if
    /// this insertion would exceed capacity (handled internally by
    /// `lru::LruCache`).
    pub fn put(&self, query: String, embedding: Vec<f32>) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| CacheError::LockPoisoned)?;
        let now = Utc::now();
        let entry = CacheEntry {
            query_text: query.clone(),
            embedding,
            created_at: now,
            last_accessed: now,
            access_count: 0,
        };
        inner.entries.put(query, entry);
        inner.dirty_count += 1;
        Self::maybe_persist(&mut inner);
        Ok(())
    }

    /// Remove every entry and reset hit/miss counters.
    pub fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| CacheError::LockPoisoned)?;
        inner.entries.clear();
        inner.hits = 0;
        inner.misses = 0;
        Self::persist(&inner);
        Ok(())
    }

    /// Remove every entry older than the configured TTL; returns the
    /// number removed.
    pub fn cleanup_expired(&self) -> Result<usize> {
        let mut inner = self.inner.lock().map_err(|_| CacheError::LockPoisoned)?;
        let now = Utc::now();
        let ttl = inner.ttl;
        let stale: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| Self::is_expired(e, ttl, now))
            .map(|(k, _)| k.clone())
            .collect();
        let removed = stale.len();
        for key in stale {
            inner.entries.pop(&key);
        }
        if removed > 0 {
            Self::persist(&inner);
        }
        Ok(removed)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let inner = self.inner.lock().map_err(|_| CacheError::LockPoisoned)?;
        Ok(CacheStats {
            size: inner.entries.len(),
            capacity: inner.entries.cap().get(),
            hits: inner.hits,
            misses: inner.misses,
        })
    }

    /// The `n` most-accessed entries, most-accessed first.
    pub fn top(&self, n: usize) -> Result<Vec<(String, u64)>> {
        let inner = self.inner.lock().map_err(|_| CacheError::LockPoisoned)?;
        let mut items: Vec<(String, u64)> = inner
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.access_count))
            .collect();
        items.sort_by(|a, b| b.1.cmp(&a.1));
        items.truncate(n);
        Ok(items)
    }

    /// Force a synchronous, atomic persist regardless of the dirty counter.
    pub fn force_persist(&self) -> Result<()> {
        let inner = self.inner.lock().map_err(|_| CacheError::LockPoisoned)?;
        Self::persist(&inner);
        Ok(())
    }

    fn maybe_persist(inner: &mut Inner) {
        if inner.dirty_count >= inner.persist_every_n {
            inner.dirty_count = 0;
            Self::persist(inner);
        }
    }

    /// Serialize the whole cache to `persistence_path` via write-temp,
    /// then rename, so a crash mid-write never leaves a half-written file
    /// (spec.md §4.4(e)/§6).
    fn persist(inner: &Inner) {
        let file = PersistFile {
            entries: inner.entries.iter().map(|(_, e)| e.clone()).collect(),
            meta: PersistMeta {
                hits: inner.hits,
                misses: inner.misses,
            },
        };
        if let Err(e) = write_atomic(&inner.persistence_path, &file) {
            tracing::warn!(error = %e, path = %inner.persistence_path.display(), "failed to persist query cache");
        }
    }
}

fn write_atomic(path: &Path, file: &PersistFile) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_vec_pretty(file)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_at(dir: &Path, capacity: usize, ttl_days: i64) -> QueryEmbeddingCache {
        QueryEmbeddingCache::new(capacity, ttl_days, dir.join("cache.json"), 20)
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_at(dir.path(), 10, 7);
        cache.put("hello".to_string(), vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(cache.get("hello").unwrap(), Some(vec![1.0, 2.0, 3.0]));
    }

    #[test]
    fn miss_on_unknown_query() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_at(dir.path(), 10, 7);
        assert_eq!(cache.get("nope").unwrap(), None);
        assert_eq!(cache.stats().unwrap().misses, 1);
    }

    #[test]
    fn capacity_plus_one_evicts_exactly_the_lru() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_at(dir.path(), 2, 7);
        cache.put("a".to_string(), vec![1.0]).unwrap();
        cache.put("b".to_string(), vec![2.0]).unwrap();
        cache.put("c".to_string(), vec![3.0]).unwrap();
        assert_eq!(cache.stats().unwrap().size, 2);
        assert_eq!(cache.get("a").unwrap(), None);
        assert!(cache.get("b").unwrap().is_some());
        assert!(cache.get("c").unwrap().is_some());
    }

    #[test]
    fn get_moves_entry_to_mru_preventing_its_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_at(dir.path(), 2, 7);
        cache.put("a".to_string(), vec![1.0]).unwrap();
        cache.put("b".to_string(), vec![2.0]).unwrap();
        let _ = cache.get("a"); // a is now MRU
        cache.put("c".to_string(), vec![3.0]).unwrap(); // evicts b, not a
        assert!(cache.get("a").unwrap().is_some());
        assert_eq!(cache.get("b").unwrap(), None);
    }

    #[test]
    fn expired_entry_is_not_returned() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_at(dir.path(), 10, 7);
        cache.put("a".to_string(), vec![1.0]).unwrap();
        {
            let mut inner = cache.inner.lock().unwrap();
            let entry = inner.entries.get_mut("a").unwrap();
            entry.created_at = Utc::now() - chrono::Duration::days(8);
        }
        assert_eq!(cache.get("a").unwrap(), None);
    }

    #[test]
    fn cleanup_expired_removes_stale_entries_and_counts_them() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_at(dir.path(), 10, 7);
        cache.put("a".to_string(), vec![1.0]).unwrap();
        cache.put("b".to_string(), vec![2.0]).unwrap();
        {
            let mut inner = cache.inner.lock().unwrap();
            inner.entries.get_mut("a").unwrap().created_at = Utc::now() - chrono::Duration::days(8);
        }
        let removed = cache.cleanup_expired().unwrap();
        assert_eq!(removed, 1);
        assert_eq!(cache.stats().unwrap().size, 1);
    }

    #[test]
    fn persists_after_n_mutations_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let cache = QueryEmbeddingCache::new(10, 7, path.clone(), 2);
        cache.put("a".to_string(), vec![1.0, 2.0]).unwrap();
        cache.put("b".to_string(), vec![3.0, 4.0]).unwrap();
        assert!(path.exists());

        let reloaded = QueryEmbeddingCache::load(10, 7, path, 2);
        assert_eq!(reloaded.get("a").unwrap(), Some(vec![1.0, 2.0]));
        assert_eq!(reloaded.get("b").unwrap(), Some(vec![3.0, 4.0]));
    }

    #[test]
    fn load_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = QueryEmbeddingCache::load(10, 7, dir.path().join("missing.json"), 20);
        assert_eq!(cache.stats().unwrap().size, 0);
    }

    #[test]
    fn load_tolerates_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, b"not json").unwrap();
        let cache = QueryEmbeddingCache::load(10, 7, path, 20);
        assert_eq!(cache.stats().unwrap().size, 0);
    }

    #[test]
    fn top_orders_by_access_count_descending() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_at(dir.path(), 10, 7);
        cache.put("a".to_string(), vec![1.0]).unwrap();
        cache.put("b".to_string(), vec![2.0]).unwrap();
        let _ = cache.get("b");
        let _ = cache.get("b");
        let _ = cache.get("a");
        let top = cache.top(2).unwrap();
        assert_eq!(top[0].0, "b");
        assert_eq!(top[0].1, 2);
    }

    #[test]
    fn normalize_query_trims_and_lowercases() {
        assert_eq!(normalize_query("  Rust Tutorial  "), "rust tutorial");
    }
}
