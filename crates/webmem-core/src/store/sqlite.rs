//! SQLite-backed document store (C1): pages table + FTS5 keyword index.
//!
//! Follows the teacher's reader/writer connection split: every method takes
//! `&self`, so `DocumentStore` is `Send + Sync` and callers hold it behind an
//! `Arc` rather than an outer mutex.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::page::{Page, PageId};

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("page not found: {0}")]
    NotFound(PageId),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("initialization error: {0}")]
    Init(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Fields supplied by the indexing pipeline when a page is first seen or
/// re-crawled. `embedding` is `None` until enrichment completes.
#[derive(Debug, Clone)]
pub struct PageUpsert {
    pub url: String,
    pub title: String,
    pub description: String,
    pub keywords: String,
    pub content: String,
    pub favicon_url: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub at: DateTime<Utc>,
}

fn embedding_to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn embedding_from_bytes(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

fn row_to_page(row: &rusqlite::Row) -> rusqlite::Result<Page> {
    let embedding_bytes: Option<Vec<u8>> = row.get("embedding")?;
    Ok(Page {
        id: row.get("id")?,
        url: row.get("url")?,
        title: row.get("title")?,
        description: row.get("description")?,
        keywords: row.get("keywords")?,
        content: row.get("content")?,
        favicon_url: row.get("favicon_url")?,
        embedding: embedding_bytes.and_then(|b| embedding_from_bytes(&b)),
        visit_count: row.get::<_, i64>("visit_count")? as u64,
        first_visited: row.get("first_visited")?,
        last_visited: row.get("last_visited")?,
        indexed_at: row.get("indexed_at")?,
        last_updated_at: row.get("last_updated_at")?,
        // Derived scores (C5) are not persisted; callers fill these in via
        // `crate::arc` once the row is loaded.
        access_frequency: 0.0,
        recency_score: 0.0,
        arc_score: 0.0,
    })
}

pub struct DocumentStore {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl DocumentStore {
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let writer_conn = Connection::open(path)?;
        Self::configure_connection(&writer_conn)?;
        super::migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(path)?;
        Self::configure_connection(&reader_conn)?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
        })
    }

    /// In-process store for tests: an ordinary `:memory:` database is
    /// private per-connection, so writer and reader instead share one
    /// named in-memory database via SQLite's shared-cache URI. Both
    /// connections must stay open for the database's lifetime, or SQLite
    /// drops it the moment the last handle closes.
    pub fn open_in_memory() -> Result<Self> {
        use rusqlite::OpenFlags;
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let uri = format!("file:webmem-in-memory-{n}?mode=memory&cache=shared");
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let writer_conn = Connection::open_with_flags(&uri, flags)?;
        Self::configure_connection(&writer_conn)?;
        super::migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open_with_flags(&uri, flags)?;
        Self::configure_connection(&reader_conn)?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
        })
    }

    fn writer(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| StoreError::Init("writer lock poisoned".into()))
    }

    fn reader(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| StoreError::Init("reader lock poisoned".into()))
    }

    /// Look up a page by its canonical URL.
    pub fn get_by_url(&self, url: &str) -> Result<Option<Page>> {
        let conn = self.reader()?;
        conn.query_row("SELECT * FROM pages WHERE url = ?1", params![url], row_to_page)
            .optional()
            .map_err(StoreError::from)
    }

    pub fn get_by_id(&self, id: PageId) -> Result<Option<Page>> {
        let conn = self.reader()?;
        conn.query_row("SELECT * FROM pages WHERE id = ?1", params![id], row_to_page)
            .optional()
            .map_err(StoreError::from)
    }

    /// Insert a brand-new page row and return its assigned id.
    pub fn insert(&self, fields: &PageUpsert) -> Result<PageId> {
        let conn = self.writer()?;
        let embedding_bytes = fields.embedding.as_deref().map(embedding_to_bytes);
        conn.execute(
            "INSERT INTO pages
                (url, title, description, keywords, content, favicon_url, embedding,
                 visit_count, first_visited, last_visited, indexed_at, last_updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?8, ?8, ?8)",
            params![
                fields.url,
                fields.title,
                fields.description,
                fields.keywords,
                fields.content,
                fields.favicon_url,
                embedding_bytes,
                fields.at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert a new page, or — if `url` already has a row — fall back to
    /// updating its content fields. The only write path the indexing
    /// pipeline uses: a unique-key race between two concurrent ingests of
    /// the same URL is resolved by whichever writer loses the race falling
    /// back to an update rather than erroring. Returns `(id, was_new)`.
    pub fn upsert_by_url(&self, fields: &PageUpsert) -> Result<(PageId, bool)> {
        match self.insert(fields) {
            Ok(id) => Ok((id, true)),
            Err(StoreError::Database(rusqlite::Error::SqliteFailure(e, _)))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                let existing = self
                    .get_by_url(&fields.url)?
                    .ok_or_else(|| StoreError::Init("upsert race: row vanished after unique-constraint conflict".into()))?;
                self.update_content(existing.id, fields)?;
                Ok((existing.id, false))
            }
            Err(e) => Err(e),
        }
    }

    /// Overwrite the enrichment/content fields of an existing page. Used on
    /// re-ingest and on background enrichment completion.
    pub fn update_content(&self, id: PageId, fields: &PageUpsert) -> Result<()> {
        let conn = self.writer()?;
        let embedding_bytes = fields.embedding.as_deref().map(embedding_to_bytes);
        let changed = conn.execute(
            "UPDATE pages SET
                title = ?2, description = ?3, keywords = ?4, content = ?5,
                favicon_url = ?6, embedding = ?7, last_updated_at = ?8
             WHERE id = ?1",
            params![
                id,
                fields.title,
                fields.description,
                fields.keywords,
                fields.content,
                fields.favicon_url,
                embedding_bytes,
                fields.at,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    /// Set only the embedding, leaving the rest of the row untouched. Used
    /// when a background enrichment call completes after the shell row was
    /// already persisted without one.
    pub fn set_embedding(&self, id: PageId, embedding: &[f32], at: DateTime<Utc>) -> Result<()> {
        let conn = self.writer()?;
        let bytes = embedding_to_bytes(embedding);
        let changed = conn.execute(
            "UPDATE pages SET embedding = ?2, last_updated_at = ?3 WHERE id = ?1",
            params![id, bytes, at],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    /// Record a visit: increments `visit_count` and bumps `last_visited`.
    pub fn record_visit(&self, id: PageId, at: DateTime<Utc>) -> Result<()> {
        let conn = self.writer()?;
        let changed = conn.execute(
            "UPDATE pages SET visit_count = visit_count + 1, last_visited = ?2 WHERE id = ?1",
            params![id, at],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    /// Halve every `visit_count` in a single pass (integer division),
    /// preserving relative order while keeping counters bounded.
    pub fn suppress_counts(&self) -> Result<()> {
        let conn = self.writer()?;
        conn.execute("UPDATE pages SET visit_count = visit_count / 2", [])?;
        Ok(())
    }

    pub fn delete(&self, id: PageId) -> Result<bool> {
        let conn = self.writer()?;
        let changed = conn.execute("DELETE FROM pages WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.reader()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM pages", [], |r| r.get(0))?;
        Ok(n as u64)
    }

    pub fn list(&self, limit: u32, offset: u32) -> Result<Vec<Page>> {
        let conn = self.reader()?;
        let mut stmt = conn
            .prepare("SELECT * FROM pages ORDER BY id DESC LIMIT ?1 OFFSET ?2")?;
        let rows = stmt
            .query_map(params![limit, offset], row_to_page)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every id currently stored, used to rebuild the in-memory vector index
    /// (C2) on process startup.
    pub fn all_embeddings(&self) -> Result<Vec<(PageId, Vec<f32>)>> {
        let conn = self.reader()?;
        let mut stmt =
            conn.prepare("SELECT id, embedding FROM pages WHERE embedding IS NOT NULL")?;
        let rows = stmt
            .query_map([], |row| {
                let id: PageId = row.get(0)?;
                let bytes: Vec<u8> = row.get(1)?;
                Ok((id, bytes))
            })?
            .filter_map(|r| r.ok())
            .filter_map(|(id, bytes)| embedding_from_bytes(&bytes).map(|v| (id, v)))
            .collect();
        Ok(rows)
    }

    /// Keyword search over the FTS5 index. Returns ids ranked by SQLite's
    /// `bm25()` (more negative is better; callers should normalize).
    pub fn full_text_search(&self, query: &str, limit: u32) -> Result<Vec<(PageId, f64)>> {
        let sanitized = sanitize_fts5_query(query);
        if sanitized.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT rowid, bm25(pages_fts) AS rank
             FROM pages_fts
             WHERE pages_fts MATCH ?1
             ORDER BY rank
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![sanitized, limit], |row| {
                let id: PageId = row.get(0)?;
                let rank: f64 = row.get(1)?;
                Ok((id, rank))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// Escape an FTS5 MATCH query: quote each token individually so punctuation
/// in the user's raw query can never be parsed as FTS5 query syntax.
pub fn sanitize_fts5_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|tok| format!("\"{}\"", tok.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upsert(url: &str, content: &str) -> PageUpsert {
        PageUpsert {
            url: url.to_string(),
            title: "Example Title".to_string(),
            description: "A description".to_string(),
            keywords: "example, keywords".to_string(),
            content: content.to_string(),
            favicon_url: None,
            embedding: Some(vec![0.1, 0.2, 0.3]),
            at: Utc::now(),
        }
    }

    #[test]
    fn insert_then_get_by_url_round_trips() {
        let store = DocumentStore::open_in_memory().unwrap();
        let id = store.insert(&upsert("https://a.example/page", "hello world")).unwrap();
        let page = store.get_by_url("https://a.example/page").unwrap().unwrap();
        assert_eq!(page.id, id);
        assert_eq!(page.title, "Example Title");
        assert_eq!(page.embedding.unwrap(), vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn duplicate_url_insert_violates_unique_constraint() {
        let store = DocumentStore::open_in_memory().unwrap();
        store.insert(&upsert("https://a.example/page", "one")).unwrap();
        let err = store.insert(&upsert("https://a.example/page", "two"));
        assert!(err.is_err());
    }

    #[test]
    fn upsert_by_url_inserts_when_absent_then_falls_back_to_update_on_conflict() {
        let store = DocumentStore::open_in_memory().unwrap();
        let (id, was_new) = store.upsert_by_url(&upsert("https://a.example/page", "one")).unwrap();
        assert!(was_new);

        let (second_id, was_new) = store.upsert_by_url(&upsert("https://a.example/page", "two")).unwrap();
        assert!(!was_new);
        assert_eq!(second_id, id);

        let page = store.get_by_id(id).unwrap().unwrap();
        assert_eq!(page.content, "two");
    }

    #[test]
    fn full_text_search_finds_matching_content() {
        let store = DocumentStore::open_in_memory().unwrap();
        store
            .insert(&upsert("https://a.example/rust", "rust programming language tutorial"))
            .unwrap();
        store
            .insert(&upsert("https://a.example/cooking", "pasta recipes and cooking tips"))
            .unwrap();

        let results = store.full_text_search("rust", 10).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn record_visit_increments_count_and_timestamp() {
        let store = DocumentStore::open_in_memory().unwrap();
        let id = store.insert(&upsert("https://a.example/page", "content")).unwrap();
        let t1 = Utc::now();
        store.record_visit(id, t1).unwrap();
        store.record_visit(id, t1 + chrono::Duration::seconds(5)).unwrap();

        let page = store.get_by_id(id).unwrap().unwrap();
        assert_eq!(page.visit_count, 2);
    }

    #[test]
    fn suppress_counts_halves_every_row() {
        let store = DocumentStore::open_in_memory().unwrap();
        let id = store.insert(&upsert("https://a.example/page", "content")).unwrap();
        for _ in 0..9 {
            store.record_visit(id, Utc::now()).unwrap();
        }
        store.suppress_counts().unwrap();
        let page = store.get_by_id(id).unwrap().unwrap();
        assert_eq!(page.visit_count, 4);
    }

    #[test]
    fn delete_is_idempotent() {
        let store = DocumentStore::open_in_memory().unwrap();
        let id = store.insert(&upsert("https://a.example/page", "content")).unwrap();
        assert!(store.delete(id).unwrap());
        assert!(!store.delete(id).unwrap());
    }

    #[test]
    fn sanitize_prevents_fts5_syntax_injection() {
        let sanitized = sanitize_fts5_query("rust OR \"drop table\"");
        assert_eq!(sanitized, "\"rust\" \"OR\" \"\"\"drop\" \"table\"\"\"");
    }
}
