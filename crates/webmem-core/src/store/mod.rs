//! Document store (C1): durable page storage plus the FTS5 keyword index.

mod migrations;
mod sqlite;

pub use sqlite::{sanitize_fts5_query, DocumentStore, PageUpsert, StoreError};
