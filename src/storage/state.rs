//! Per-collection SQLite state: the IndexerState hash map, the embedding
//! cache and a small key/value meta table. A separate global registry tracks
//! known collections.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StateError>;

/// One IndexerState row: what we knew about a file after its last index.
#[derive(Debug, Clone, PartialEq)]
pub struct FileState {
    pub source_path: String,
    pub content_hash: String,
    pub last_indexed_at: i64,
    pub entity_ids: Vec<String>,
}

/// Per-collection state database. Single writer — the indexer controller.
#[derive(Clone)]
pub struct StateDb {
    pool: SqlitePool,
}

impl StateDb {
    /// Open (or create) the state database at the given path.
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS indexer_state (
                source_path     TEXT PRIMARY KEY,
                content_hash    TEXT NOT NULL,
                last_indexed_at INTEGER NOT NULL,
                entity_ids      TEXT NOT NULL DEFAULT '[]'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS embedding_cache (
                cache_key  TEXT PRIMARY KEY,
                vector     BLOB NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS meta (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // -- IndexerState ------------------------------------------------------

    /// All known file hashes, for the scanner's skip-unchanged fast path.
    pub async fn all_file_states(&self) -> Result<Vec<FileState>> {
        let rows = sqlx::query(
            "SELECT source_path, content_hash, last_indexed_at, entity_ids FROM indexer_state",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_file_state).collect()
    }

    pub async fn file_state(&self, source_path: &str) -> Result<Option<FileState>> {
        let row = sqlx::query(
            "SELECT source_path, content_hash, last_indexed_at, entity_ids FROM indexer_state WHERE source_path = ?",
        )
        .bind(source_path)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_file_state).transpose()
    }

    /// True when the stored hash differs (or the file is unknown).
    pub async fn needs_reindex(&self, source_path: &str, content_hash: &str) -> Result<bool> {
        Ok(self
            .file_state(source_path)
            .await?
            .map(|s| s.content_hash != content_hash)
            .unwrap_or(true))
    }

    /// Record a fully committed file batch. Called only after the vector
    /// store and BM25 writes succeeded, so cancellation never leaves a
    /// half-recorded file.
    pub async fn record_file(&self, state: &FileState) -> Result<()> {
        let ids_json = serde_json::to_string(&state.entity_ids)?;
        sqlx::query(
            r#"
            INSERT INTO indexer_state (source_path, content_hash, last_indexed_at, entity_ids)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(source_path) DO UPDATE SET
                content_hash = excluded.content_hash,
                last_indexed_at = excluded.last_indexed_at,
                entity_ids = excluded.entity_ids
            "#,
        )
        .bind(&state.source_path)
        .bind(&state.content_hash)
        .bind(state.last_indexed_at)
        .bind(ids_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Forget a file; returns the entity ids that must be deleted from the
    /// vector store and BM25 index.
    pub async fn remove_file(&self, source_path: &str) -> Result<Vec<String>> {
        let ids = self
            .file_state(source_path)
            .await?
            .map(|s| s.entity_ids)
            .unwrap_or_default();
        sqlx::query("DELETE FROM indexer_state WHERE source_path = ?")
            .bind(source_path)
            .execute(&self.pool)
            .await?;
        Ok(ids)
    }

    /// Drop the whole IndexerState (full rebuild with `--clear`).
    pub async fn clear_files(&self) -> Result<()> {
        sqlx::query("DELETE FROM indexer_state")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // -- Embedding cache ---------------------------------------------------

    pub async fn cached_embeddings(
        &self,
        keys: &[String],
    ) -> Result<std::collections::HashMap<String, Vec<f32>>> {
        let mut out = std::collections::HashMap::new();
        // Chunked to stay within the SQLite bind limit.
        for chunk in keys.chunks(100) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!(
                "SELECT cache_key, vector FROM embedding_cache WHERE cache_key IN ({})",
                placeholders
            );
            let mut query = sqlx::query(&sql);
            for key in chunk {
                query = query.bind(key);
            }
            let rows = query.fetch_all(&self.pool).await?;
            for row in rows {
                let key: String = row.get("cache_key");
                let blob: Vec<u8> = row.get("vector");
                out.insert(key, decode_vector(&blob));
            }
        }
        Ok(out)
    }

    pub async fn store_embeddings(&self, entries: &[(String, Vec<f32>)]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        for (key, vector) in entries {
            sqlx::query(
                "INSERT OR REPLACE INTO embedding_cache (cache_key, vector, created_at) VALUES (?, ?, ?)",
            )
            .bind(key)
            .bind(encode_vector(vector))
            .bind(now)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Evict cache entries older than `max_age_days`.
    pub async fn evict_embedding_cache(&self, max_age_days: i64) -> Result<u64> {
        let cutoff = chrono::Utc::now().timestamp() - max_age_days * 24 * 3600;
        let result = sqlx::query("DELETE FROM embedding_cache WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // -- Meta kv -----------------------------------------------------------

    pub async fn meta(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("value")))
    }

    pub async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn row_to_file_state(row: sqlx::sqlite::SqliteRow) -> Result<FileState> {
    let ids_json: String = row.get("entity_ids");
    Ok(FileState {
        source_path: row.get("source_path"),
        content_hash: row.get("content_hash"),
        last_indexed_at: row.get("last_indexed_at"),
        entity_ids: serde_json::from_str(&ids_json)?,
    })
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

fn decode_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_db() -> (StateDb, TempDir) {
        let tmp = TempDir::new().unwrap();
        let db = StateDb::open(&tmp.path().join("state.db")).await.unwrap();
        (db, tmp)
    }

    fn state(path: &str, hash: &str, ids: &[&str]) -> FileState {
        FileState {
            source_path: path.into(),
            content_hash: hash.into(),
            last_indexed_at: 1700000000,
            entity_ids: ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_record_and_lookup() {
        let (db, _tmp) = open_db().await;
        db.record_file(&state("src/a.py", "h1", &["e1", "e2"])).await.unwrap();

        let found = db.file_state("src/a.py").await.unwrap().unwrap();
        assert_eq!(found.content_hash, "h1");
        assert_eq!(found.entity_ids, vec!["e1", "e2"]);
        assert!(db.file_state("src/missing.py").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_needs_reindex() {
        let (db, _tmp) = open_db().await;
        assert!(db.needs_reindex("src/a.py", "h1").await.unwrap());
        db.record_file(&state("src/a.py", "h1", &[])).await.unwrap();
        assert!(!db.needs_reindex("src/a.py", "h1").await.unwrap());
        assert!(db.needs_reindex("src/a.py", "h2").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_file_returns_entity_ids() {
        let (db, _tmp) = open_db().await;
        db.record_file(&state("src/a.py", "h1", &["e1"])).await.unwrap();
        let ids = db.remove_file("src/a.py").await.unwrap();
        assert_eq!(ids, vec!["e1"]);
        assert!(db.file_state("src/a.py").await.unwrap().is_none());
        // removing an unknown file is a no-op
        assert!(db.remove_file("src/a.py").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_index_delete_reindex_round_trip() {
        let (db, _tmp) = open_db().await;
        let original = state("src/a.py", "h1", &["e1", "e2"]);
        db.record_file(&original).await.unwrap();
        db.remove_file("src/a.py").await.unwrap();
        db.record_file(&original).await.unwrap();
        let found = db.file_state("src/a.py").await.unwrap().unwrap();
        assert_eq!(found, original);
    }

    #[tokio::test]
    async fn test_embedding_cache_round_trip() {
        let (db, _tmp) = open_db().await;
        let vector = vec![0.25f32, -1.5, 3.0];
        db.store_embeddings(&[("fastembed:m:abc".into(), vector.clone())])
            .await
            .unwrap();
        let cached = db
            .cached_embeddings(&["fastembed:m:abc".into(), "missing".into()])
            .await
            .unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached["fastembed:m:abc"], vector);
    }

    #[tokio::test]
    async fn test_meta_kv() {
        let (db, _tmp) = open_db().await;
        assert!(db.meta("k").await.unwrap().is_none());
        db.set_meta("k", "v1").await.unwrap();
        db.set_meta("k", "v2").await.unwrap();
        assert_eq!(db.meta("k").await.unwrap().unwrap(), "v2");
    }

    #[test]
    fn test_vector_codec() {
        let vector = vec![1.0f32, -0.5, 0.0, f32::MAX];
        assert_eq!(decode_vector(&encode_vector(&vector)), vector);
    }
}
