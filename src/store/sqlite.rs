//! SQLite-backed [`ContentStore`].
//!
//! One `chunks` table holds the text and flattened metadata of every chunk.
//! The primary key on `id` rejects duplicate inserts, and batches run in a
//! single transaction so a failed batch leaves nothing behind.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use crate::models::{ChunkMetadata, ChunkRecord, StoredChunk};

use super::{ContentStore, StorePage};

const COLUMNS: &str =
    "id, text, source, source_path, chunk_index, total_chunks, content_hash, indexed_at";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path` and run migrations.
    pub async fn connect(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create store directory: {}", parent.display())
                })?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open store: {}", path.display()))?;

        Self::from_pool(pool).await
    }

    /// A private in-memory database (single connection).
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                source TEXT NOT NULL,
                source_path TEXT NOT NULL DEFAULT '',
                chunk_index INTEGER NOT NULL,
                total_chunks INTEGER NOT NULL,
                content_hash TEXT NOT NULL DEFAULT '',
                indexed_at TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source)")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }
}

fn metadata_from_row(row: &SqliteRow) -> ChunkMetadata {
    let chunk_index: i64 = row.get("chunk_index");
    let total_chunks: i64 = row.get("total_chunks");
    ChunkMetadata {
        source: row.get("source"),
        source_path: row.get("source_path"),
        chunk_index: chunk_index.max(0) as usize,
        total_chunks: total_chunks.max(0) as usize,
        content_hash: row.get("content_hash"),
        indexed_at: row.get("indexed_at"),
    }
}

fn chunk_from_row(row: &SqliteRow) -> StoredChunk {
    StoredChunk {
        id: row.get("id"),
        text: Some(row.get("text")),
        metadata: Some(metadata_from_row(row)),
    }
}

#[async_trait]
impl ContentStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn query_by_source(&self, source: &str, limit: usize) -> Result<Vec<StoredChunk>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM chunks WHERE source = ? ORDER BY chunk_index ASC LIMIT ?",
            COLUMNS
        ))
        .bind(source)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(chunk_from_row).collect())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<StoredChunk>> {
        let row = sqlx::query(&format!("SELECT {} FROM chunks WHERE id = ?", COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(chunk_from_row))
    }

    async fn insert_batch(&self, records: &[ChunkRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for record in records {
            let meta = &record.metadata;
            sqlx::query(&format!(
                "INSERT INTO chunks ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                COLUMNS
            ))
            .bind(&record.id)
            .bind(&record.text)
            .bind(&meta.source)
            .bind(&meta.source_path)
            .bind(meta.chunk_index as i64)
            .bind(meta.total_chunks as i64)
            .bind(&meta.content_hash)
            .bind(&meta.indexed_at)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert chunk {}", record.id))?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for id in ids {
            sqlx::query("DELETE FROM chunks WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_page(&self, limit: usize, offset: usize) -> Result<StorePage> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM chunks ORDER BY id ASC LIMIT ? OFFSET ?",
            COLUMNS
        ))
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut page = StorePage::default();
        for row in &rows {
            page.ids.push(row.get("id"));
            page.metadatas.push(Some(metadata_from_row(row)));
        }
        Ok(page)
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chunk_id;
    use tempfile::TempDir;

    fn record(source: &str, index: usize) -> ChunkRecord {
        ChunkRecord {
            id: chunk_id(source, index),
            text: format!("{} chunk {}", source, index),
            metadata: ChunkMetadata {
                source: source.to_string(),
                source_path: format!("/data/{}", source),
                chunk_index: index,
                total_chunks: 3,
                content_hash: "abc".to_string(),
                indexed_at: "2024-06-10T16:00:00Z".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn roundtrip_on_disk() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("db").join("chunks.sqlite");
        let store = SqliteStore::connect(&path).await.unwrap();

        store
            .insert_batch(&[record("a.pdf", 0), record("a.pdf", 1), record("b.md", 0)])
            .await
            .unwrap();

        let hits = store.query_by_source("a.pdf", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].metadata.as_ref().unwrap().chunk_index, 0);

        let one = store.get_by_id("b.md_0").await.unwrap().unwrap();
        assert_eq!(one.text.as_deref(), Some("b.md chunk 0"));
        assert_eq!(one.metadata.unwrap().source_path, "/data/b.md");
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn failed_batch_is_rolled_back() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_batch(&[record("a.pdf", 0)]).await.unwrap();

        let err = store
            .insert_batch(&[record("a.pdf", 1), record("a.pdf", 0)])
            .await;
        assert!(err.is_err());
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store.get_by_id("a.pdf_1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_and_delete() {
        let store = SqliteStore::in_memory().await.unwrap();
        let records: Vec<_> = (0..3).map(|i| record("c.txt", i)).collect();
        store.insert_batch(&records).await.unwrap();

        let page = store.list_page(2, 0).await.unwrap();
        assert_eq!(page.ids, vec!["c.txt_0", "c.txt_1"]);
        assert_eq!(store.list_page(2, 2).await.unwrap().len(), 1);

        store
            .delete_by_ids(&["c.txt_0".to_string(), "c.txt_2".to_string()])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
