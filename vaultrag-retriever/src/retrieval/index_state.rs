//! Durable per-note change fingerprints for incremental indexing.
//!
//! ```sql
//! CREATE TABLE index_state (
//!     path TEXT PRIMARY KEY,        -- vault-relative, '/'-separated
//!     mtime_ms INTEGER NOT NULL,    -- modification time at last index, or -1 while dirty
//!     chunk_count INTEGER NOT NULL, -- chunks written for the note
//!     indexed_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
//! );
//! ```
//!
//! An entry must describe what is actually in the vector store. The indexer
//! therefore calls [`IndexState::mark_dirty`] before touching a note's chunks
//! and [`IndexState::commit`] only after the upsert succeeded. A crash in
//! between leaves the entry dirty, which the next scan treats as changed.

use crate::error::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

/// Stored mtime of an entry whose chunks are being rewritten.
pub const DIRTY_MTIME: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStateEntry {
    pub path: String,
    pub mtime_ms: i64,
    pub chunk_count: usize,
    pub indexed_at: Option<String>,
}

impl IndexStateEntry {
    pub fn is_dirty(&self) -> bool {
        self.mtime_ms == DIRTY_MTIME
    }
}

/// Result of comparing the live file set against stored state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateDiff {
    /// New notes and notes whose modification time changed, sorted.
    pub to_index: Vec<String>,
    /// Tracked notes that no longer exist, sorted.
    pub to_remove: Vec<String>,
}

impl StateDiff {
    pub fn is_empty(&self) -> bool {
        self.to_index.is_empty() && self.to_remove.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct IndexState {
    pool: SqlitePool,
}

impl IndexState {
    /// Uses an open pool, creating the table if needed.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        Self::create_tables(&pool).await?;
        Ok(Self { pool })
    }

    async fn create_tables(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS index_state (
                path TEXT PRIMARY KEY,
                mtime_ms INTEGER NOT NULL,
                chunk_count INTEGER NOT NULL,
                indexed_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Compares `current` (path to mtime in ms) with the stored entries.
    pub async fn diff(&self, current: &BTreeMap<String, i64>) -> Result<StateDiff> {
        let stored: BTreeMap<String, i64> = self
            .entries()
            .await?
            .into_iter()
            .map(|e| (e.path, e.mtime_ms))
            .collect();

        let to_index = current
            .iter()
            .filter(|(path, mtime)| stored.get(*path) != Some(*mtime))
            .map(|(path, _)| path.clone())
            .collect();
        let to_remove = stored
            .keys()
            .filter(|path| !current.contains_key(*path))
            .cloned()
            .collect();

        Ok(StateDiff {
            to_index,
            to_remove,
        })
    }

    /// Records a successful index of `path`. Call only after its chunks are
    /// in the store.
    pub async fn commit(&self, path: &str, mtime_ms: i64, chunk_count: usize) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO index_state (path, mtime_ms, chunk_count, indexed_at)
            VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)
            ON CONFLICT(path) DO UPDATE SET
                mtime_ms = excluded.mtime_ms,
                chunk_count = excluded.chunk_count,
                indexed_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(path)
        .bind(mtime_ms)
        .bind(chunk_count as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Invalidates the stored mtime before a note's chunks are rewritten.
    ///
    /// The chunk count becomes the larger of the stored one and
    /// `pending_chunks`, so every id that may exist after an interrupted
    /// rewrite can still be purged.
    pub async fn mark_dirty(&self, path: &str, pending_chunks: usize) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO index_state (path, mtime_ms, chunk_count, indexed_at)
            VALUES (?1, ?2, ?3, NULL)
            ON CONFLICT(path) DO UPDATE SET
                mtime_ms = excluded.mtime_ms,
                chunk_count = MAX(index_state.chunk_count, excluded.chunk_count)
            "#,
        )
        .bind(path)
        .bind(DIRTY_MTIME)
        .bind(pending_chunks as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, path: &str) -> Result<Option<IndexStateEntry>> {
        let row = sqlx::query(
            "SELECT path, mtime_ms, chunk_count, CAST(indexed_at AS TEXT) AS indexed_at FROM index_state WHERE path = ?1",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| Self::entry_from_row(&row)))
    }

    /// Forgets `path`. Call only after its chunks were purged.
    pub async fn remove(&self, path: &str) -> Result<()> {
        sqlx::query("DELETE FROM index_state WHERE path = ?1")
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// All entries, sorted by path.
    pub async fn entries(&self) -> Result<Vec<IndexStateEntry>> {
        let rows = sqlx::query(
            "SELECT path, mtime_ms, chunk_count, CAST(indexed_at AS TEXT) AS indexed_at FROM index_state ORDER BY path",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(Self::entry_from_row).collect())
    }

    fn entry_from_row(row: &sqlx::sqlite::SqliteRow) -> IndexStateEntry {
        let chunk_count: i64 = row.get("chunk_count");
        IndexStateEntry {
            path: row.get("path"),
            mtime_ms: row.get("mtime_ms"),
            chunk_count: chunk_count.max(0) as usize,
            indexed_at: row.get("indexed_at"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{open_memory_pool, open_pool};
    use tempfile::TempDir;

    async fn state() -> IndexState {
        IndexState::new(open_memory_pool().await.unwrap()).await.unwrap()
    }

    fn files(entries: &[(&str, i64)]) -> BTreeMap<String, i64> {
        entries.iter().map(|(p, m)| (p.to_string(), *m)).collect()
    }

    #[tokio::test]
    async fn test_diff_new_changed_removed() -> anyhow::Result<()> {
        let state = state().await;
        let current = files(&[("a.md", 10), ("b.md", 20)]);

        let diff = state.diff(&current).await?;
        assert_eq!(diff.to_index, vec!["a.md", "b.md"]);
        assert!(diff.to_remove.is_empty());

        state.commit("a.md", 10, 2).await?;
        state.commit("b.md", 20, 1).await?;
        assert!(state.diff(&current).await?.is_empty());

        let touched = files(&[("a.md", 10), ("b.md", 25)]);
        let diff = state.diff(&touched).await?;
        assert_eq!(diff.to_index, vec!["b.md"]);
        assert!(diff.to_remove.is_empty());

        let shrunk = files(&[("b.md", 20)]);
        let diff = state.diff(&shrunk).await?;
        assert!(diff.to_index.is_empty());
        assert_eq!(diff.to_remove, vec!["a.md"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_older_mtime_still_counts_as_changed() -> anyhow::Result<()> {
        let state = state().await;
        state.commit("a.md", 500, 1).await?;
        let diff = state.diff(&files(&[("a.md", 400)])).await?;
        assert_eq!(diff.to_index, vec!["a.md"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_mark_dirty_keeps_largest_chunk_count() -> anyhow::Result<()> {
        let state = state().await;
        state.commit("a.md", 10, 5).await?;

        state.mark_dirty("a.md", 2).await?;
        let entry = state.get("a.md").await?.unwrap();
        assert!(entry.is_dirty());
        assert_eq!(entry.chunk_count, 5);

        // An interrupted rewrite is picked up by the next scan.
        let diff = state.diff(&files(&[("a.md", 10)])).await?;
        assert_eq!(diff.to_index, vec!["a.md"]);

        state.commit("a.md", 11, 2).await?;
        let entry = state.get("a.md").await?.unwrap();
        assert!(!entry.is_dirty());
        assert_eq!(entry.chunk_count, 2);

        state.mark_dirty("new.md", 3).await?;
        assert_eq!(state.get("new.md").await?.unwrap().chunk_count, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_remove_and_entries() -> anyhow::Result<()> {
        let state = state().await;
        state.commit("b.md", 2, 1).await?;
        state.commit("a.md", 1, 1).await?;

        let paths: Vec<String> = state.entries().await?.into_iter().map(|e| e.path).collect();
        assert_eq!(paths, vec!["a.md", "b.md"]);
        assert!(state.get("a.md").await?.unwrap().indexed_at.is_some());

        state.remove("a.md").await?;
        assert!(state.get("a.md").await?.is_none());
        assert_eq!(state.entries().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_state_survives_reopen() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let db = dir.path().join("index").join("vaultrag.db");

        {
            let state = IndexState::new(open_pool(&db).await?).await?;
            state.commit("daily/2025-01-01.md", 1234, 3).await?;
        }

        let state = IndexState::new(open_pool(&db).await?).await?;
        let entry = state.get("daily/2025-01-01.md").await?.unwrap();
        assert_eq!(entry.mtime_ms, 1234);
        assert_eq!(entry.chunk_count, 3);
        Ok(())
    }
}
