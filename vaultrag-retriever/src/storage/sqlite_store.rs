//! SQLite-backed [`VectorStore`].
//!
//! Records live in one table with the metadata as a JSON object and the
//! embedding as a little-endian f16 blob. Similarity search is brute force:
//! candidate rows are narrowed in SQL by the range filter, then scored with
//! in-memory cosine similarity.
//!
//! ```sql
//! CREATE TABLE chunks (
//!     id TEXT PRIMARY KEY,          -- blake3 hex of "{source}::{chunk_index}"
//!     source TEXT,                  -- denormalized for per-note lookups
//!     text TEXT NOT NULL,           -- the embedded passage
//!     metadata TEXT NOT NULL,       -- flat JSON object
//!     embedding BLOB NOT NULL,      -- f16 vector
//!     updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
//! );
//! ```

use super::{ChunkMetadata, ChunkRecord, RangeFilter, StoredChunk, VectorStore};
use crate::error::{Result, RetrieverError};
use async_trait::async_trait;
use half::f16;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::sync::Arc;
use vaultrag_models::EmbeddingProvider;

const DELETE_BATCH: usize = 256;

/// Brute-force cosine similarity over a SQLite table.
pub struct SqliteVectorStore {
    pool: SqlitePool,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl SqliteVectorStore {
    /// Wraps an open pool, creating the table if needed. Queries are embedded
    /// with `embedder`, which must match the one used for indexing.
    pub async fn new(pool: SqlitePool, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        Self::create_tables(&pool).await?;
        Ok(Self { pool, embedder })
    }

    async fn create_tables(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                source TEXT,
                text TEXT NOT NULL,
                metadata TEXT NOT NULL,
                embedding BLOB NOT NULL,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source)")
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Ids of every record stored for `source`.
    pub async fn ids_for_source(&self, source: &str) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT id FROM chunks WHERE source = ?1 ORDER BY id",
        )
        .bind(source)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn candidates(&self, filter: Option<&RangeFilter>) -> Result<Vec<sqlx::sqlite::SqliteRow>> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id, text, metadata, embedding FROM chunks WHERE 1 = 1");

        if let Some(filter) = filter {
            let path = format!("$.\"{}\"", filter.field.replace('"', ""));
            if let Some(min) = filter.min {
                query
                    .push(" AND json_extract(metadata, ")
                    .push_bind(path.clone())
                    .push(") >= ")
                    .push_bind(min);
            }
            if let Some(max) = filter.max {
                query
                    .push(" AND json_extract(metadata, ")
                    .push_bind(path.clone())
                    .push(") <= ")
                    .push_bind(max);
            }
            query
                .push(" AND json_extract(metadata, ")
                .push_bind(path)
                .push(") IS NOT NULL");
        }

        Ok(query.build().fetch_all(&self.pool).await?)
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, records: Vec<ChunkRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for record in &records {
            let metadata = serde_json::to_string(&record.metadata)
                .map_err(|e| RetrieverError::Io(std::io::Error::other(e)))?;
            let embedding_bytes = encode_embedding(&record.vector);

            sqlx::query(
                r#"
                INSERT INTO chunks (id, source, text, metadata, embedding, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, CURRENT_TIMESTAMP)
                ON CONFLICT(id) DO UPDATE SET
                    source = excluded.source,
                    text = excluded.text,
                    metadata = excluded.metadata,
                    embedding = excluded.embedding,
                    updated_at = CURRENT_TIMESTAMP
                "#,
            )
            .bind(&record.id)
            .bind(record.metadata.get_str("source"))
            .bind(&record.text)
            .bind(metadata)
            .bind(embedding_bytes)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::debug!("Upserted {} chunk records", records.len());
        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        for batch in ids.chunks(DELETE_BATCH) {
            let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("DELETE FROM chunks WHERE id IN (");
            let mut separated = query.separated(", ");
            for id in batch {
                separated.push_bind(id);
            }
            separated.push_unseparated(")");
            query.build().execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn query_by_text(
        &self,
        text: &str,
        k: usize,
        filter: Option<&RangeFilter>,
    ) -> Result<Vec<StoredChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let rows = self.candidates(filter).await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let query = self.embedder.embed_text(text).await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let metadata_json: String = row.get("metadata");
            let metadata: ChunkMetadata = match serde_json::from_str(&metadata_json) {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::warn!("Skipping chunk {id} with unreadable metadata: {e}");
                    continue;
                }
            };
            let embedding = decode_embedding(&row.get::<Vec<u8>, _>("embedding"));
            scored.push(StoredChunk {
                score: cosine_similarity(&query, &embedding),
                id,
                text: row.get("text"),
                metadata,
            });
        }

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}

/// Embeddings are stored as little-endian f16 regardless of the host.
fn encode_embedding(vector: &[f16]) -> Vec<u8> {
    let bits: Vec<u16> = vector.iter().map(|v| v.to_bits().to_le()).collect();
    bytemuck::cast_slice(&bits).to_vec()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f16> {
    bytes
        .chunks_exact(2)
        .map(|pair| f16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Cosine similarity in f32. Mismatched lengths and zero vectors score 0.
pub fn cosine_similarity(a: &[f16], b: &[f16]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot_product = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b) {
        let x = x.to_f32();
        let y = y.to_f32();
        dot_product += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let norm_a = norm_a.sqrt();
    let norm_b = norm_b.sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}
