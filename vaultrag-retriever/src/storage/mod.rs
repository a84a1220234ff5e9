//! Vector store abstraction shared by the indexer and the retrieval engine.
//!
//! The chunk metadata schema is the contract between the write path and the
//! read path. Values are primitives only: strings, integers, floats and
//! booleans. Collections are flattened before they reach the store.
//!
//! ## Architecture
//!
//! ```text
//! Indexer ── upsert/delete ──┐
//!                            ├─ VectorStore ── SqliteVectorStore (brute-force cosine)
//! RetrievalEngine ── query ──┘
//! ```

use crate::error::Result;
use async_trait::async_trait;
use half::f16;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

pub mod sqlite_store;

pub use sqlite_store::SqliteVectorStore;

/// A primitive metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl std::fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Int(i) => write!(f, "{i}"),
            MetadataValue::Float(x) => write!(f, "{x}"),
            MetadataValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Str(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Str(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Int(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

/// Flat key/value metadata attached to one stored chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkMetadata(BTreeMap<String, MetadataValue>);

impl ChunkMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<K: Into<String>, V: Into<MetadataValue>>(&mut self, key: K, value: V) {
        self.0.insert(key.into(), value.into());
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(MetadataValue::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(MetadataValue::as_i64)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetadataValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A chunk ready to be written.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: String,
    pub vector: Vec<f16>,
    /// The embedded passage text.
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// A chunk returned from a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredChunk {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    /// Cosine similarity to the query, higher is closer.
    pub score: f32,
}

/// Inclusive numeric bounds on one metadata field. A missing bound leaves
/// that side open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeFilter {
    pub field: String,
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl RangeFilter {
    pub fn new<S: Into<String>>(field: S, min: Option<i64>, max: Option<i64>) -> Self {
        Self {
            field: field.into(),
            min,
            max,
        }
    }

    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        let Some(value) = metadata.get_i64(&self.field) else {
            return false;
        };
        self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value <= max)
    }
}

/// Storage and similarity search for embedded chunks.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Inserts or replaces records by id.
    async fn upsert(&self, records: Vec<ChunkRecord>) -> Result<()>;

    /// Deletes records by id. Unknown ids are ignored.
    async fn delete(&self, ids: &[String]) -> Result<()>;

    /// Embeds `text` and returns up to `k` records ranked by similarity,
    /// restricted to records that satisfy `filter`.
    async fn query_by_text(
        &self,
        text: &str,
        k: usize,
        filter: Option<&RangeFilter>,
    ) -> Result<Vec<StoredChunk>>;

    /// Number of stored records.
    async fn count(&self) -> Result<usize>;
}

/// Opens the index database with WAL journaling, creating it (and its
/// directory) when missing.
pub async fn open_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(
            SqliteConnectOptions::new()
                .filename(db_path)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
                .busy_timeout(Duration::from_secs(5))
                .create_if_missing(true),
        )
        .await?;
    Ok(pool)
}

/// A single-connection in-memory database, so every query sees the same data.
pub async fn open_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_serializes_flat() {
        let mut metadata = ChunkMetadata::new();
        metadata.insert("source", "daily/a.md");
        metadata.insert("chunk_index", 2i64);
        metadata.insert("draft", false);

        let json = serde_json::to_string(&metadata).unwrap();
        assert_eq!(
            json,
            r#"{"chunk_index":2,"draft":false,"source":"daily/a.md"}"#
        );
        let back: ChunkMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get_i64("chunk_index"), Some(2));
        assert_eq!(back.get_str("source"), Some("daily/a.md"));
        assert_eq!(back.get("draft"), Some(&MetadataValue::Bool(false)));
    }

    #[test]
    fn test_range_filter_open_ends() {
        let mut metadata = ChunkMetadata::new();
        metadata.insert("entry_date_ts", 100i64);

        assert!(RangeFilter::new("entry_date_ts", Some(100), Some(100)).matches(&metadata));
        assert!(RangeFilter::new("entry_date_ts", None, Some(150)).matches(&metadata));
        assert!(RangeFilter::new("entry_date_ts", Some(50), None).matches(&metadata));
        assert!(!RangeFilter::new("entry_date_ts", Some(101), None).matches(&metadata));
        assert!(!RangeFilter::new("missing", None, None).matches(&metadata));
    }
}
