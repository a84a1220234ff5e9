use super::document_loader::Document;
use crate::storage::{ChunkMetadata, MetadataValue};
use chrono_tz::Tz;
use serde_json::Value;
use std::collections::BTreeMap;
use vaultrag_context::{ChunkingConfig, NoteChunker, TextChunk};

/// Keys written by the indexer itself; front matter never overrides them.
const RESERVED_KEYS: [&str; 7] = [
    "source",
    "title",
    "entry_date",
    "entry_date_ts",
    "entities",
    "chunk_index",
    "id",
];

/// Stable id of a note's `chunk_index`-th chunk.
pub fn chunk_id(source: &str, chunk_index: usize) -> String {
    blake3::hash(format!("{source}::{chunk_index}").as_bytes())
        .to_hex()
        .to_string()
}

/// Ids of chunks `0..count` of `source`.
pub fn chunk_ids(source: &str, count: usize) -> Vec<String> {
    (0..count).map(|i| chunk_id(source, i)).collect()
}

/// Turns vault documents into chunks and chunks into store metadata.
#[derive(Debug, Clone)]
pub struct ChunkingStrategy {
    config: ChunkingConfig,
    timezone: Tz,
}

impl ChunkingStrategy {
    pub fn new(config: ChunkingConfig) -> Self {
        Self {
            config,
            timezone: Tz::UTC,
        }
    }

    /// Zone used to turn a note's modification time into its fallback date.
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Chunks a note. Undated sections fall back to the note's modification day.
    pub fn chunk_document(&self, doc: &Document) -> Vec<TextChunk> {
        let chunks = NoteChunker::new(doc.path.clone(), doc.title.clone(), self.config)
            .with_fallback_date(doc.modified_date(self.timezone))
            .get_chunks(&doc.text);

        tracing::debug!(
            "Chunked {} into {} chunks (target size: {})",
            doc.path,
            chunks.len(),
            self.config.chunk_size
        );
        chunks
    }
}

/// Flattens front matter to primitive values: lists join with `", "`, maps
/// become JSON strings, nulls are dropped.
pub fn sanitize_front_matter(front_matter: &BTreeMap<String, Value>) -> ChunkMetadata {
    let mut metadata = ChunkMetadata::new();
    for (key, value) in front_matter {
        if RESERVED_KEYS.contains(&key.as_str()) {
            continue;
        }
        if let Some(value) = primitive(value) {
            metadata.insert(key.clone(), value);
        }
    }
    metadata
}

fn primitive(value: &Value) -> Option<MetadataValue> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(MetadataValue::Bool(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(MetadataValue::Int)
            .or_else(|| n.as_f64().map(MetadataValue::Float)),
        Value::String(s) => Some(MetadataValue::Str(s.clone())),
        Value::Array(items) => Some(MetadataValue::Str(
            items
                .iter()
                .filter(|v| !v.is_null())
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(", "),
        )),
        Value::Object(_) => Some(MetadataValue::Str(value.to_string())),
    }
}

/// Store metadata for one chunk: the note's sanitised front matter plus the
/// chunk's own fields.
pub fn chunk_metadata(chunk: &TextChunk, front_matter: &ChunkMetadata) -> ChunkMetadata {
    let mut metadata = front_matter.clone();
    metadata.insert("source", chunk.source.clone());
    metadata.insert("title", chunk.title.clone());
    if let Some(date) = chunk.entry_date {
        metadata.insert("entry_date", date.format("%Y-%m-%d").to_string());
    }
    if let Some(ts) = chunk.entry_date_ts() {
        metadata.insert("entry_date_ts", ts);
    }
    metadata.insert("entities", chunk.entities.join("; "));
    metadata.insert("chunk_index", chunk.chunk_index as i64);
    metadata.insert("id", chunk_id(&chunk.source, chunk.chunk_index));
    metadata
}
