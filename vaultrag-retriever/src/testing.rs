//! Deterministic stand-ins for the model services and the vector store, so
//! indexing and retrieval can be exercised without a network.

use crate::error::Result;
use crate::storage::sqlite_store::cosine_similarity;
use crate::storage::{ChunkRecord, RangeFilter, StoredChunk, VectorStore};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vaultrag_models::{
    EmbeddingProvider, EmbeddingResult, EntityClassifier, GenerationService, ModelError,
};

/// Bag-of-words embedder: every lowercase word is hashed into one of
/// `dimension` buckets.
#[derive(Debug)]
pub struct HashEmbedder {
    dimension: usize,
    calls: AtomicUsize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `embed_texts` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            let hash = blake3::hash(word.as_bytes());
            let bucket = u64::from_le_bytes(
                hash.as_bytes()[..8]
                    .try_into()
                    .unwrap_or([0; 8]),
            ) as usize
                % self.dimension;
            vector[bucket] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed_texts(&self, texts: &[String]) -> vaultrag_models::Result<EmbeddingResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(EmbeddingResult::from_f32(
            texts.iter().map(|t| self.embed_one(t)).collect(),
        ))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "hash"
    }
}

/// Classifier returning the same entities for every text, or failing.
#[derive(Debug, Clone, Default)]
pub struct FixedClassifier {
    entities: Vec<String>,
    fail: bool,
}

impl FixedClassifier {
    pub fn new<I, S>(entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entities: entities.into_iter().map(Into::into).collect(),
            fail: false,
        }
    }

    /// A classifier whose every call fails as if the service were down.
    pub fn failing() -> Self {
        Self {
            entities: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl EntityClassifier for FixedClassifier {
    async fn extract(&self, _text: &str) -> vaultrag_models::Result<Vec<String>> {
        if self.fail {
            return Err(ModelError::unavailable("fixed", "classifier offline"));
        }
        Ok(self.entities.clone())
    }

    fn classifier_name(&self) -> &str {
        "fixed"
    }
}

/// Replays canned answers in order, then answers `{}`.
pub struct ScriptedGenerator {
    answers: Mutex<Vec<vaultrag_models::Result<String>>>,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new(answers: Vec<vaultrag_models::Result<String>>) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationService for ScriptedGenerator {
    async fn complete(&self, _prompt: &str, _timeout: Duration) -> vaultrag_models::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut answers = self.answers.lock().unwrap_or_else(|e| e.into_inner());
        if answers.is_empty() {
            Ok("{}".to_string())
        } else {
            answers.remove(0)
        }
    }

    fn service_name(&self) -> &str {
        "scripted"
    }
}

/// One recorded `query_by_text` call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedQuery {
    pub text: String,
    pub k: usize,
    pub filter: Option<RangeFilter>,
}

/// In-memory [`VectorStore`] that records every query it serves.
pub struct MemoryVectorStore {
    embedder: Arc<dyn EmbeddingProvider>,
    records: Mutex<Vec<ChunkRecord>>,
    queries: Mutex<Vec<RecordedQuery>>,
}

impl MemoryVectorStore {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            records: Mutex::new(Vec::new()),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<RecordedQuery> {
        self.queries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn ids(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|r| r.id.clone())
            .collect()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, new_records: Vec<ChunkRecord>) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        for record in new_records {
            match records.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record,
                None => records.push(record),
            }
        }
        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|r| !ids.contains(&r.id));
        Ok(())
    }

    async fn query_by_text(
        &self,
        text: &str,
        k: usize,
        filter: Option<&RangeFilter>,
    ) -> Result<Vec<StoredChunk>> {
        self.queries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedQuery {
                text: text.to_string(),
                k,
                filter: filter.cloned(),
            });

        let query = self.embedder.embed_text(text).await?;
        let mut hits: Vec<StoredChunk> = self
            .records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| filter.is_none_or(|f| f.matches(&r.metadata)))
            .map(|r| StoredChunk {
                id: r.id.clone(),
                text: r.text.clone(),
                metadata: r.metadata.clone(),
                score: cosine_similarity(&query, &r.vector),
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.lock().unwrap_or_else(|e| e.into_inner()).len())
    }
}
