//! Orchestrates the indexing pipeline for a vault.
//!
//! ```text
//! DocumentLoader → ChunkingStrategy → EntityClassifier → EmbeddingProvider → VectorStore
//!        ↑                                                                      ↓
//!   IndexState.diff ←──────────────── IndexState.commit ←───────────────────────┘
//! ```
//!
//! Every note goes through the same path: load, chunk, tag entities, embed,
//! then mark the state entry dirty, delete the previous chunk ids, upsert the
//! new chunks and commit. Nothing is written until the fallible model calls
//! have succeeded, and the state entry is committed only after the upsert.
//!
//! A failing note is recorded in the [`IndexReport`] and the batch moves on.

use super::chunking_strategy::{ChunkingStrategy, chunk_id, chunk_ids, chunk_metadata, sanitize_front_matter};
use super::document_loader::DocumentLoader;
use super::index_state::IndexState;
use super::indexing_mode::IndexMode;
use super::path_locks::PathLocks;
use crate::error::{FailureKind, Result, RetrieverError};
use crate::storage::{ChunkMetadata, ChunkRecord, VectorStore};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use vaultrag_context::{ChunkingConfig, TextChunk};
use vaultrag_models::{EmbeddingProvider, EntityClassifier, ModelError, NoopClassifier};

/// One note that could not be indexed or removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub path: String,
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of one indexing batch.
#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    pub mode: IndexMode,
    pub files_indexed: usize,
    pub files_removed: usize,
    pub files_failed: usize,
    pub chunks_written: usize,
    pub failures: Vec<FileFailure>,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl IndexReport {
    fn new(mode: IndexMode) -> Self {
        Self {
            mode,
            files_indexed: 0,
            files_removed: 0,
            files_failed: 0,
            chunks_written: 0,
            failures: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    fn record_failure(&mut self, path: &str, err: &RetrieverError) {
        self.files_failed += 1;
        self.failures.push(FileFailure {
            path: path.to_string(),
            kind: err.kind(),
            message: err.to_string(),
        });
    }

    /// True when every note in the batch succeeded.
    pub fn is_clean(&self) -> bool {
        self.files_failed == 0
    }
}

impl std::fmt::Display for IndexReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "mode={} indexed={} removed={} failed={} chunks={} took={:.1}s",
            self.mode,
            self.files_indexed,
            self.files_removed,
            self.files_failed,
            self.chunks_written,
            self.elapsed.as_secs_f64()
        )
    }
}

pub struct Indexer {
    loader: Arc<dyn DocumentLoader>,
    store: Arc<dyn VectorStore>,
    state: IndexState,
    embedder: Arc<dyn EmbeddingProvider>,
    classifier: Arc<dyn EntityClassifier>,
    chunking: ChunkingStrategy,
    path_locks: PathLocks,
    batch_lock: Mutex<()>,
}

impl Indexer {
    pub fn new(
        loader: Arc<dyn DocumentLoader>,
        store: Arc<dyn VectorStore>,
        state: IndexState,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            loader,
            store,
            state,
            embedder,
            classifier: Arc::new(NoopClassifier),
            chunking: ChunkingStrategy::new(ChunkingConfig::default()),
            path_locks: PathLocks::new(),
            batch_lock: Mutex::new(()),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn EntityClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_chunking(mut self, chunking: ChunkingStrategy) -> Self {
        self.chunking = chunking;
        self
    }

    /// Shares note locks with another writer.
    pub fn with_path_locks(mut self, path_locks: PathLocks) -> Self {
        self.path_locks = path_locks;
        self
    }

    pub fn state(&self) -> &IndexState {
        &self.state
    }

    pub fn loader(&self) -> &Arc<dyn DocumentLoader> {
        &self.loader
    }

    /// Runs a whole-vault batch. [`IndexMode::Files`] needs a path list, see
    /// [`Indexer::reindex_files`].
    pub async fn run(&self, mode: IndexMode) -> Result<IndexReport> {
        match mode {
            IndexMode::Full => self.reindex_full().await,
            IndexMode::Scan => self.reindex_scan().await,
            IndexMode::Files => Err(RetrieverError::configuration(
                "files mode needs an explicit path list",
            )),
        }
    }

    /// Re-indexes every note regardless of stored state, then purges notes
    /// that are tracked but gone.
    pub async fn reindex_full(&self) -> Result<IndexReport> {
        let _batch = self.batch_lock.lock().await;
        let started = Instant::now();
        let mut report = IndexReport::new(IndexMode::Full);

        let files = self.loader.list_files().await?;
        info!("Starting full reindex of {} notes", files.len());

        for path in files.keys() {
            self.index_into(path, &mut report).await;
        }

        let gone: Vec<String> = self
            .state
            .entries()
            .await?
            .into_iter()
            .map(|e| e.path)
            .filter(|p| !files.contains_key(p))
            .collect();
        for path in &gone {
            self.remove_into(path, &mut report).await;
        }

        Ok(self.finish(report, started))
    }

    /// Re-indexes new and modified notes and purges deleted ones.
    pub async fn reindex_scan(&self) -> Result<IndexReport> {
        let _batch = self.batch_lock.lock().await;
        let started = Instant::now();
        let mut report = IndexReport::new(IndexMode::Scan);

        let files = self.loader.list_files().await?;
        let diff = self.state.diff(&files).await?;
        debug!(
            "Scan found {} notes to index and {} to remove out of {}",
            diff.to_index.len(),
            diff.to_remove.len(),
            files.len()
        );

        for path in &diff.to_index {
            self.index_into(path, &mut report).await;
        }
        for path in &diff.to_remove {
            self.remove_into(path, &mut report).await;
        }

        Ok(self.finish(report, started))
    }

    /// Processes exactly `paths`, absolute or vault-relative. Notes that no
    /// longer exist are purged. Paths the loader would not list are ignored
    /// and repeated paths are processed once.
    pub async fn reindex_files<P: AsRef<Path>>(&self, paths: &[P]) -> Result<IndexReport> {
        let started = Instant::now();
        let mut report = IndexReport::new(IndexMode::Files);
        let mut seen = HashSet::new();

        for path in paths {
            let path = path.as_ref();
            let Some(relative) = self.loader.relative_path(path) else {
                let err = RetrieverError::configuration(format!(
                    "{} is outside the vault",
                    path.display()
                ));
                warn!("Skipping {}: {err}", path.display());
                report.record_failure(&path.display().to_string(), &err);
                continue;
            };
            if !self.loader.is_indexable(&relative) {
                debug!("Ignoring {relative}: not an indexable note");
                continue;
            }
            if !seen.insert(relative.clone()) {
                continue;
            }

            let exists = tokio::fs::try_exists(self.loader.root().join(&relative))
                .await
                .unwrap_or(false);
            if exists {
                self.index_into(&relative, &mut report).await;
            } else {
                self.remove_into(&relative, &mut report).await;
            }
        }

        Ok(self.finish(report, started))
    }

    fn finish(&self, mut report: IndexReport, started: Instant) -> IndexReport {
        report.elapsed = started.elapsed();
        info!("Indexing batch finished: {report}");
        report
    }

    async fn index_into(&self, path: &str, report: &mut IndexReport) {
        match self.index_document(path).await {
            Ok(chunks) => {
                report.files_indexed += 1;
                report.chunks_written += chunks;
            }
            Err(err) => {
                error!("Failed to index {path}: {err}");
                report.record_failure(path, &err);
            }
        }
    }

    async fn remove_into(&self, path: &str, report: &mut IndexReport) {
        match self.remove_document(path).await {
            Ok(true) => report.files_removed += 1,
            Ok(false) => {}
            Err(err) => {
                error!("Failed to remove {path}: {err}");
                report.record_failure(path, &err);
            }
        }
    }

    /// Rewrites one note's chunks and returns how many were written.
    pub async fn index_document(&self, path: &str) -> Result<usize> {
        let _guard = self.path_locks.lock(path).await;

        let doc = self.loader.load_one(path).await?;
        let mut chunks = self.chunking.chunk_document(&doc);

        let doc_entities = self.classify(&doc.text, path).await;
        for chunk in &mut chunks {
            let chunk_entities = self.classify(&chunk.text, path).await;
            chunk.merge_entities(doc_entities.iter().chain(&chunk_entities).cloned());
        }

        let front_matter = sanitize_front_matter(&doc.front_matter);
        let records = self.embed(path, &chunks, &front_matter).await?;

        let previous = self
            .state
            .get(path)
            .await?
            .map(|e| e.chunk_count)
            .unwrap_or(0);

        self.state.mark_dirty(path, records.len()).await?;
        self.store.delete(&chunk_ids(path, previous)).await?;
        let written = records.len();
        self.store.upsert(records).await?;
        self.state.commit(path, doc.modified_ms, written).await?;

        debug!("Indexed {path}: {written} chunks (previously {previous})");
        Ok(written)
    }

    /// Purges a note's chunks and forgets it. Returns false when the note
    /// was not tracked.
    pub async fn remove_document(&self, path: &str) -> Result<bool> {
        let _guard = self.path_locks.lock(path).await;

        let Some(entry) = self.state.get(path).await? else {
            debug!("Nothing to remove for untracked note {path}");
            return Ok(false);
        };
        self.store.delete(&chunk_ids(path, entry.chunk_count)).await?;
        self.state.remove(path).await?;

        debug!("Removed {path} ({} chunks)", entry.chunk_count);
        Ok(true)
    }

    async fn classify(&self, text: &str, path: &str) -> Vec<String> {
        match self.classifier.extract(text).await {
            Ok(entities) => entities,
            Err(e) => {
                warn!(
                    "Entity classifier {} failed on {path}, continuing without entities: {e}",
                    self.classifier.classifier_name()
                );
                Vec::new()
            }
        }
    }

    async fn embed(
        &self,
        path: &str,
        chunks: &[TextChunk],
        front_matter: &ChunkMetadata,
    ) -> Result<Vec<ChunkRecord>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let passages: Vec<String> = chunks.iter().map(TextChunk::build).collect();
        let embeddings = self.embedder.embed_texts(&passages).await?;
        if embeddings.len() != chunks.len() {
            return Err(ModelError::invalid_response(
                self.embedder.provider_name(),
                format!(
                    "expected {} embeddings for {path}, got {}",
                    chunks.len(),
                    embeddings.len()
                ),
            )
            .into());
        }

        Ok(chunks
            .iter()
            .zip(passages)
            .zip(embeddings.embeddings)
            .map(|((chunk, text), vector)| ChunkRecord {
                id: chunk_id(&chunk.source, chunk.chunk_index),
                vector,
                text,
                metadata: chunk_metadata(chunk, front_matter),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::document_loader::MarkdownVaultLoader;
    use crate::storage::open_memory_pool;
    use crate::testing::{FixedClassifier, HashEmbedder, MemoryVectorStore};
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    struct Fixture {
        vault: TempDir,
        store: Arc<MemoryVectorStore>,
        indexer: Indexer,
    }

    async fn fixture(classifier: FixedClassifier) -> Fixture {
        let vault = TempDir::new().unwrap();
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbedder::default());
        let store = Arc::new(MemoryVectorStore::new(embedder.clone()));
        let state = IndexState::new(open_memory_pool().await.unwrap()).await.unwrap();
        let indexer = Indexer::new(
            Arc::new(MarkdownVaultLoader::new(vault.path())),
            store.clone(),
            state,
            embedder,
        )
        .with_classifier(Arc::new(classifier));
        Fixture {
            vault,
            store,
            indexer,
        }
    }

    fn write(vault: &TempDir, rel: &str, content: &str) {
        let path = vault.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_scan_indexes_then_skips_unchanged() -> anyhow::Result<()> {
        let f = fixture(FixedClassifier::default()).await;
        write(&f.vault, "daily/jan.md", "## 2025-01-10\nMet Alice.\n\n## 2025-01-11\nMet Bob.\n");
        write(&f.vault, "ideas.md", "A short idea.");

        let report = f.indexer.reindex_scan().await?;
        assert_eq!(report.mode, IndexMode::Scan);
        assert_eq!(report.files_indexed, 2);
        assert_eq!(report.chunks_written, 3);
        assert!(report.is_clean());
        assert_eq!(f.store.count().await?, 3);

        let entry = f.indexer.state().get("daily/jan.md").await?.unwrap();
        assert_eq!(entry.chunk_count, 2);
        assert!(!entry.is_dirty());

        let again = f.indexer.reindex_scan().await?;
        assert_eq!(again.files_indexed, 0);
        assert_eq!(again.files_removed, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_reindex_drops_stale_chunk_ids() -> anyhow::Result<()> {
        let f = fixture(FixedClassifier::default()).await;
        write(&f.vault, "a.md", "## 2025-01-01\nOne.\n## 2025-01-02\nTwo.\n## 2025-01-03\nThree.\n");
        f.indexer.reindex_full().await?;
        assert_eq!(f.store.count().await?, 3);

        write(&f.vault, "a.md", "## 2025-01-01\nOnly one now.\n");
        let report = f.indexer.reindex_files(&["a.md"]).await?;
        assert_eq!(report.files_indexed, 1);
        assert_eq!(f.store.ids(), vec![chunk_id("a.md", 0)]);
        assert_eq!(f.indexer.state().get("a.md").await?.unwrap().chunk_count, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_deleted_note_is_purged() -> anyhow::Result<()> {
        let f = fixture(FixedClassifier::default()).await;
        write(&f.vault, "a.md", "Alpha note.");
        write(&f.vault, "b.md", "Beta note.");
        f.indexer.reindex_scan().await?;

        std::fs::remove_file(f.vault.path().join("a.md"))?;
        let report = f.indexer.reindex_scan().await?;
        assert_eq!(report.files_removed, 1);
        assert_eq!(f.store.ids(), vec![chunk_id("b.md", 0)]);
        assert!(f.indexer.state().get("a.md").await?.is_none());

        std::fs::remove_file(f.vault.path().join("b.md"))?;
        let report = f.indexer.reindex_files(&[f.vault.path().join("b.md")]).await?;
        assert_eq!(report.files_removed, 1);
        assert_eq!(f.store.count().await?, 0);
        Ok(())
    }

    #[traced_test]
    #[tokio::test]
    async fn test_bad_note_does_not_abort_batch() -> anyhow::Result<()> {
        let f = fixture(FixedClassifier::default()).await;
        write(&f.vault, "good.md", "Fine note.");
        write(&f.vault, "broken.md", "---\ntitle: never closed\n\nBody.");

        let report = f.indexer.reindex_full().await?;
        assert_eq!(report.files_indexed, 1);
        assert_eq!(report.files_failed, 1);
        assert_eq!(report.failures[0].path, "broken.md");
        assert_eq!(report.failures[0].kind, FailureKind::MalformedDocument);
        assert!(f.indexer.state().get("broken.md").await?.is_none());
        assert!(logs_contain("Failed to index broken.md"));
        Ok(())
    }

    #[traced_test]
    #[tokio::test]
    async fn test_classifier_failure_degrades_to_no_entities() -> anyhow::Result<()> {
        let f = fixture(FixedClassifier::failing()).await;
        write(&f.vault, "a.md", "Met Alice.");

        let report = f.indexer.reindex_scan().await?;
        assert_eq!(report.files_indexed, 1);
        let hits = f.store.query_by_text("Alice", 1, None).await?;
        assert_eq!(hits[0].metadata.get_str("entities"), Some(""));
        assert!(logs_contain("continuing without entities"));
        Ok(())
    }

    #[tokio::test]
    async fn test_entities_and_metadata_reach_the_store() -> anyhow::Result<()> {
        let f = fixture(FixedClassifier::new(["person:Alice", "PERSON:alice", "place:Paris"])).await;
        write(
            &f.vault,
            "trips/paris.md",
            "---\ntitle: Paris trip\ntags: [travel, food]\n---\n## 2024-06-01\nDinner in Paris.\n",
        );
        f.indexer.reindex_scan().await?;

        let hits = f.store.query_by_text("Paris", 1, None).await?;
        let meta = &hits[0].metadata;
        assert_eq!(meta.get_str("title"), Some("Paris trip"));
        assert_eq!(meta.get_str("tags"), Some("travel, food"));
        assert_eq!(meta.get_str("entry_date"), Some("2024-06-01"));
        assert_eq!(meta.get_str("entities"), Some("person:Alice; place:Paris"));
        assert!(hits[0].text.starts_with("passage: "));
        assert!(hits[0].text.ends_with("Dinner in Paris."));
        Ok(())
    }

    #[tokio::test]
    async fn test_files_mode_filters_paths() -> anyhow::Result<()> {
        let f = fixture(FixedClassifier::default()).await;
        write(&f.vault, "a.md", "Alpha.");
        write(&f.vault, "image.png", "not markdown");

        let outside = TempDir::new()?;
        let report = f
            .indexer
            .reindex_files(&[
                PathBuf::from("a.md"),
                f.vault.path().join("a.md"),
                PathBuf::from("image.png"),
                outside.path().join("x.md"),
            ])
            .await?;
        assert_eq!(report.files_indexed, 1);
        assert_eq!(report.files_failed, 1);
        assert_eq!(report.failures[0].kind, FailureKind::Configuration);
        assert!(f.indexer.run(IndexMode::Files).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_rewrites_of_one_note() -> anyhow::Result<()> {
        let f = fixture(FixedClassifier::default()).await;
        write(&f.vault, "a.md", "## 2025-01-01\nOne.\n## 2025-01-02\nTwo.\n");
        let indexer = Arc::new(f.indexer);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let indexer = indexer.clone();
                tokio::spawn(async move { indexer.reindex_files(&["a.md"]).await })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await??.files_indexed, 1);
        }

        assert_eq!(f.store.count().await?, 2);
        let entry = indexer.state().get("a.md").await?.unwrap();
        assert_eq!(entry.chunk_count, 2);
        assert!(!entry.is_dirty());
        Ok(())
    }

    #[tokio::test]
    async fn test_report_display_and_json() {
        let mut report = IndexReport::new(IndexMode::Full);
        report.files_indexed = 2;
        report.chunks_written = 5;
        report.elapsed = Duration::from_millis(1500);
        assert_eq!(
            report.to_string(),
            "mode=full indexed=2 removed=0 failed=0 chunks=5 took=1.5s"
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["elapsed_ms"], 1500);
        assert_eq!(json["mode"], "full");
    }
}
