//! The operations a surrounding service layer calls: the three indexing
//! modes, retrieval, and the diagnostic date helpers.
//!
//! [`RagService`] wires every component from one [`RagConfig`]. Whole-vault
//! batches are serialised inside the indexer; the file watcher feeds
//! [`RagService::reindex_files`].

use crate::config::{EmbeddingBackend, EntityBackend, RagConfig};
use crate::error::{Result, RetrieverError};
use crate::retrieval::chunking_strategy::ChunkingStrategy;
use crate::retrieval::date_parser::{DateParser, DateRange, GenerationFallback};
use crate::retrieval::directory_watcher::VaultWatcher;
use crate::retrieval::document_loader::MarkdownVaultLoader;
use crate::retrieval::index_state::{IndexState, IndexStateEntry};
use crate::retrieval::indexing_engine::{IndexReport, Indexer};
use crate::retrieval::name_extractor::{HeuristicEntityClassifier, NameExtractor};
use crate::retrieval::retrieval_engine::{RetrievalCandidate, RetrievalEngine};
use crate::storage::{SqliteVectorStore, open_pool};
use chrono::NaiveDate;
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};
use vaultrag_context::split_by_date_headings;
use vaultrag_models::{
    EmbeddingProvider, EntityClassifier, GenerationService, NoopClassifier, OllamaEmbedProvider,
    OllamaGenerator,
};

/// One date-scoped section of a note, as reported by `split_by_date`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatedSection {
    pub entry_date: Option<NaiveDate>,
    pub text: String,
}

/// Splits note text on date headings, as the chunker would.
pub fn split_by_date(text: &str) -> Vec<DatedSection> {
    split_by_date_headings(text)
        .into_iter()
        .map(|s| DatedSection {
            entry_date: s.entry_date,
            text: s.text.trim().to_string(),
        })
        .collect()
}

pub struct RagService {
    config: RagConfig,
    indexer: Indexer,
    retrieval: RetrievalEngine,
    dates: Arc<DateParser>,
    pattern_dates: DateParser,
    last_report: RwLock<Option<IndexReport>>,
}

impl RagService {
    /// Opens the index database and builds the model clients named in
    /// `config`.
    pub async fn open(config: RagConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let pool = open_pool(&config.database_path()).await?;
        let embedder = build_embedder(&config).await?;
        let classifier = build_classifier(&config);
        let generator: Option<Arc<dyn GenerationService>> = if config.date_parser.llm_fallback {
            Some(Arc::new(OllamaGenerator::new(config.models.ollama.clone())?))
        } else {
            None
        };

        info!(
            "Opened index at {} (embeddings: {}, entities: {})",
            config.database_path().display(),
            embedder.provider_name(),
            classifier.classifier_name()
        );
        Ok(Self::with_models(config, pool, embedder, classifier, generator).await?)
    }

    /// Builds the service over an open pool and caller-supplied model
    /// services.
    pub async fn with_models(
        config: RagConfig,
        pool: SqlitePool,
        embedder: Arc<dyn EmbeddingProvider>,
        classifier: Arc<dyn EntityClassifier>,
        generator: Option<Arc<dyn GenerationService>>,
    ) -> Result<Self> {
        let timezone = config.date_parser.timezone;
        let store = Arc::new(SqliteVectorStore::new(pool.clone(), embedder.clone()).await?);
        let state = IndexState::new(pool).await?;

        let loader = MarkdownVaultLoader::new(&config.vault.path)
            .with_exclude_dirs(config.vault.exclude_dirs.clone());
        let indexer = Indexer::new(Arc::new(loader), store.clone(), state, embedder)
            .with_classifier(classifier)
            .with_chunking(ChunkingStrategy::new(config.chunking).with_timezone(timezone));

        let mut dates = DateParser::new();
        if let Some(generator) = generator {
            dates = dates.with_fallback(
                GenerationFallback::new(generator)
                    .with_timeout(config.date_parser.fallback_timeout())
                    .with_retries(config.date_parser.fallback_retries),
            );
        }
        let dates = Arc::new(dates);

        let retrieval = RetrievalEngine::new(store)
            .with_date_parser(dates.clone())
            .with_name_extractor(
                NameExtractor::new()
                    .with_extra_stop_words(config.retrieval.extra_stop_words.iter().cloned()),
            )
            .with_pool(config.retrieval.pool_size, config.retrieval.pool_multiplier)
            .with_timezone(timezone);

        Ok(Self {
            config,
            indexer,
            retrieval,
            dates,
            pattern_dates: DateParser::new(),
            last_report: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub async fn reindex_full(&self) -> Result<IndexReport> {
        let report = self.indexer.reindex_full().await;
        self.remember(report).await
    }

    pub async fn reindex_scan(&self) -> Result<IndexReport> {
        let report = self.indexer.reindex_scan().await;
        self.remember(report).await
    }

    pub async fn reindex_files<P: AsRef<Path>>(&self, paths: &[P]) -> Result<IndexReport> {
        let report = self.indexer.reindex_files(paths).await;
        self.remember(report).await
    }

    async fn remember(&self, report: Result<IndexReport>) -> Result<IndexReport> {
        if let Ok(report) = &report {
            *self.last_report.write().await = Some(report.clone());
        }
        report
    }

    /// The most recent batch report, if any batch has run.
    pub async fn last_report(&self) -> Option<IndexReport> {
        self.last_report.read().await.clone()
    }

    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievalCandidate>> {
        self.retrieval.retrieve(query, k).await
    }

    /// Like [`RagService::retrieve`] with an explicit reference date.
    pub async fn retrieve_at(
        &self,
        query: &str,
        k: usize,
        today: NaiveDate,
    ) -> Result<Vec<RetrievalCandidate>> {
        self.retrieval.retrieve_at(query, k, today).await
    }

    /// The date range `text` would filter on today.
    pub async fn parse_date_query(&self, text: &str) -> Option<DateRange> {
        self.parse_date_query_at(text, self.config.date_parser.today(), true)
            .await
    }

    /// Date parsing against a fixed day, optionally without the generation
    /// fallback.
    pub async fn parse_date_query_at(
        &self,
        text: &str,
        today: NaiveDate,
        use_fallback: bool,
    ) -> Option<DateRange> {
        if use_fallback {
            self.dates.parse(text, today).await
        } else {
            self.pattern_dates.parse(text, today).await
        }
    }

    pub fn split_by_date(&self, text: &str) -> Vec<DatedSection> {
        split_by_date(text)
    }

    /// Tracked notes, sorted by path.
    pub async fn state_entries(&self) -> Result<Vec<IndexStateEntry>> {
        self.indexer.state().entries().await
    }

    /// Watches the vault and re-indexes each batch of changed notes.
    pub fn watch(self: &Arc<Self>) -> anyhow::Result<VaultWatcher> {
        let service = Arc::clone(self);
        VaultWatcher::start(
            &self.config.vault.path,
            self.config.watch.debounce(),
            move |batch| {
                let service = service.clone();
                async move {
                    info!("Re-indexing {} changed notes", batch.len());
                    if let Err(e) = service.reindex_files(&batch).await {
                        error!("Watch batch failed: {e}");
                    }
                }
            },
        )
    }
}

async fn build_embedder(config: &RagConfig) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    match config.models.embedding_backend {
        EmbeddingBackend::Ollama => Ok(Arc::new(OllamaEmbedProvider::new(
            config.models.ollama.clone(),
        )?)),
        #[cfg(feature = "fastembed")]
        EmbeddingBackend::Fastembed => Ok(Arc::new(
            vaultrag_models::FastEmbedProvider::create(
                &config.models.fastembed_model,
                config.models.ollama.embed_batch_size,
            )
            .await?,
        )),
        #[cfg(not(feature = "fastembed"))]
        EmbeddingBackend::Fastembed => Err(RetrieverError::configuration(
            "models.embedding_backend = \"fastembed\" needs a build with the fastembed feature",
        )
        .into()),
    }
}

fn build_classifier(config: &RagConfig) -> Arc<dyn EntityClassifier> {
    match config.models.entity_classifier {
        EntityBackend::Heuristic => Arc::new(HeuristicEntityClassifier::new(
            NameExtractor::new()
                .with_extra_stop_words(config.retrieval.extra_stop_words.iter().cloned()),
        )),
        EntityBackend::None => Arc::new(NoopClassifier),
    }
}
