//! Question-time retrieval: similarity search narrowed by dates and names.
//!
//! 1. Parse the query for a [`DateRange`] and name terms.
//! 2. Fetch a candidate pool from the store, range-filtered on
//!    `entry_date_ts` when a range was found, with the query text augmented
//!    by the range bounds.
//! 3. Keep candidates whose entities, title or source mention every name.
//! 4. When that leaves nothing and no range was found, query once more with
//!    the names alone and filter again. A parsed range is never relaxed.
//! 5. Recency queries are ordered newest first, ties by similarity rank.
//! 6. Truncate to `k`.

use super::date_parser::{DateParser, DateRange};
use super::name_extractor::NameExtractor;
use crate::error::{Result, RetrieverError};
use crate::storage::{StoredChunk, VectorStore};
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde::Serialize;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

static RECENCY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:latest|newest|most\s+recent|recent|recently|lately|last\s+time)\b")
        .expect("recency pattern is valid")
});

/// Whether `query` asks for the most recent material.
pub fn is_recency_query(query: &str) -> bool {
    RECENCY.is_match(query)
}

/// Appends the range bounds so the embedding leans toward dated passages.
pub fn augment_query(query: &str, range: &DateRange) -> String {
    match (range.start, range.end) {
        (Some(s), Some(e)) if s == e => format!("{query}\nDate: {s}"),
        (Some(s), Some(e)) => format!("{query}\nDates: {s} to {e}"),
        (Some(s), None) => format!("{query}\nSince: {s}"),
        (None, Some(e)) => format!("{query}\nBefore: {e}"),
        (None, None) => query.to_string(),
    }
}

/// A ranked chunk returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalCandidate {
    #[serde(flatten)]
    pub chunk: StoredChunk,
    /// Position in the similarity ranking of the pool it came from.
    pub rank: usize,
}

impl RetrievalCandidate {
    pub fn source(&self) -> &str {
        self.chunk.metadata.get_str("source").unwrap_or_default()
    }

    pub fn title(&self) -> &str {
        self.chunk.metadata.get_str("title").unwrap_or_default()
    }

    pub fn entry_date(&self) -> Option<NaiveDate> {
        self.chunk
            .metadata
            .get_str("entry_date")
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
    }

    /// Entity names without their type prefix.
    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.chunk
            .metadata
            .get_str("entities")
            .unwrap_or_default()
            .split("; ")
            .map(|e| e.split_once(':').map_or(e, |(_, name)| name))
            .filter(|e| !e.is_empty())
    }

    /// The chunk text without the embedded passage header.
    pub fn body(&self) -> &str {
        let text = self.chunk.text.as_str();
        if text.starts_with("passage: ") {
            text.split_once("\n\n").map_or(text, |(_, body)| body)
        } else {
            text
        }
    }

    /// Case-insensitive match against entity names, title and source.
    pub fn mentions(&self, term: &str) -> bool {
        let term = term.to_lowercase();
        self.entity_names()
            .chain([self.title(), self.source()])
            .any(|field| field.to_lowercase().contains(&term))
    }
}

/// What a query was understood to ask for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryPlan {
    pub date_range: Option<DateRange>,
    pub names: Vec<String>,
    pub recency: bool,
    pub pool: usize,
}

pub struct RetrievalEngine {
    store: Arc<dyn VectorStore>,
    dates: Arc<DateParser>,
    names: NameExtractor,
    pool_size: usize,
    pool_multiplier: usize,
    timezone: Tz,
}

impl RetrievalEngine {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self {
            store,
            dates: Arc::new(DateParser::new()),
            names: NameExtractor::new(),
            pool_size: 200,
            pool_multiplier: 10,
            timezone: Tz::UTC,
        }
    }

    pub fn with_date_parser(mut self, dates: Arc<DateParser>) -> Self {
        self.dates = dates;
        self
    }

    pub fn with_name_extractor(mut self, names: NameExtractor) -> Self {
        self.names = names;
        self
    }

    /// Pool fetched per query is `max(pool_size, k * pool_multiplier)`.
    pub fn with_pool(mut self, pool_size: usize, pool_multiplier: usize) -> Self {
        self.pool_size = pool_size;
        self.pool_multiplier = pool_multiplier;
        self
    }

    /// Zone used to compute "today" for relative date phrases.
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.timezone).date_naive()
    }

    fn pool_for(&self, k: usize) -> usize {
        self.pool_size.max(k.saturating_mul(self.pool_multiplier)).max(k)
    }

    pub async fn plan(&self, query: &str, k: usize, today: NaiveDate) -> QueryPlan {
        QueryPlan {
            date_range: self.dates.parse(query, today).await,
            names: self.names.extract(query),
            recency: is_recency_query(query),
            pool: self.pool_for(k),
        }
    }

    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievalCandidate>> {
        self.retrieve_at(query, k, self.today()).await
    }

    /// Like [`RetrievalEngine::retrieve`] with an explicit reference date.
    pub async fn retrieve_at(
        &self,
        query: &str,
        k: usize,
        today: NaiveDate,
    ) -> Result<Vec<RetrievalCandidate>> {
        if k == 0 {
            return Err(RetrieverError::configuration("k must be at least 1"));
        }

        let plan = self.plan(query, k, today).await;
        debug!(
            "Retrieval plan: range={:?} names={:?} recency={} pool={}",
            plan.date_range.map(|r| r.to_string()),
            plan.names,
            plan.recency,
            plan.pool
        );

        let mut candidates = match &plan.date_range {
            Some(range) => self.dated_pool(query, range, plan.pool).await?,
            None => self.pool(query, plan.pool).await?,
        };

        if !plan.names.is_empty() {
            candidates = filter_by_names(candidates, &plan.names);
            if candidates.is_empty() && plan.date_range.is_none() {
                let name_query = plan.names.join(" ");
                debug!("No candidate mentions {:?}, retrying with {name_query:?}", plan.names);
                candidates = match self.pool(&name_query, plan.pool).await {
                    Ok(pool) => filter_by_names(pool, &plan.names),
                    Err(e) => {
                        warn!("Name-only retry for {name_query:?} failed: {e}");
                        Vec::new()
                    }
                };
            }
        }

        if plan.recency {
            sort_by_recency(&mut candidates);
        }
        candidates.truncate(k);
        Ok(candidates)
    }

    async fn pool(&self, text: &str, pool: usize) -> Result<Vec<RetrievalCandidate>> {
        Ok(ranked(self.store.query_by_text(text, pool, None).await?))
    }

    async fn dated_pool(
        &self,
        query: &str,
        range: &DateRange,
        pool: usize,
    ) -> Result<Vec<RetrievalCandidate>> {
        let text = augment_query(query, range);
        let filter = (!range.is_unbounded()).then(|| range.to_filter());
        let hits = self.store.query_by_text(&text, pool, filter.as_ref()).await?;

        let mut candidates = ranked(hits);
        candidates.retain(|c| c.entry_date().is_some_and(|d| range.contains(d)));
        Ok(candidates)
    }
}

fn ranked(hits: Vec<StoredChunk>) -> Vec<RetrievalCandidate> {
    hits.into_iter()
        .enumerate()
        .map(|(rank, chunk)| RetrievalCandidate { chunk, rank })
        .collect()
}

fn filter_by_names(candidates: Vec<RetrievalCandidate>, names: &[String]) -> Vec<RetrievalCandidate> {
    candidates
        .into_iter()
        .filter(|c| names.iter().all(|n| c.mentions(n)))
        .collect()
}

/// Newest first; undated chunks last; ties keep similarity rank.
pub fn sort_by_recency(candidates: &mut [RetrievalCandidate]) {
    candidates.sort_by(|a, b| {
        b.entry_date()
            .cmp(&a.entry_date())
            .then(a.rank.cmp(&b.rank))
    });
}
