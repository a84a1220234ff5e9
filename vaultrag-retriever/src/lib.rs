//! vaultrag-retriever: indexing and retrieval over a Markdown notes vault
//!
//! Notes are split into date-scoped chunks, tagged with the people they
//! mention, embedded, and stored in SQLite next to a small table that tracks
//! what has been indexed. Queries are parsed for date ranges and names before
//! the vector search runs.
//!
//! ## Key Modules
//!
//! - **[`retrieval`]**: Loading, chunking, date and name parsing, the indexer
//!   and the retrieval engine
//! - **[`storage`]**: The vector store abstraction with its SQLite implementation
//! - **[`service`]**: [`service::RagService`], which wires everything from a
//!   [`config::RagConfig`]
//! - **[`testing`]**: Deterministic embedder, classifier and store for tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vaultrag_retriever::{config::RagConfig, service::RagService};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = RagConfig::resolve(None)?;
//! let service = RagService::open(config).await?;
//! service.reindex_scan().await?;
//! for hit in service.retrieve("what did I do with Maria last week?", 5).await? {
//!     println!("{} {:?}", hit.source(), hit.entry_date());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Vault → Loader → Chunking → Entities → Embeddings → SQLite store
//!   ↑                                                     ↓
//! Watcher → Indexer (full / scan / files)      Retrieval engine ← query
//! ```

pub mod config;
pub mod error;
pub mod retrieval;
pub mod service;
pub mod storage;
pub mod testing;
