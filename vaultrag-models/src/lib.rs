//! # vaultrag-models
//!
//! Clients for the model services a vault index depends on, each behind a
//! narrow async trait so the indexing and retrieval code never talks to a
//! concrete backend:
//!
//! - [`EmbeddingProvider`]: text to f16 embedding vectors
//! - [`GenerationService`]: `complete(prompt, timeout)` for free-form answers
//! - [`EntityClassifier`]: text to typed entity strings like `person:Alice`
//!
//! Ollama-backed implementations talk HTTP through `reqwest`. With the
//! `fastembed` feature enabled, [`FastEmbedProvider`] runs a bundled ONNX
//! model locally instead.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use vaultrag_models::{EmbeddingProvider, GenerationService, OllamaConfig, OllamaEmbedProvider, OllamaGenerator};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = OllamaConfig::new("http://localhost:11434");
//! let embedder = OllamaEmbedProvider::new(config.clone())?;
//! let texts = vec!["Met Alice for coffee".to_string()];
//! let result = embedder.embed_texts(&texts).await?;
//! println!("{} embeddings of dimension {}", result.len(), result.dimension);
//!
//! let generator = OllamaGenerator::new(config)?;
//! let answer = generator.complete("Say hi", Duration::from_secs(10)).await?;
//! println!("{answer}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`], an alias over [`ModelError`]. Use
//! [`ModelError::is_transient`] to decide whether a retry makes sense.

pub mod config;
pub mod entities;
pub mod error;
#[cfg(feature = "fastembed")]
pub mod fastembed_provider;
pub mod generation;
pub mod provider;

pub use config::OllamaConfig;
pub use entities::{EntityClassifier, NoopClassifier, label_prefix, typed_entity};
pub use error::{ModelError, Result};
#[cfg(feature = "fastembed")]
pub use fastembed_provider::FastEmbedProvider;
pub use generation::{GenerationService, OllamaGenerator};
pub use provider::{EmbeddingProvider, EmbeddingResult, OllamaEmbedProvider};
