//! Embedding provider implementations

use crate::config::OllamaConfig;
use crate::error::{ModelError, Result};
use async_trait::async_trait;
use half::f16;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Result of embedding generation
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text
    pub embeddings: Vec<Vec<f16>>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Create a new embedding result from a vector of f16 embeddings.
    ///
    /// The dimension is inferred from the first embedding vector, or 0 when
    /// there are none.
    pub fn new(embeddings: Vec<Vec<f16>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    /// Build a result from full-precision vectors.
    pub fn from_f32(embeddings: Vec<Vec<f32>>) -> Self {
        Self::new(
            embeddings
                .into_iter()
                .map(|e| e.into_iter().map(f16::from_f32).collect())
                .collect(),
        )
    }

    /// Returns the number of embedding vectors in this result.
    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    /// Returns `true` if this result contains no embedding vectors.
    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Trait for embedding providers that can generate embeddings from text
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for a single text
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>> {
        let texts = vec![text.to_string()];
        let result = self.embed_texts(&texts).await?;
        result.embeddings.into_iter().next().ok_or_else(|| {
            ModelError::invalid_response(self.provider_name(), "no embedding generated for text")
        })
    }

    /// Generate embeddings for multiple texts (batch processing)
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Get the dimension of embeddings produced by this provider, or 0 when
    /// it is not known until the first call
    fn embedding_dimension(&self) -> usize;

    /// Get the name/identifier of this provider
    fn provider_name(&self) -> &str;
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embeddings from an Ollama server's `/api/embed` endpoint.
#[derive(Debug)]
pub struct OllamaEmbedProvider {
    config: OllamaConfig,
    client: reqwest::Client,
    dimension: AtomicUsize,
}

impl OllamaEmbedProvider {
    pub fn new(config: OllamaConfig) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ModelError::request("ollama-embed", e, config.request_timeout()))?;
        Ok(Self {
            config,
            client,
            dimension: AtomicUsize::new(0),
        })
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = EmbedRequest {
            model: &self.config.embed_model,
            input: batch,
        };
        let limit = self.config.request_timeout();
        let response = self
            .client
            .post(self.config.endpoint("/api/embed"))
            .json(&body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ModelError::request(self.provider_name(), e, limit))?;
        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| ModelError::invalid_response(self.provider_name(), e.to_string()))?;

        if parsed.embeddings.len() != batch.len() {
            return Err(ModelError::invalid_response(
                self.provider_name(),
                format!(
                    "asked for {} embeddings, received {}",
                    batch.len(),
                    parsed.embeddings.len()
                ),
            ));
        }
        Ok(parsed.embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]));
        }

        tracing::debug!("Generating embeddings for {} texts", texts.len());

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.embed_batch_size.max(1)) {
            all_embeddings.extend(self.embed_batch(batch).await?);
        }

        let result = EmbeddingResult::from_f32(all_embeddings);
        self.dimension.store(result.dimension, Ordering::Relaxed);
        tracing::debug!("Generated {} embeddings", result.len());
        Ok(result)
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension.load(Ordering::Relaxed)
    }

    fn provider_name(&self) -> &str {
        "ollama-embed"
    }
}
