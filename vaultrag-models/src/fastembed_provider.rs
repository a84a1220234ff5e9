//! Local ONNX embeddings through FastEmbed, for running without a model server.

use crate::error::{ModelError, Result};
use crate::provider::{EmbeddingProvider, EmbeddingResult};
use async_trait::async_trait;
use fastembed::{InitOptions, TextEmbedding};
use std::sync::{Arc, Mutex};

/// FastEmbed-based embedding provider using one of FastEmbed's bundled models.
#[derive(Clone)]
pub struct FastEmbedProvider {
    model_code: String,
    model: Arc<Mutex<TextEmbedding>>,
    dimension: usize,
    batch_size: usize,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("model_code", &self.model_code)
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl FastEmbedProvider {
    /// Loads a supported model by its code, e.g. `Xenova/all-MiniLM-L6-v2`.
    /// The first call downloads the model into FastEmbed's cache directory.
    pub async fn create(model_code: &str, batch_size: usize) -> Result<Self> {
        let info = TextEmbedding::list_supported_models()
            .into_iter()
            .find(|m| m.model_code.eq_ignore_ascii_case(model_code))
            .ok_or_else(|| {
                ModelError::invalid_config(format!("unsupported fastembed model: {model_code}"))
            })?;

        tracing::info!("Initializing FastEmbed provider for model: {}", info.model_code);
        let model = info.model.clone();
        let embedding = tokio::task::spawn_blocking(move || {
            TextEmbedding::try_new(InitOptions::new(model).with_show_download_progress(false))
        })
        .await?
        .map_err(|source| ModelError::External { source })?;

        Ok(Self {
            model_code: info.model_code,
            model: Arc::new(Mutex::new(embedding)),
            dimension: info.dim,
            batch_size: batch_size.max(1),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]));
        }

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let chunk = chunk.to_vec();
            let model = Arc::clone(&self.model);

            let batch = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                let mut guard = model
                    .lock()
                    .map_err(|_| ModelError::invalid_config("fastembed model lock poisoned"))?;
                guard
                    .embed(chunk, None)
                    .map_err(|source| ModelError::External { source })
            })
            .await??;
            all_embeddings.extend(batch);
        }

        Ok(EmbeddingResult::from_f32(all_embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "fastembed"
    }
}
