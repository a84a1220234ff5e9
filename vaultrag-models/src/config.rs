//! Configuration for the model service clients

use crate::error::{ModelError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection and model settings for an Ollama server.
///
/// Every field has a default, so a TOML `[models]` table only needs the keys
/// it wants to change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    /// Base URL of the Ollama HTTP API
    pub base_url: String,
    /// Model used for chunk and query embeddings
    pub embed_model: String,
    /// Model used for text generation
    pub generator_model: String,
    /// Upper bound for any single HTTP request, in seconds
    pub request_timeout_secs: u64,
    /// Number of texts sent per embedding request
    pub embed_batch_size: usize,
    pub temperature: f32,
    pub num_ctx: u32,
    pub num_predict: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            embed_model: "nomic-embed-text".to_string(),
            generator_model: "granite4:tiny-h".to_string(),
            request_timeout_secs: 120,
            embed_batch_size: 32,
            temperature: 0.0,
            num_ctx: 8192,
            num_predict: 256,
        }
    }
}

impl OllamaConfig {
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_embed_model<S: Into<String>>(mut self, model: S) -> Self {
        self.embed_model = model.into();
        self
    }

    pub fn with_generator_model<S: Into<String>>(mut self, model: S) -> Self {
        self.generator_model = model.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_embed_batch_size(mut self, batch_size: usize) -> Self {
        self.embed_batch_size = batch_size;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// `base_url` without a trailing slash, ready for joining API paths.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Checks the settings a client cannot work without.
    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ModelError::invalid_config(format!(
                "base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        if self.embed_model.trim().is_empty() {
            return Err(ModelError::invalid_config("embed_model must not be empty"));
        }
        if self.generator_model.trim().is_empty() {
            return Err(ModelError::invalid_config(
                "generator_model must not be empty",
            ));
        }
        if self.embed_batch_size == 0 {
            return Err(ModelError::invalid_config(
                "embed_batch_size must be at least 1",
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ModelError::invalid_config(
                "request_timeout_secs must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = OllamaConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.embed_model, "nomic-embed-text");
        assert_eq!(config.request_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn test_builder_methods() {
        let config = OllamaConfig::new("http://ollama:11434/")
            .with_embed_model("mxbai-embed-large")
            .with_generator_model("llama3")
            .with_request_timeout(Duration::from_millis(10))
            .with_embed_batch_size(8);

        assert_eq!(config.embed_model, "mxbai-embed-large");
        assert_eq!(config.generator_model, "llama3");
        assert_eq!(config.request_timeout_secs, 1);
        assert_eq!(config.embed_batch_size, 8);
        assert_eq!(config.endpoint("/api/embed"), "http://ollama:11434/api/embed");
    }

    #[test]
    fn test_validation_failures() {
        assert!(OllamaConfig::new("ollama:11434").validate().is_err());
        assert!(OllamaConfig::default()
            .with_embed_model(" ")
            .validate()
            .is_err());
        assert!(OllamaConfig::default()
            .with_embed_batch_size(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: OllamaConfig =
            serde_json::from_str(r#"{"base_url": "http://10.0.0.5:11434"}"#).unwrap();
        assert_eq!(config.base_url, "http://10.0.0.5:11434");
        assert_eq!(config.embed_model, "nomic-embed-text");
    }
}
