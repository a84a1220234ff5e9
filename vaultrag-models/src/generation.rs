//! Text generation behind a narrow `complete(prompt, timeout)` interface.

use crate::config::OllamaConfig;
use crate::error::{ModelError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Anything that can turn a prompt into text.
///
/// Callers always pass a deadline. Implementations must return
/// [`ModelError::Timeout`] instead of waiting past it.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn complete(&self, prompt: &str, timeout: Duration) -> Result<String>;

    fn service_name(&self) -> &str;
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_ctx: u32,
    num_predict: u32,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Non-streaming completions from an Ollama server's `/api/generate`.
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    config: OllamaConfig,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: OllamaConfig) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ModelError::request("ollama-generate", e, config.request_timeout()))?;
        Ok(Self { config, client })
    }

    /// Overrides the configured `num_predict` for short structured answers.
    pub fn with_num_predict(mut self, num_predict: u32) -> Self {
        self.config.num_predict = num_predict;
        self
    }

    fn request_body<'a>(&'a self, prompt: &'a str) -> GenerateRequest<'a> {
        GenerateRequest {
            model: &self.config.generator_model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.config.temperature,
                num_ctx: self.config.num_ctx,
                num_predict: self.config.num_predict,
            },
        }
    }
}

#[async_trait]
impl GenerationService for OllamaGenerator {
    async fn complete(&self, prompt: &str, timeout: Duration) -> Result<String> {
        let limit = timeout.min(self.config.request_timeout());
        tracing::debug!(
            model = %self.config.generator_model,
            timeout_ms = limit.as_millis() as u64,
            "Requesting completion"
        );

        let request = self
            .client
            .post(self.config.endpoint("/api/generate"))
            .timeout(limit)
            .json(&self.request_body(prompt));

        let call = async {
            let response = request
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| ModelError::request(self.service_name(), e, limit))?;
            let parsed: GenerateResponse = response
                .json()
                .await
                .map_err(|e| ModelError::invalid_response(self.service_name(), e.to_string()))?;
            Ok(parsed.response)
        };

        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(ModelError::Timeout {
                service: self.service_name().to_string(),
                elapsed: limit,
            }),
        }
    }

    fn service_name(&self) -> &str {
        "ollama-generate"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let generator = OllamaGenerator::new(OllamaConfig::default().with_generator_model("llama3"))
            .unwrap()
            .with_num_predict(128);
        let body = serde_json::to_value(generator.request_body("hi")).unwrap();
        assert_eq!(body["model"], "llama3");
        assert_eq!(body["prompt"], "hi");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], 128);
    }

    #[test]
    fn test_response_parsing() {
        let parsed: GenerateResponse =
            serde_json::from_str(r#"{"model":"m","response":"{\"start\":null}","done":true}"#)
                .unwrap();
        assert_eq!(parsed.response, "{\"start\":null}");
    }

    #[tokio::test]
    async fn test_unreachable_server_errors_quickly() {
        let generator = OllamaGenerator::new(OllamaConfig::new("http://127.0.0.1:9")).unwrap();
        let err = generator
            .complete("hello", Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(err.is_transient(), "unexpected error: {err}");
    }
}
