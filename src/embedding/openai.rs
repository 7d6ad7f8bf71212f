//! OpenAI embeddings adapter
//!
//! POSTs to `{base_url}/embeddings`. Network failures and 5xx responses are
//! retried with a short backoff; 4xx responses are not.

use super::provider::EmbeddingProvider;
use crate::error::{RouterError, RouterResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};

const BACKOFF_DELAYS_MS: [u64; 3] = [100, 200, 300];

/// OpenAI embedding provider configuration
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddingConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
    /// HTTP timeout for a single attempt
    pub timeout: Duration,
}

impl Default for OpenAiEmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Why one HTTP attempt failed
#[derive(Debug)]
enum AttemptError {
    Network(String),
    Server(String),
    Client(String),
    Decode(String),
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        matches!(self, AttemptError::Network(_) | AttemptError::Server(_))
    }

    fn message(&self) -> &str {
        match self {
            AttemptError::Network(m)
            | AttemptError::Server(m)
            | AttemptError::Client(m)
            | AttemptError::Decode(m) => m,
        }
    }
}

/// OpenAI embeddings provider
pub struct OpenAiEmbeddingProvider {
    config: OpenAiEmbeddingConfig,
    client: Client,
}

impl OpenAiEmbeddingProvider {
    /// Create a new provider; fails when the API key is empty
    pub fn new(config: OpenAiEmbeddingConfig) -> RouterResult<Self> {
        if config.api_key.is_empty() {
            return Err(RouterError::invalid_configuration(
                "OpenAI embedding API key is required",
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RouterError::provider_unavailable("openai", e.to_string()))?;

        Ok(Self { config, client })
    }

    fn build_request<'a>(&'a self, texts: &'a [String]) -> EmbeddingRequest<'a> {
        // Only the v3 models accept a custom output size
        let dimensions = self
            .config
            .model
            .starts_with("text-embedding-3")
            .then_some(self.config.dimension);

        EmbeddingRequest {
            model: &self.config.model,
            input: texts,
            encoding_format: "float",
            dimensions,
        }
    }

    /// Put vectors back in input order and check their shape (pure)
    fn order_response(
        &self,
        response: EmbeddingResponse,
        expected: usize,
    ) -> RouterResult<Vec<Vec<f32>>> {
        if response.data.len() != expected {
            return Err(RouterError::provider_unavailable(
                "openai",
                format!(
                    "expected {expected} embeddings, got {}",
                    response.data.len()
                ),
            ));
        }

        let mut ordered: Vec<Option<Vec<f32>>> = vec![None; expected];
        for item in response.data {
            if item.embedding.len() != self.config.dimension {
                return Err(RouterError::provider_unavailable(
                    "openai",
                    format!(
                        "embedding dimension {} does not match configured {}",
                        item.embedding.len(),
                        self.config.dimension
                    ),
                ));
            }
            match ordered.get_mut(item.index) {
                Some(slot) if slot.is_none() => *slot = Some(item.embedding),
                _ => {
                    return Err(RouterError::provider_unavailable(
                        "openai",
                        format!("invalid or duplicate embedding index {}", item.index),
                    ))
                }
            }
        }

        ordered
            .into_iter()
            .map(|slot| {
                slot.ok_or_else(|| {
                    RouterError::provider_unavailable("openai", "missing embedding in response")
                })
            })
            .collect()
    }

    async fn embed_with_retry(&self, texts: &[String]) -> RouterResult<Vec<Vec<f32>>> {
        let request = self.build_request(texts);
        let mut last_error = None;

        for (attempt, &delay_ms) in std::iter::once(&0u64)
            .chain(BACKOFF_DELAYS_MS.iter())
            .enumerate()
        {
            if attempt > 0 {
                debug!(attempt, delay_ms, "Retrying OpenAI embedding request");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }

            match self.make_api_request(&request).await {
                Ok(response) => {
                    if attempt > 0 {
                        debug!(retries = attempt, "OpenAI embedding request succeeded");
                    }
                    return self.order_response(response, texts.len());
                }
                Err(e) => {
                    warn!(
                        attempt = attempt + 1,
                        error = %crate::error::sanitize_error_message(e.message()),
                        "OpenAI embedding attempt failed"
                    );
                    if !e.is_retryable() {
                        return Err(RouterError::provider_unavailable("openai", e.message()));
                    }
                    last_error = Some(e);
                }
            }
        }

        error!("OpenAI embedding request failed after all retries");
        Err(RouterError::provider_unavailable(
            "openai",
            last_error
                .map(|e| e.message().to_string())
                .unwrap_or_else(|| "All retry attempts failed".to_string()),
        ))
    }

    async fn make_api_request(
        &self,
        request: &EmbeddingRequest<'_>,
    ) -> Result<EmbeddingResponse, AttemptError> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| {
                AttemptError::Network(format!(
                    "HTTP request failed: {e} (is_connect: {}, is_timeout: {})",
                    e.is_connect(),
                    e.is_timeout()
                ))
            })?;

        let status = response.status();
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError::Server(format!(
                "OpenAI server error: {status} - {body}"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError::Client(format!(
                "OpenAI API error: {status} - {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AttemptError::Decode(format!("Invalid embedding response: {e}")))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    async fn embed(&self, text: &str) -> RouterResult<Vec<f32>> {
        let mut vectors = self.embed_with_retry(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| RouterError::provider_unavailable("openai", "empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> RouterResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.embed_with_retry(texts).await
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}
