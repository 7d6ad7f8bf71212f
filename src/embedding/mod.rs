//! Text embeddings: provider adapters, fallback vectors and the shared cache

pub mod cache;
pub mod fallback;
pub mod openai;
pub mod provider;

pub use cache::{CacheSettings, EmbeddingCache};
pub use fallback::{fallback_vector, OfflineEmbeddingProvider};
pub use openai::{OpenAiEmbeddingConfig, OpenAiEmbeddingProvider};
pub use provider::EmbeddingProvider;

use crate::config::RouterConfig;
use crate::error::RouterResult;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Build the embedding provider named in the configuration.
///
/// An `openai` provider whose API key variable is unset degrades to the
/// offline provider with a warning, so the router still starts without
/// credentials.
pub fn create_embedding_provider(config: &RouterConfig) -> RouterResult<Arc<dyn EmbeddingProvider>> {
    let section = &config.embedding;
    if section.provider == "offline" {
        info!(dimension = section.dimension, "Using offline embedding provider");
        return Ok(Arc::new(OfflineEmbeddingProvider::new(section.dimension)));
    }

    match config.get_embedding_api_key() {
        Ok(api_key) => {
            let mut provider_config = OpenAiEmbeddingConfig {
                api_key,
                model: section.model.clone(),
                dimension: section.dimension,
                timeout: Duration::from_millis(section.timeout_ms),
                ..Default::default()
            };
            if let Some(base_url) = &section.base_url {
                provider_config.base_url = base_url.clone();
            }
            info!(model = %section.model, "Using OpenAI embedding provider");
            Ok(Arc::new(OpenAiEmbeddingProvider::new(provider_config)?))
        }
        Err(e) => {
            warn!(
                error = %e,
                "No embedding credentials, falling back to offline embeddings"
            );
            Ok(Arc::new(OfflineEmbeddingProvider::new(section.dimension)))
        }
    }
}
