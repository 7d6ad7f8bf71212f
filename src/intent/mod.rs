//! Structured intent extraction, the router's second signal

pub mod extractor;
pub mod llm_extractor;

pub use extractor::{DisabledIntentExtractor, ExtractedIntent, IntentExtractor};
pub use llm_extractor::LlmIntentExtractor;

use crate::config::RouterConfig;
use crate::error::{RouterError, RouterResult};
use crate::llm::{LlmError, OpenAiConfig, OpenAiProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Build the intent extractor named in the configuration.
///
/// Without credentials the extractor is disabled rather than failing startup;
/// routing then runs on the pattern and semantic signals alone.
pub fn create_intent_extractor(config: &RouterConfig) -> RouterResult<Arc<dyn IntentExtractor>> {
    let section = &config.intent;
    if section.provider == "none" {
        info!("Intent extraction disabled");
        return Ok(Arc::new(DisabledIntentExtractor));
    }

    let api_key = match config.get_intent_api_key() {
        Ok(key) => key,
        Err(e) => {
            warn!(error = %e, "No intent credentials, intent extraction disabled");
            return Ok(Arc::new(DisabledIntentExtractor));
        }
    };

    let mut provider_config = OpenAiConfig {
        api_key,
        timeout: Duration::from_millis(section.timeout_ms),
        ..Default::default()
    };
    if let Some(base_url) = &section.base_url {
        provider_config.base_url = base_url.clone();
    }
    let provider = OpenAiProvider::new(provider_config).map_err(|e: LlmError| {
        RouterError::invalid_configuration(format!("Intent provider: {e}"))
    })?;

    info!(model = %section.model, "Using OpenAI intent extractor");
    Ok(Arc::new(
        LlmIntentExtractor::new(Arc::new(provider), section.model.clone())
            .with_temperature(section.temperature),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_provider_disables_extraction() {
        let mut config = RouterConfig::default();
        config.intent.provider = "none".to_string();
        let extractor = create_intent_extractor(&config).unwrap();
        assert!(!extractor.enabled());
    }

    #[test]
    fn test_missing_key_disables_extraction() {
        let mut config = RouterConfig::default();
        config.intent.api_key_env = "HYBRID_ROUTER_TEST_NO_INTENT_KEY".to_string();
        let extractor = create_intent_extractor(&config).unwrap();
        assert_eq!(extractor.name(), "none");
    }
}
