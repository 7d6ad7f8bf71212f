//! Intent extraction through a chat-completion model
//!
//! The extractor asks the model for a JSON object matching
//! [`ExtractedIntent`]. OpenAI gets the schema as structured output; other
//! providers get plain JSON mode and the field list in the prompt.

use super::extractor::{ExtractedIntent, IntentExtractor};
use crate::error::{sanitize_error_message, RouterError, RouterResult};
use crate::llm::provider::{
    CompletionRequest, JsonSchemaDefinition, LlmProvider, Message, ResponseFormat,
};
use crate::session::SessionContext;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

const SYSTEM_PROMPT: &str = "You analyse shopping-assistant queries, which may be written in \
English or Persian. Classify the user's intent and extract entities.

Intent labels:
- comparison: the user compares two or more products
- specific_item: the user wants one product identified by code, model or exact description
- item_feature: the user asks about an attribute or the price of a product
- seller_info: the user asks about sellers, shops or availability
- exploration: the user is looking for a product by loose criteria
- general: store policy, payment, returns, greetings or help
- other: anything unrelated to shopping

Return a JSON object with the fields intent, base_ids, product_codes, attributes, \
price_inquiry, brand, category and confidence. Lists are always arrays, never null. \
brand and category are strings or null. confidence is a number between 0.0 and 1.0.";

/// LLM-backed [`IntentExtractor`]
pub struct LlmIntentExtractor {
    provider: Arc<dyn LlmProvider>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl LlmIntentExtractor {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.1,
            max_tokens: 300,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn build_request(&self, query: &str, context: &SessionContext) -> CompletionRequest {
        let response_format = if self.provider.name() == "openai" {
            ResponseFormat::JsonSchema {
                json_schema: JsonSchemaDefinition {
                    name: "extracted_intent".to_string(),
                    strict: None,
                    schema: ExtractedIntent::json_schema(),
                },
            }
        } else {
            ResponseFormat::Json
        };

        CompletionRequest {
            model: self.model.clone(),
            messages: vec![
                Message::system(SYSTEM_PROMPT),
                Message::user(Self::build_prompt(query, context)),
            ],
            max_tokens: Some(self.max_tokens),
            temperature: Some(self.temperature),
            response_format: Some(response_format),
            ..Default::default()
        }
    }

    fn build_prompt(query: &str, context: &SessionContext) -> String {
        let mut prompt = format!("USER QUERY:\n{query}\n");

        if context.turn_count > 0 {
            prompt.push_str(&format!(
                "\nCONVERSATION SO FAR ({} turns, {} remaining):\n",
                context.turn_count, context.turns_remaining
            ));
            let previous: Vec<String> = context
                .previous_agents
                .iter()
                .map(|agent| agent.to_string())
                .collect();
            prompt.push_str(&format!("Previous intents: {}\n", previous.join(", ")));
            for query in &context.recent_queries {
                prompt.push_str(&format!("- {query}\n"));
            }
        }

        prompt.push_str("\nExtract the intent as JSON:");
        prompt
    }

    fn parse_response(&self, content: &str) -> RouterResult<ExtractedIntent> {
        let value: Value = serde_json::from_str(content.trim()).map_err(|e| {
            warn!(error = %e, "Failed to parse intent JSON");
            RouterError::provider_unavailable(
                self.provider.name(),
                format!("Invalid intent JSON: {e}"),
            )
        })?;
        if !value.is_object() {
            return Err(RouterError::provider_unavailable(
                self.provider.name(),
                "Intent response is not a JSON object",
            ));
        }
        Ok(ExtractedIntent::from_json(&value))
    }
}

#[async_trait]
impl IntentExtractor for LlmIntentExtractor {
    fn name(&self) -> &str {
        self.provider.name()
    }

    async fn extract(&self, query: &str, context: &SessionContext) -> RouterResult<ExtractedIntent> {
        let request = self.build_request(query, context);
        let response = self.provider.complete(request).await.map_err(|e| {
            RouterError::provider_unavailable(
                self.provider.name(),
                sanitize_error_message(&e.to_string()),
            )
        })?;

        let content = response.content.ok_or_else(|| {
            RouterError::provider_unavailable(self.provider.name(), "No content in intent response")
        })?;

        let intent = self.parse_response(&content)?;
        debug!(
            intent = %intent.intent,
            confidence = intent.confidence,
            "Extracted intent"
        );
        Ok(intent)
    }
}
