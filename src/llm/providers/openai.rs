//! OpenAI chat-completions backend for intent extraction
//!
//! One request per call to `{base_url}/chat/completions`. Connection failures
//! and 5xx answers are retried after 100, 200 and 300 ms; any other failure is
//! returned at once.

use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmError, LlmProvider, MessageRole,
    ResponseFormat, TokenUsage,
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};

const RETRY_DELAYS_MS: [u64; 3] = [100, 200, 300];

/// Connection settings for [`OpenAiProvider`]
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    /// HTTP timeout for one attempt
    pub timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

pub struct OpenAiProvider {
    config: OpenAiConfig,
    client: Client,
}

/// Outcome of one HTTP attempt that did not produce a response
struct AttemptFailure {
    error: LlmError,
    retryable: bool,
}

impl AttemptFailure {
    fn retryable(error: LlmError) -> Self {
        Self {
            error,
            retryable: true,
        }
    }

    fn fatal(error: LlmError) -> Self {
        Self {
            error,
            retryable: false,
        }
    }

    fn from_status(status: StatusCode, body: &str) -> Self {
        let error = LlmError::ApiError(format!("OpenAI returned {status}: {body}"));
        if status.is_server_error() {
            Self::retryable(error)
        } else {
            Self::fatal(error)
        }
    }
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::NotConfigured(
                "OpenAI API key is required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        Ok(Self { config, client })
    }

    fn chat_request(request: &CompletionRequest) -> ChatRequest<'_> {
        ChatRequest {
            model: &request.model,
            messages: request
                .messages
                .iter()
                .map(|message| ChatMessage {
                    role: match message.role {
                        MessageRole::System => "system",
                        MessageRole::User => "user",
                        MessageRole::Assistant => "assistant",
                    },
                    content: &message.content,
                })
                .collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            response_format: request.response_format.as_ref().map(WireFormat::from),
        }
    }

    /// First choice of a response, or `InvalidResponse` when there is none
    fn into_completion(
        response: ChatResponse,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, LlmError> {
        let choice = response.choices.into_iter().next().ok_or_else(|| {
            LlmError::InvalidResponse("OpenAI response contained no choices".to_string())
        })?;

        Ok(CompletionResponse {
            content: choice.message.content,
            model: response.model,
            usage: response.usage.unwrap_or_default(),
            finish_reason: finish_reason(choice.finish_reason.as_deref()),
            metadata: request.metadata.clone(),
        })
    }

    async fn send(&self, body: &ChatRequest<'_>) -> Result<ChatResponse, AttemptFailure> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                AttemptFailure::retryable(LlmError::NetworkError(format!(
                    "request to OpenAI failed: {e} (connect: {}, timeout: {})",
                    e.is_connect(),
                    e.is_timeout()
                )))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptFailure::from_status(status, &body));
        }

        response
            .json()
            .await
            .map_err(|e| AttemptFailure::fatal(LlmError::InvalidResponse(e.to_string())))
    }
}

fn finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("stop") => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        Some("content_filter") => FinishReason::ContentFilter,
        _ => FinishReason::Error,
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = Self::chat_request(&request);
        debug!(
            model = %body.model,
            messages = body.messages.len(),
            "Sending chat completion"
        );

        let delays = std::iter::once(0).chain(RETRY_DELAYS_MS);
        let mut last_error = None;
        for (attempt, delay_ms) in delays.enumerate() {
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }

            match self.send(&body).await {
                Ok(response) => {
                    let completion = Self::into_completion(response, &request)?;
                    debug!(
                        total_tokens = completion.usage.total_tokens,
                        finish_reason = ?completion.finish_reason,
                        retries = attempt,
                        "Chat completion received"
                    );
                    return Ok(completion);
                }
                Err(failure) => {
                    warn!(
                        attempt = attempt + 1,
                        retryable = failure.retryable,
                        error = %crate::error::sanitize_error_message(&failure.error.to_string()),
                        "Chat completion attempt failed"
                    );
                    if !failure.retryable {
                        return Err(failure.error);
                    }
                    last_error = Some(failure.error);
                }
            }
        }

        error!("Chat completion failed after {} retries", RETRY_DELAYS_MS.len());
        Err(last_error.unwrap_or_else(|| LlmError::RequestFailed("no attempt was made".to_string())))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<WireFormat<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// `response_format` as the chat endpoint spells it
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireFormat<'a> {
    Text,
    JsonObject,
    JsonSchema { json_schema: WireSchema<'a> },
}

#[derive(Debug, Serialize)]
struct WireSchema<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    strict: Option<bool>,
    schema: &'a serde_json::Value,
}

impl<'a> From<&'a ResponseFormat> for WireFormat<'a> {
    fn from(format: &'a ResponseFormat) -> Self {
        match format {
            ResponseFormat::Text => WireFormat::Text,
            ResponseFormat::Json => WireFormat::JsonObject,
            ResponseFormat::JsonSchema { json_schema } => WireFormat::JsonSchema {
                json_schema: WireSchema {
                    name: &json_schema.name,
                    strict: json_schema.strict,
                    schema: &json_schema.schema,
                },
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ChatChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::{JsonSchemaDefinition, Message};
    use serde_json::json;

    #[test]
    fn test_default_points_at_public_api() {
        let config = OpenAiConfig::default();
        assert_eq!(config.base_url, "https://api.openai.com/v1");
        assert!(config.api_key.is_empty());
    }

    #[test]
    fn test_missing_api_key_is_not_configured() {
        let result = OpenAiProvider::new(OpenAiConfig::default());
        assert!(matches!(result, Err(LlmError::NotConfigured(_))));
    }

    #[test]
    fn test_schema_request_wire_format() {
        let request = CompletionRequest {
            messages: vec![Message::system("classify"), Message::user("ping")],
            model: "gpt-4o-mini".to_string(),
            temperature: Some(0.5),
            response_format: Some(ResponseFormat::JsonSchema {
                json_schema: JsonSchemaDefinition {
                    name: "extracted_intent".to_string(),
                    strict: None,
                    schema: json!({"type": "object"}),
                },
            }),
            ..Default::default()
        };

        let wire = serde_json::to_value(OpenAiProvider::chat_request(&request)).unwrap();
        assert_eq!(wire["model"], "gpt-4o-mini");
        assert_eq!(wire["temperature"], 0.5);
        assert_eq!(wire["messages"][0]["role"], "system");
        assert_eq!(wire["messages"][1]["content"], "ping");
        assert_eq!(wire["response_format"]["type"], "json_schema");
        assert_eq!(wire["response_format"]["json_schema"]["name"], "extracted_intent");
        assert!(wire["response_format"]["json_schema"].get("strict").is_none());
        assert!(wire.get("max_tokens").is_none());
    }

    #[test]
    fn test_json_mode_wire_format() {
        let request = CompletionRequest {
            response_format: Some(ResponseFormat::Json),
            ..Default::default()
        };
        let wire = serde_json::to_value(OpenAiProvider::chat_request(&request)).unwrap();
        assert_eq!(wire["response_format"], json!({"type": "json_object"}));
    }

    #[test]
    fn test_response_without_choices_is_invalid() {
        let response: ChatResponse =
            serde_json::from_value(json!({"model": "gpt-4o-mini", "choices": []})).unwrap();
        let result = OpenAiProvider::into_completion(response, &CompletionRequest::default());
        assert!(matches!(result, Err(LlmError::InvalidResponse(_))));
    }

    #[test]
    fn test_response_keeps_request_metadata() {
        let response: ChatResponse = serde_json::from_value(json!({
            "model": "gpt-4o-mini",
            "choices": [{"message": {"role": "assistant", "content": "{}"}, "finish_reason": "length"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4}
        }))
        .unwrap();
        let mut request = CompletionRequest::default();
        request
            .metadata
            .insert("session_id".to_string(), "s1".to_string());

        let completion = OpenAiProvider::into_completion(response, &request).unwrap();
        assert_eq!(completion.content.as_deref(), Some("{}"));
        assert_eq!(completion.finish_reason, FinishReason::Length);
        assert_eq!(completion.usage.total_tokens, 4);
        assert_eq!(completion.metadata["session_id"], "s1");
    }

    #[test]
    fn test_only_server_errors_are_retried() {
        assert!(AttemptFailure::from_status(StatusCode::BAD_GATEWAY, "").retryable);
        assert!(!AttemptFailure::from_status(StatusCode::UNAUTHORIZED, "").retryable);
        assert!(!AttemptFailure::from_status(StatusCode::TOO_MANY_REQUESTS, "").retryable);
        assert_eq!(finish_reason(None), FinishReason::Error);
    }
}
