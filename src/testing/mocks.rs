//! Mock implementations for testing
//!
//! Provides mock EmbeddingProvider, LlmProvider, IntentExtractor and
//! AgentHandler implementations so the router can be exercised without any
//! network service.

use crate::embedding::{fallback_vector, EmbeddingProvider};
use crate::error::{RouterError, RouterResult};
use crate::intent::{ExtractedIntent, IntentExtractor};
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmError, LlmProvider, TokenUsage,
};
use crate::routing::{AgentHandler, AgentKind, HandlerResponse, RoutingDecision};
use crate::session::SessionContext;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Mock embedding provider.
///
/// Texts registered with [`with_vector`](Self::with_vector) get that exact
/// vector; every other text gets its fallback vector. Counts one call per
/// `embed` or `embed_batch` invocation.
#[derive(Debug, Clone)]
pub struct MockEmbeddingProvider {
    dimension: usize,
    output_dimension: usize,
    should_fail: bool,
    delay: Option<Duration>,
    vectors: HashMap<String, Vec<f32>>,
    calls: Arc<AtomicUsize>,
    texts: Arc<AtomicUsize>,
}

impl MockEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            output_dimension: dimension,
            should_fail: false,
            delay: None,
            vectors: HashMap::new(),
            calls: Arc::new(AtomicUsize::new(0)),
            texts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Every call fails with `ProviderUnavailable`
    pub fn failing(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Return vectors of this length while still reporting `dimension`
    pub fn with_output_dimension(mut self, output_dimension: usize) -> Self {
        self.output_dimension = output_dimension;
        self
    }

    /// Sleep before answering each call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_vector(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.into(), vector);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Total texts received across all calls
    pub fn texts_embedded(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        self.vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| fallback_vector(text, self.output_dimension))
    }

    async fn begin_call(&self, texts: usize) -> RouterResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.fetch_add(texts, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.should_fail {
            return Err(RouterError::provider_unavailable(
                "mock",
                "Mock embedding failure",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> RouterResult<Vec<f32>> {
        self.begin_call(1).await?;
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> RouterResult<Vec<Vec<f32>>> {
        self.begin_call(texts.len()).await?;
        Ok(texts.iter().map(|text| self.vector_for(text)).collect())
    }
}

/// Mock LLM provider for testing
#[derive(Debug, Clone)]
pub struct MockLlmProvider {
    pub responses: Vec<String>,
    pub current_response: Arc<Mutex<usize>>,
    pub should_fail: bool,
    pub requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl MockLlmProvider {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            current_response: Arc::new(Mutex::new(0)),
            should_fail: false,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Self::new(vec![])
        }
    }

    pub fn single_response(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    pub async fn get_requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests.lock().await.push(request);
        if self.should_fail {
            return Err(LlmError::RequestFailed("Mock LLM failure".to_string()));
        }

        let mut current = self.current_response.lock().await;
        let response_idx = *current % self.responses.len().max(1);
        *current += 1;

        let content = if self.responses.is_empty() {
            "{}".to_string()
        } else {
            self.responses[response_idx].clone()
        };

        Ok(CompletionResponse {
            content: Some(content),
            model: "mock-model".to_string(),
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
            finish_reason: FinishReason::Stop,
            metadata: HashMap::new(),
        })
    }
}

/// Mock intent extractor with a scripted answer
#[derive(Debug, Clone)]
pub struct MockIntentExtractor {
    /// `None` makes every call fail
    response: Option<ExtractedIntent>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
    contexts: Arc<Mutex<Vec<SessionContext>>>,
}

impl MockIntentExtractor {
    /// Always answer `label` with `confidence`
    pub fn scripted(label: &str, confidence: f64) -> Self {
        Self::with_intent(ExtractedIntent {
            intent: label.to_string(),
            confidence,
            ..Default::default()
        })
    }

    pub fn with_intent(intent: ExtractedIntent) -> Self {
        Self {
            response: Some(intent),
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
            contexts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing() -> Self {
        Self {
            response: None,
            ..Self::with_intent(ExtractedIntent::none())
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Session contexts seen, in call order
    pub async fn contexts(&self) -> Vec<SessionContext> {
        self.contexts.lock().await.clone()
    }
}

#[async_trait]
impl IntentExtractor for MockIntentExtractor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn extract(&self, _query: &str, context: &SessionContext) -> RouterResult<ExtractedIntent> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.contexts.lock().await.push(context.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.response
            .clone()
            .ok_or_else(|| RouterError::provider_unavailable("mock", "Mock intent failure"))
    }
}

/// Mock handler that records every query it receives
#[derive(Debug, Clone)]
pub struct MockHandler {
    kind: AgentKind,
    handled: Arc<Mutex<Vec<String>>>,
}

impl MockHandler {
    pub fn new(kind: AgentKind) -> Self {
        Self {
            kind,
            handled: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn handled(&self) -> Vec<String> {
        self.handled.lock().await.clone()
    }
}

#[async_trait]
impl AgentHandler for MockHandler {
    fn kind(&self) -> AgentKind {
        self.kind
    }

    async fn handle(&self, query: &str, _decision: &RoutingDecision) -> RouterResult<HandlerResponse> {
        self.handled.lock().await.push(query.to_string());
        Ok(HandlerResponse::message(format!("{} handled", self.kind)))
    }
}
