//! Intent extraction against a mocked chat-completions endpoint

use hybrid_router::error::RouterError;
use hybrid_router::intent::{IntentExtractor, LlmIntentExtractor};
use hybrid_router::llm::{OpenAiConfig, OpenAiProvider};
use hybrid_router::routing::AgentKind;
use hybrid_router::session::SessionContext;
use hybrid_router::{RouterConfig, RouterOrchestrator};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn completion(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-123",
        "object": "chat.completion",
        "created": 1677652288,
        "model": "gpt-4o-mini",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 120, "completion_tokens": 30, "total_tokens": 150}
    })
}

fn extractor(base_url: &str) -> LlmIntentExtractor {
    let provider = OpenAiProvider::new(OpenAiConfig {
        api_key: "test-api-key".to_string(),
        base_url: base_url.to_string(),
        timeout: Duration::from_secs(5),
    })
    .unwrap();
    LlmIntentExtractor::new(Arc::new(provider), "gpt-4o-mini")
}

#[tokio::test]
async fn test_structured_intent_is_requested_and_parsed() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer test-api-key"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "response_format": {"type": "json_schema"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            r#"{"intent": "seller_info", "base_ids": "b12, b13", "brand": null, "price_inquiry": "yes", "confidence": 0.9}"#,
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    let intent = extractor(&mock_server.uri())
        .extract("who sells b12 and b13", &SessionContext::default())
        .await
        .unwrap();

    assert_eq!(intent.agent(), AgentKind::SellerInfo);
    assert_eq!(intent.base_ids, vec!["b12", "b13"]);
    assert!(intent.price_inquiry);
    assert_eq!(intent.brand, None);
    assert_eq!(intent.confidence, 0.9);
}

#[tokio::test]
async fn test_non_json_content_is_provider_unavailable() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion("I think it is a comparison.")),
        )
        .mount(&mock_server)
        .await;

    let result = extractor(&mock_server.uri())
        .extract("a or b", &SessionContext::default())
        .await;
    assert!(matches!(result, Err(RouterError::ProviderUnavailable { .. })));
}

#[tokio::test]
async fn test_api_error_is_provider_unavailable() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"message": "Rate limit reached", "type": "rate_limit_exceeded"}
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let err = extractor(&mock_server.uri())
        .extract("anything", &SessionContext::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::ProviderUnavailable { .. }));
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn test_conversation_context_reaches_the_prompt() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            r#"{"intent": "item_feature", "confidence": 0.7}"#,
        )))
        .mount(&mock_server)
        .await;

    let context = SessionContext {
        session_id: "s1".to_string(),
        turn_count: 2,
        turns_remaining: 3,
        previous_agents: vec![AgentKind::Exploration, AgentKind::SpecificItem],
        recent_queries: vec!["a warm jacket".to_string(), "the blue one".to_string()],
    };
    extractor(&mock_server.uri())
        .extract("how heavy is it", &context)
        .await
        .unwrap();

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let prompt = body["messages"][1]["content"].as_str().unwrap();
    assert!(prompt.contains("how heavy is it"));
    assert!(prompt.contains("2 turns, 3 remaining"));
    assert!(prompt.contains("- the blue one"));
}

#[tokio::test]
async fn test_router_from_config_uses_remote_intent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            r#"{"intent": "comparison", "confidence": 0.95}"#,
        )))
        .mount(&mock_server)
        .await;

    std::env::set_var("HYBRID_ROUTER_TEST_INTENT_KEY", "test-api-key");
    let mut config = RouterConfig::default();
    config.embedding.provider = "offline".to_string();
    config.embedding.dimension = 32;
    config.cache.path = None;
    config.intent.api_key_env = "HYBRID_ROUTER_TEST_INTENT_KEY".to_string();
    config.intent.base_url = Some(mock_server.uri());

    let router = RouterOrchestrator::from_config(&config).await.unwrap();
    let decision = router.route("which one would you pick", "s1").await;

    assert_eq!(decision.agent, AgentKind::Comparison);
    assert_eq!(decision.extracted["intent"], "comparison");
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 1);
}
