//! Integration tests for the OpenAI embeddings adapter

use hybrid_router::embedding::{EmbeddingProvider, OpenAiEmbeddingConfig, OpenAiEmbeddingProvider};
use hybrid_router::error::RouterError;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider(base_url: &str, dimension: usize) -> OpenAiEmbeddingProvider {
    OpenAiEmbeddingProvider::new(OpenAiEmbeddingConfig {
        api_key: "test-api-key".to_string(),
        base_url: base_url.to_string(),
        dimension,
        timeout: Duration::from_secs(5),
        ..Default::default()
    })
    .unwrap()
}

fn texts(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_batch_is_returned_in_input_order() {
    let mock_server = MockServer::start().await;

    // Service answers out of order
    let body = json!({
        "object": "list",
        "data": [
            {"object": "embedding", "index": 1, "embedding": [0.0, 1.0, 0.0]},
            {"object": "embedding", "index": 0, "embedding": [1.0, 0.0, 0.0]},
            {"object": "embedding", "index": 2, "embedding": [0.0, 0.0, 1.0]}
        ],
        "model": "text-embedding-3-small",
        "usage": {"prompt_tokens": 6, "total_tokens": 6}
    });

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(header("Authorization", "Bearer test-api-key"))
        .and(body_partial_json(json!({
            "model": "text-embedding-3-small",
            "input": ["first", "second", "third"],
            "encoding_format": "float",
            "dimensions": 3
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(&mock_server)
        .await;

    let vectors = provider(&mock_server.uri(), 3)
        .embed_batch(&texts(&["first", "second", "third"]))
        .await
        .unwrap();

    assert_eq!(
        vectors,
        vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]]
    );
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"index": 0, "embedding": [0.5, 0.5]}]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let vector = provider(&mock_server.uri(), 2).embed("retry me").await.unwrap();
    assert_eq!(vector, vec![0.5, 0.5]);
}

#[tokio::test]
async fn test_persistent_server_error_gives_up() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(500))
        .expect(4)
        .mount(&mock_server)
        .await;

    let result = provider(&mock_server.uri(), 2).embed("never").await;
    assert!(matches!(result, Err(RouterError::ProviderUnavailable { .. })));
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let err = provider(&mock_server.uri(), 2).embed("denied").await.unwrap_err();
    match err {
        RouterError::ProviderUnavailable { provider, message } => {
            assert_eq!(provider, "openai");
            assert!(message.contains("401"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_wrong_dimension_is_rejected() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"index": 0, "embedding": [0.1, 0.2, 0.3, 0.4]}]
        })))
        .mount(&mock_server)
        .await;

    let err = provider(&mock_server.uri(), 3).embed("too long").await.unwrap_err();
    assert!(err.to_string().contains("dimension"));
}

#[tokio::test]
async fn test_empty_batch_makes_no_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock_server)
        .await;

    let vectors = provider(&mock_server.uri(), 3).embed_batch(&[]).await.unwrap();
    assert!(vectors.is_empty());
}
