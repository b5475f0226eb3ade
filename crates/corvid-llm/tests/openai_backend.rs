//! HTTP-level tests for the OpenAI-compatible backend and search clients.

use std::time::Duration;

use corvid_llm::{
    CompletionRequest, Embedder, HttpVectorIndex, LlmBackend, LlmError, Message, OpenAiBackend,
    OpenAiConfig, OpenAiEmbedder, OpenAiEmbedderConfig, VectorIndex,
};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend_for(server: &MockServer) -> OpenAiBackend {
    OpenAiBackend::new(
        OpenAiConfig::compatible(format!("{}/v1", server.uri()))
            .with_api_key("sk-test")
            .with_max_retries(2)
            .with_retry_backoff(Duration::from_millis(5)),
    )
    .unwrap()
}

fn chat_body(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-123",
        "model": "gpt-test",
        "choices": [{"message": {"content": content}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
    })
}

#[tokio::test]
async fn test_complete_returns_text_and_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("hello")))
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let response = backend
        .complete(CompletionRequest::new("gpt-test", vec![Message::user("hi")], 16))
        .await
        .unwrap();

    assert_eq!(response.text(), "hello");
    assert_eq!(response.usage.total_tokens, 5);
}

#[tokio::test]
async fn test_complete_retries_transient_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("recovered")))
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let response = backend
        .complete(CompletionRequest::new("m", vec![Message::user("hi")], 16))
        .await
        .unwrap();
    assert_eq!(response.text(), "recovered");
}

#[tokio::test]
async fn test_auth_failure_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"error": {"message": "bad key"}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let err = backend
        .complete(CompletionRequest::new("m", vec![Message::user("hi")], 16))
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::Auth(ref msg) if msg.contains("bad key")));
}

#[tokio::test]
async fn test_embedder_orders_by_index() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        })))
        .mount(&server)
        .await;

    let embedder =
        OpenAiEmbedder::new(OpenAiEmbedderConfig::new(format!("{}/v1", server.uri()))).unwrap();
    let out = embedder.embed_batch(&["a", "b"]).await.unwrap();
    assert_eq!(out, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
}

#[tokio::test]
async fn test_http_vector_index_search() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/collections/kb/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                {"id": "d1", "score": 0.9, "text": "Rust ownership", "metadata": {"page": 1}}
            ]
        })))
        .mount(&server)
        .await;

    let index = HttpVectorIndex::new(server.uri(), Duration::from_secs(2), true).unwrap();
    let hits = index.search("kb", &[0.1, 0.2], 3).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "d1");
    assert_eq!(hits[0].metadata["page"], 1);
}

#[tokio::test]
async fn test_http_vector_index_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let index = HttpVectorIndex::new(server.uri(), Duration::from_secs(2), true).unwrap();
    assert!(index.search("kb", &[0.1], 3).await.is_err());
}
