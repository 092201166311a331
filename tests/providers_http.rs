//! HTTP-level tests for the hosted providers against a mock endpoint.

use std::time::Duration;

use futures_util::StreamExt;
use httpmock::prelude::*;
use ragweave::message::Message;
use ragweave::providers::openai::{OpenAICompletion, OpenAIEmbedding};
use ragweave::providers::retry::RetryConfig;
use ragweave::providers::{CompletionOptions, CompletionProvider, EmbeddingProvider, ProviderError};
use serde_json::json;

/// Fast backoff so exhaustion tests finish in milliseconds.
fn test_retry() -> RetryConfig {
    RetryConfig::new(3).with_initial_delay(Duration::from_millis(5))
}

fn embedder(server: &MockServer) -> OpenAIEmbedding {
    OpenAIEmbedding::new("sk-test", &server.url("/v1"), "text-embedding-3-small")
        .with_retry_config(test_retry())
}

fn completer(server: &MockServer) -> OpenAICompletion {
    OpenAICompletion::new("sk-test", &server.url("/v1"), "gpt-4o")
        .with_retry_config(test_retry())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn embed_sends_the_batch_and_orders_results_by_index() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/embeddings")
                .header("authorization", "Bearer sk-test")
                .json_body_partial(r#"{"model": "text-embedding-3-small"}"#);
            then.status(200).json_body(json!({
                "object": "list",
                "data": [
                    { "index": 1, "embedding": [0.0, 1.0] },
                    { "index": 0, "embedding": [1.0, 0.0] }
                ],
                "model": "text-embedding-3-small"
            }));
        })
        .await;

    let provider = embedder(&server);
    let vectors = provider
        .embed(&["first".to_string(), "second".to_string()])
        .await
        .unwrap();

    // The endpoint answered out of order; index wins.
    assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    mock.assert_async().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_embed_batches_never_touch_the_network() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/embeddings");
            then.status(500);
        })
        .await;

    let provider = embedder(&server);
    let vectors = provider.embed(&[]).await.unwrap();

    assert!(vectors.is_empty());
    mock.assert_hits_async(0).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn embedding_count_mismatch_is_a_payload_error() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/embeddings");
            then.status(200).json_body(json!({
                "data": [ { "index": 0, "embedding": [0.5] } ]
            }));
        })
        .await;

    let provider = embedder(&server);
    let err = provider
        .embed(&["one".to_string(), "two".to_string()])
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::Payload { .. }));
    assert!(!ragweave::providers::retry::Retryable::is_retryable(&err));
    // Payload problems surface after the response arrives, so only one call.
    mock.assert_async().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn complete_returns_the_first_choice_content() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .header("authorization", "Bearer sk-test")
                .json_body_partial(r#"{"model": "gpt-4o"}"#);
            then.status(200).json_body(json!({
                "choices": [
                    { "message": { "role": "assistant", "content": "Paris." } }
                ]
            }));
        })
        .await;

    let provider = completer(&server);
    let answer = provider
        .complete(
            &[
                Message::system("You are terse."),
                Message::user("Capital of France?"),
            ],
            &CompletionOptions::batch(),
        )
        .await
        .unwrap();

    assert_eq!(answer, "Paris.");
    mock.assert_async().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_errors_are_not_retried() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/embeddings");
            then.status(400).body("invalid input");
        })
        .await;

    let provider = embedder(&server);
    let err = provider.embed(&["text".to_string()]).await.unwrap_err();

    match err {
        ProviderError::Status {
            status, message, ..
        } => {
            assert_eq!(status, 400);
            assert!(message.contains("invalid input"));
        }
        other => panic!("expected a status error, got {other:?}"),
    }
    mock.assert_async().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_errors_are_retried_until_attempts_run_out() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(500).body("upstream exploded");
        })
        .await;

    let provider = completer(&server);
    let err = provider
        .complete(&[Message::user("hi")], &CompletionOptions::batch())
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::Status { status: 500, .. }));
    mock.assert_hits_async(3).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rate_limits_are_retried() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/embeddings");
            then.status(429).body("slow down");
        })
        .await;

    let provider = OpenAIEmbedding::new("sk-test", &server.url("/v1"), "text-embedding-3-small")
        .with_retry_config(RetryConfig::new(2).with_initial_delay(Duration::from_millis(5)));
    let err = provider.embed(&["text".to_string()]).await.unwrap_err();

    assert!(matches!(err, ProviderError::Status { status: 429, .. }));
    mock.assert_hits_async(2).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stream_parses_sse_deltas_until_done() {
    let sse_body = concat!(
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\" world\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"after the end\"}}]}\n\n",
    );

    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .json_body_partial(r#"{"stream": true}"#);
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(sse_body);
        })
        .await;

    let provider = completer(&server);
    let mut stream = provider
        .stream(&[Message::user("hi")], &CompletionOptions::streaming())
        .await
        .unwrap();

    let mut deltas = Vec::new();
    while let Some(item) = stream.next().await {
        deltas.push(item.unwrap());
    }

    // Role-only and finish chunks carry no text, and nothing after [DONE]
    // is delivered.
    assert_eq!(deltas, ["Hel", "lo", " world"]);
    mock.assert_async().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stream_connect_failures_surface_before_any_delta() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(503).body("try later");
        })
        .await;

    let provider = completer(&server);
    let err = provider
        .stream(&[Message::user("hi")], &CompletionOptions::streaming())
        .await
        .err()
        .unwrap();

    assert!(matches!(err, ProviderError::Status { status: 503, .. }));
    mock.assert_hits_async(3).await;
}
