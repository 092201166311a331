//! Hosted OpenAI-compatible providers.
//!
//! Speaks the `/embeddings` and `/chat/completions` wire shapes against a
//! configurable base URL, so self-hosted gateways and test servers work the
//! same as the real endpoint. Transient failures (connect errors, timeouts,
//! 429, 5xx) are retried with exponential backoff; the streaming call retries
//! only the initial connect, never mid-stream.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

use super::retry::{RetryConfig, with_retry};
use super::{
    CompletionOptions, CompletionProvider, DeltaStream, EmbeddingProvider, ProviderError,
};
use crate::message::Message;

const PROVIDER_NAME: &str = "openai";

/// Characters of an error body kept in the error message.
const ERROR_SNIPPET_CHARS: usize = 300;

/// Bound on one request, connect through body. Streaming applies it to the
/// connect phase only, since a healthy stream may run longer.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

fn request_error(e: reqwest::Error) -> ProviderError {
    ProviderError::Request {
        provider: PROVIDER_NAME,
        message: e.to_string(),
    }
}

fn payload_error(message: String) -> ProviderError {
    ProviderError::Payload {
        provider: PROVIDER_NAME,
        message,
    }
}

/// Maps non-success statuses to [`ProviderError::Status`] with a body snippet.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Status {
        provider: PROVIDER_NAME,
        status: status.as_u16(),
        message: body.chars().take(ERROR_SNIPPET_CHARS).collect(),
    })
}

/// Hosted embedding endpoint client.
#[derive(Clone)]
pub struct OpenAIEmbedding {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    retry: RetryConfig,
    request_timeout: Duration,
}

impl std::fmt::Debug for OpenAIEmbedding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIEmbedding")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAIEmbedding {
    #[must_use]
    pub fn new(api_key: &str, base_url: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            retry: RetryConfig::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbedding {
    #[instrument(skip(self, texts), fields(batch = texts.len()), err)]
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/embeddings", self.base_url);
        let body = json!({ "model": self.model, "input": texts });

        let response = with_retry(&self.retry, || async {
            let response = self
                .client
                .post(&url)
                .timeout(self.request_timeout)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(request_error)?;
            check_status(response).await
        })
        .await
        .into_result()?;

        let payload: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| payload_error(e.to_string()))?;
        if payload.data.len() != texts.len() {
            return Err(payload_error(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                payload.data.len()
            )));
        }

        // The endpoint documents input order, but index is authoritative.
        let mut data = payload.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Hosted chat-completion endpoint client.
#[derive(Clone)]
pub struct OpenAICompletion {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    retry: RetryConfig,
    request_timeout: Duration,
}

impl std::fmt::Debug for OpenAICompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAICompletion")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAICompletion {
    #[must_use]
    pub fn new(api_key: &str, base_url: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            retry: RetryConfig::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn request_body(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
        stream: bool,
    ) -> serde_json::Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": options.temperature,
        });
        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

enum SseEvent {
    Delta(String),
    Done,
    Malformed(String),
}

/// Parses one SSE line. Non-`data:` lines (comments, event names, blank
/// keepalives) and deltas with no content yield `None`.
fn parse_sse_line(line: &str) -> Option<SseEvent> {
    let payload = line.strip_prefix("data:")?.trim_start();
    if payload == "[DONE]" {
        return Some(SseEvent::Done);
    }
    if payload.is_empty() {
        return None;
    }
    match serde_json::from_str::<StreamChunk>(payload) {
        Ok(chunk) => {
            let delta = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta.content)
                .unwrap_or_default();
            if delta.is_empty() {
                None
            } else {
                Some(SseEvent::Delta(delta))
            }
        }
        Err(e) => Some(SseEvent::Malformed(e.to_string())),
    }
}

#[async_trait]
impl CompletionProvider for OpenAICompletion {
    #[instrument(skip(self, messages, options), err)]
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(messages, options, false);

        let response = with_retry(&self.retry, || async {
            let response = self
                .client
                .post(&url)
                .timeout(self.request_timeout)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(request_error)?;
            check_status(response).await
        })
        .await
        .into_result()?;

        let payload: ChatResponse = response
            .json()
            .await
            .map_err(|e| payload_error(e.to_string()))?;
        let choice = payload
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| payload_error("response contained no choices".to_string()))?;
        Ok(choice.message.content.unwrap_or_default())
    }

    #[instrument(skip(self, messages, options), err)]
    async fn stream(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<DeltaStream, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(messages, options, true);

        let response = with_retry(&self.retry, || async {
            // Timeout covers connect and headers; the body has no deadline.
            let send = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send();
            let response = tokio::time::timeout(self.request_timeout, send)
                .await
                .map_err(|_| ProviderError::Request {
                    provider: PROVIDER_NAME,
                    message: format!("no response within {:?}", self.request_timeout),
                })?
                .map_err(request_error)?;
            check_status(response).await
        })
        .await
        .into_result()?;

        let (tx, rx) = flume::unbounded::<Result<String, ProviderError>>();
        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut buf = String::new();
            loop {
                match bytes.next().await {
                    Some(Ok(piece)) => {
                        buf.push_str(&String::from_utf8_lossy(&piece));
                        while let Some(pos) = buf.find('\n') {
                            let line: String = buf.drain(..=pos).collect();
                            match parse_sse_line(line.trim()) {
                                Some(SseEvent::Delta(text)) => {
                                    // Receiver gone means the consumer hung up.
                                    if tx.send(Ok(text)).is_err() {
                                        return;
                                    }
                                }
                                Some(SseEvent::Done) => return,
                                Some(SseEvent::Malformed(message)) => {
                                    let _ = tx.send(Err(payload_error(message)));
                                    return;
                                }
                                None => {}
                            }
                        }
                    }
                    Some(Err(e)) => {
                        let _ = tx.send(Err(ProviderError::Request {
                            provider: PROVIDER_NAME,
                            message: e.to_string(),
                        }));
                        return;
                    }
                    // Server closed without [DONE]; treat as a clean end.
                    None => return,
                }
            }
        });

        Ok(rx.into_stream().boxed())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_delta_lines_are_extracted() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#;
        match parse_sse_line(line) {
            Some(SseEvent::Delta(text)) => assert_eq!(text, "Hel"),
            _ => panic!("expected a delta"),
        }
    }

    #[test]
    fn sse_terminator_is_recognized() {
        assert!(matches!(parse_sse_line("data: [DONE]"), Some(SseEvent::Done)));
        assert!(matches!(parse_sse_line("data:[DONE]"), Some(SseEvent::Done)));
    }

    #[test]
    fn non_data_lines_are_ignored() {
        assert!(parse_sse_line("").is_none());
        assert!(parse_sse_line(": keepalive comment").is_none());
        assert!(parse_sse_line("event: message").is_none());
        assert!(parse_sse_line("data:").is_none());
    }

    #[test]
    fn role_only_and_empty_choice_chunks_yield_nothing() {
        // First chunk of a stream usually carries only the role.
        let role_only = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert!(parse_sse_line(role_only).is_none());

        let empty_choices = r#"data: {"choices":[]}"#;
        assert!(parse_sse_line(empty_choices).is_none());

        let finish = r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        assert!(parse_sse_line(finish).is_none());
    }

    #[test]
    fn malformed_json_is_reported() {
        assert!(matches!(
            parse_sse_line("data: {not json"),
            Some(SseEvent::Malformed(_))
        ));
    }

    #[test]
    fn request_body_includes_optional_fields() {
        let provider = OpenAICompletion::new("sk-test", "http://localhost/v1/", "gpt-4o");
        assert_eq!(provider.base_url, "http://localhost/v1");

        let messages = vec![Message::user("hi")];
        let batch = provider.request_body(&messages, &CompletionOptions::batch(), false);
        assert_eq!(batch["model"], "gpt-4o");
        assert!(batch.get("max_tokens").is_none());
        assert!(batch.get("stream").is_none());

        let streaming = provider.request_body(&messages, &CompletionOptions::streaming(), true);
        assert_eq!(streaming["max_tokens"], 1000);
        assert_eq!(streaming["stream"], true);
    }
}
