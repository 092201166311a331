#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use ragweave::message::Message;
use ragweave::providers::{
    CompletionOptions, CompletionProvider, DeltaStream, EmbeddingProvider, ProviderError,
};

fn stub_request_error(message: &str) -> ProviderError {
    ProviderError::Request {
        provider: "stub",
        message: message.to_string(),
    }
}

/// Embedder with a fixed text-to-vector table. Unknown texts embed to the
/// zero vector, which scores 0.0 against everything.
#[derive(Clone, Debug)]
pub struct StubEmbedder {
    dims: usize,
    vectors: FxHashMap<String, Vec<f32>>,
}

impl StubEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            vectors: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }
}

#[async_trait]
impl EmbeddingProvider for StubEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts
            .iter()
            .map(|text| {
                self.vectors
                    .get(text)
                    .cloned()
                    .unwrap_or_else(|| vec![0.0; self.dims])
            })
            .collect())
    }

    fn model_name(&self) -> &str {
        "stub-embedder"
    }
}

/// Embedder that always fails with a retryable request error.
#[derive(Clone, Debug)]
pub struct FailingEmbedder {
    pub message: &'static str,
}

impl Default for FailingEmbedder {
    fn default() -> Self {
        Self {
            message: "embedding backend unreachable",
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Err(stub_request_error(self.message))
    }

    fn model_name(&self) -> &str {
        "failing-embedder"
    }
}

/// Completion that answers with a fixed string and records every prompt it
/// was shown. Streaming yields the answer one whitespace word at a time.
#[derive(Clone)]
pub struct ScriptedCompletion {
    pub answer: String,
    pub prompts: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl ScriptedCompletion {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Prompts seen so far, oldest first.
    pub fn seen(&self) -> Vec<Vec<Message>> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedCompletion {
    async fn complete(
        &self,
        messages: &[Message],
        _options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        self.prompts.lock().push(messages.to_vec());
        Ok(self.answer.clone())
    }

    async fn stream(
        &self,
        messages: &[Message],
        _options: &CompletionOptions,
    ) -> Result<DeltaStream, ProviderError> {
        self.prompts.lock().push(messages.to_vec());
        let deltas: Vec<Result<String, ProviderError>> = self
            .answer
            .split_whitespace()
            .map(|word| Ok(format!("{word} ")))
            .collect();
        Ok(futures_util::stream::iter(deltas).boxed())
    }

    fn model_name(&self) -> &str {
        "scripted-model"
    }
}

/// Completion whose batch and stream calls both fail up front.
#[derive(Clone, Debug)]
pub struct FailingCompletion {
    pub message: &'static str,
}

impl Default for FailingCompletion {
    fn default() -> Self {
        Self {
            message: "completion backend unreachable",
        }
    }
}

#[async_trait]
impl CompletionProvider for FailingCompletion {
    async fn complete(
        &self,
        _messages: &[Message],
        _options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        Err(stub_request_error(self.message))
    }

    async fn stream(
        &self,
        _messages: &[Message],
        _options: &CompletionOptions,
    ) -> Result<DeltaStream, ProviderError> {
        Err(stub_request_error(self.message))
    }

    fn model_name(&self) -> &str {
        "failing-model"
    }
}

/// Completion whose stream yields the scripted deltas and then dies with an
/// error. `complete` returns the concatenation, as if the failure never
/// happened.
#[derive(Clone, Debug)]
pub struct BrokenStreamCompletion {
    pub deltas: Vec<&'static str>,
    pub message: &'static str,
}

#[async_trait]
impl CompletionProvider for BrokenStreamCompletion {
    async fn complete(
        &self,
        _messages: &[Message],
        _options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        Ok(self.deltas.concat())
    }

    async fn stream(
        &self,
        _messages: &[Message],
        _options: &CompletionOptions,
    ) -> Result<DeltaStream, ProviderError> {
        let mut items: Vec<Result<String, ProviderError>> = self
            .deltas
            .iter()
            .map(|delta| Ok((*delta).to_string()))
            .collect();
        items.push(Err(stub_request_error(self.message)));
        Ok(futures_util::stream::iter(items).boxed())
    }

    fn model_name(&self) -> &str {
        "broken-stream-model"
    }
}

/// Completion that paces its deltas, one per `interval`, so tests can react
/// mid-stream.
#[derive(Clone, Debug)]
pub struct DrippingCompletion {
    pub deltas: Vec<&'static str>,
    pub interval: Duration,
}

#[async_trait]
impl CompletionProvider for DrippingCompletion {
    async fn complete(
        &self,
        _messages: &[Message],
        _options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        Ok(self.deltas.concat())
    }

    async fn stream(
        &self,
        _messages: &[Message],
        _options: &CompletionOptions,
    ) -> Result<DeltaStream, ProviderError> {
        let deltas = self.deltas.clone();
        let interval = self.interval;
        let stream = futures_util::stream::unfold(
            (deltas, 0usize),
            move |(deltas, index)| async move {
                if index >= deltas.len() {
                    return None;
                }
                tokio::time::sleep(interval).await;
                let delta = deltas[index].to_string();
                Some((Ok(delta), (deltas, index + 1)))
            },
        );
        Ok(stream.boxed())
    }

    fn model_name(&self) -> &str {
        "dripping-model"
    }
}
