//! Embedding and completion providers.
//!
//! Two implementations exist for each trait: hosted OpenAI-compatible
//! providers ([`openai`]) and deterministic local fallbacks ([`local`]) used
//! when no credential is configured. The factory functions at the bottom pick
//! between them based on [`RagConfig::has_openai_credentials`].

pub mod local;
pub mod openai;
pub mod retry;

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use miette::Diagnostic;
use thiserror::Error;

use crate::config::RagConfig;
use crate::message::Message;
use retry::Retryable;

/// Stream of incremental completion text, ending when the provider is done.
///
/// An `Err` item means the stream died mid-generation; no further items
/// follow it.
pub type DeltaStream = BoxStream<'static, Result<String, ProviderError>>;

/// Failures talking to an embedding or completion provider.
#[derive(Debug, Error, Diagnostic)]
pub enum ProviderError {
    /// The request never completed (connect, timeout, mid-stream drop).
    #[error("provider request failed ({provider}): {message}")]
    #[diagnostic(
        code(ragweave::provider::request),
        help("Check connectivity and the configured base URL.")
    )]
    Request {
        provider: &'static str,
        message: String,
    },

    /// The provider answered with a non-success status.
    #[error("provider rejected the request ({provider}, status {status}): {message}")]
    #[diagnostic(code(ragweave::provider::status))]
    Status {
        provider: &'static str,
        status: u16,
        message: String,
    },

    /// The response body did not have the expected shape.
    #[error("provider returned an unexpected payload ({provider}): {message}")]
    #[diagnostic(code(ragweave::provider::payload))]
    Payload {
        provider: &'static str,
        message: String,
    },
}

impl Retryable for ProviderError {
    fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Request { .. } => true,
            ProviderError::Status { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Payload { .. } => false,
        }
    }
}

/// Generation knobs forwarded to the completion provider.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self::batch()
    }
}

impl CompletionOptions {
    /// Settings for one-shot answers: low temperature, no length cap.
    #[must_use]
    pub fn batch() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: None,
        }
    }

    /// Settings for streamed answers: warmer sampling, bounded length.
    #[must_use]
    pub fn streaming() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: Some(1000),
        }
    }
}

/// Turns text into dense vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embeds a batch of texts. The result has one vector per input, in
    /// input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;

    /// Model identifier recorded in chunk metadata and logs.
    fn model_name(&self) -> &str;
}

/// Produces assistant text from a message sequence.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Generates the full answer in one call.
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<String, ProviderError>;

    /// Opens an incremental answer stream.
    async fn stream(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<DeltaStream, ProviderError>;

    /// Model identifier recorded on assistant messages.
    fn model_name(&self) -> &str;
}

/// Picks the embedding provider for `config`: hosted when a credential is
/// present, local hash embedding otherwise.
#[must_use]
pub fn embedding_provider_from_config(config: &RagConfig) -> Arc<dyn EmbeddingProvider> {
    match &config.openai_api_key {
        Some(key) => Arc::new(openai::OpenAIEmbedding::new(
            key,
            &config.openai_base_url,
            &config.embedding_model,
        )),
        None => Arc::new(local::LocalEmbedding::new(config.local_embedding_dims)),
    }
}

/// Picks the completion provider for `config`, mirroring
/// [`embedding_provider_from_config`].
#[must_use]
pub fn completion_provider_from_config(config: &RagConfig) -> Arc<dyn CompletionProvider> {
    match &config.openai_api_key {
        Some(key) => Arc::new(openai::OpenAICompletion::new(
            key,
            &config.openai_base_url,
            &config.completion_model,
        )),
        None => Arc::new(local::LocalCompletion::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_follows_status_class() {
        let transient = ProviderError::Status {
            provider: "openai",
            status: 429,
            message: "slow down".to_string(),
        };
        assert!(transient.is_retryable());

        let server = ProviderError::Status {
            provider: "openai",
            status: 503,
            message: "unavailable".to_string(),
        };
        assert!(server.is_retryable());

        let client = ProviderError::Status {
            provider: "openai",
            status: 400,
            message: "bad request".to_string(),
        };
        assert!(!client.is_retryable());

        let network = ProviderError::Request {
            provider: "openai",
            message: "connection reset".to_string(),
        };
        assert!(network.is_retryable());

        let shape = ProviderError::Payload {
            provider: "openai",
            message: "missing choices".to_string(),
        };
        assert!(!shape.is_retryable());
    }

    #[test]
    fn factories_fall_back_to_local_without_credentials() {
        let config = RagConfig::default();
        assert_eq!(
            embedding_provider_from_config(&config).model_name(),
            local::LOCAL_EMBEDDING_MODEL
        );
        assert_eq!(
            completion_provider_from_config(&config).model_name(),
            local::LOCAL_COMPLETION_MODEL
        );

        let hosted = RagConfig::default().with_openai_api_key("sk-test");
        assert_eq!(
            embedding_provider_from_config(&hosted).model_name(),
            RagConfig::DEFAULT_EMBEDDING_MODEL
        );
        assert_eq!(
            completion_provider_from_config(&hosted).model_name(),
            RagConfig::DEFAULT_COMPLETION_MODEL
        );
    }

    #[test]
    fn completion_option_presets() {
        let batch = CompletionOptions::batch();
        assert!((batch.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(batch.max_tokens, None);

        let streaming = CompletionOptions::streaming();
        assert!((streaming.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(streaming.max_tokens, Some(1000));
    }
}
