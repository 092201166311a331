//! Deterministic offline providers.
//!
//! Used whenever no hosted credential is configured: development, tests, and
//! air-gapped deployments. The embedding is a hashed bag-of-words, which is
//! crude but stable, so retrieval stays exercisable end to end without a
//! network.

use async_trait::async_trait;
use futures_util::StreamExt;
use sha2::{Digest, Sha256};

use super::{
    CompletionOptions, CompletionProvider, DeltaStream, EmbeddingProvider, ProviderError,
};
use crate::message::Message;

/// Model identifier the local embedding reports.
pub const LOCAL_EMBEDDING_MODEL: &str = "local-hash-embedding";
/// Model identifier the local completion reports.
pub const LOCAL_COMPLETION_MODEL: &str = "local-fallback";

/// Canned one-shot answer.
pub const LOCAL_COMPLETION_TEXT: &str =
    "Local fallback response: based on indexed content, this is the best available answer.";
/// Canned streamed answer, emitted one word at a time.
pub const LOCAL_STREAM_TEXT: &str = "Local fallback streaming response.";

/// Hashed bag-of-words embedding.
///
/// Each lowercased whitespace token is SHA-256 hashed; the first digest byte
/// picks a dimension to increment. The final vector is L2-normalized (a zero
/// vector stays zero). Identical text always embeds identically.
#[derive(Clone, Debug)]
pub struct LocalEmbedding {
    dims: usize,
}

impl LocalEmbedding {
    #[must_use]
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dims];
        for token in text.to_lowercase().split_whitespace() {
            let digest = Sha256::digest(token.as_bytes());
            let idx = (digest[0] as usize) % self.dims;
            vec[idx] += 1.0;
        }
        let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        let norm = if norm == 0.0 { 1.0 } else { norm };
        for v in &mut vec {
            *v /= norm;
        }
        vec
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedding {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn model_name(&self) -> &str {
        LOCAL_EMBEDDING_MODEL
    }
}

/// Canned completion used when no hosted provider is configured.
#[derive(Clone, Debug, Default)]
pub struct LocalCompletion;

impl LocalCompletion {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CompletionProvider for LocalCompletion {
    async fn complete(
        &self,
        _messages: &[Message],
        _options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        Ok(LOCAL_COMPLETION_TEXT.to_string())
    }

    async fn stream(
        &self,
        _messages: &[Message],
        _options: &CompletionOptions,
    ) -> Result<DeltaStream, ProviderError> {
        let deltas: Vec<Result<String, ProviderError>> = LOCAL_STREAM_TEXT
            .split_whitespace()
            .map(|word| Ok(format!("{word} ")))
            .collect();
        Ok(futures_util::stream::iter(deltas).boxed())
    }

    fn model_name(&self) -> &str {
        LOCAL_COMPLETION_MODEL
    }
}
