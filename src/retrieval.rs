//! Similarity search over stored chunks.
//!
//! The query is embedded with the same provider used at ingestion time, every
//! candidate chunk is scored with cosine similarity, and the best `top_k`
//! survive. Ranking is deterministic: ties break on chunk position, then on
//! document id.

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use crate::config::RagConfig;
use crate::models::Chunk;
use crate::providers::{EmbeddingProvider, ProviderError};
use crate::similarity::cosine_similarity;
use crate::stores::{DocumentStore, StoreError};

#[derive(Debug, Error, Diagnostic)]
pub enum RetrieveError {
    #[error("query embedding failed: {0}")]
    #[diagnostic(
        code(ragweave::retrieval::embedding),
        help("check provider credentials and connectivity")
    )]
    Embedding(#[from] ProviderError),

    #[error("chunk lookup failed: {0}")]
    #[diagnostic(code(ragweave::retrieval::store))]
    Store(#[from] StoreError),

    #[error("embedding provider returned no vector for the query")]
    #[diagnostic(code(ragweave::retrieval::missing_vector))]
    MissingQueryVector,
}

/// A retrieved chunk with its provenance and score.
#[derive(Clone, Debug)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Title of the owning document, for citation labels.
    pub document_title: String,
    pub similarity: f32,
}

/// Embeds queries and ranks candidate chunks for one owner.
#[derive(Clone)]
pub struct Retriever {
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    top_k: usize,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("top_k", &self.top_k)
            .finish()
    }
}

impl Retriever {
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        top_k: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            top_k,
        }
    }

    /// Builds a retriever with `top_k` taken from `config`.
    #[must_use]
    pub fn from_config(
        config: &RagConfig,
        store: Arc<dyn DocumentStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self::new(store, embedder, config.top_k)
    }

    #[must_use]
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Returns the best-matching chunks for `query`, highest similarity
    /// first, at most `top_k` of them.
    ///
    /// Only embedded chunks of the owner's ready documents are considered;
    /// `document_ids` narrows the search further when present. No matches is
    /// not an error: the result is simply empty.
    #[instrument(skip(self, query, document_ids), err)]
    pub async fn retrieve(
        &self,
        owner_id: &str,
        query: &str,
        document_ids: Option<&[Uuid]>,
    ) -> Result<Vec<ScoredChunk>, RetrieveError> {
        let embeddings = self.embedder.embed(&[query.to_string()]).await?;
        let query_embedding = embeddings
            .into_iter()
            .next()
            .ok_or(RetrieveError::MissingQueryVector)?;

        let candidates = self.store.candidate_chunks(owner_id, document_ids).await?;

        let mut scored: Vec<ScoredChunk> = candidates
            .into_iter()
            .filter_map(|candidate| {
                let embedding = candidate.chunk.embedding.as_deref()?;
                let similarity = cosine_similarity(&query_embedding, embedding);
                Some(ScoredChunk {
                    chunk: candidate.chunk,
                    document_title: candidate.document_title,
                    similarity,
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
                .then_with(|| a.chunk.document_id.cmp(&b.chunk.document_id))
        });
        scored.truncate(self.top_k);

        tracing::debug!(
            owner_id,
            results = scored.len(),
            top_similarity = scored.first().map(|s| s.similarity),
            "retrieval complete"
        );
        Ok(scored)
    }
}
