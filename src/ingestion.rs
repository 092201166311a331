//! Document ingestion: validate, extract, chunk, embed, persist.
//!
//! Uploads are validated against the owner's document quota, the supported
//! MIME types, and the size ceiling before anything is written. After that a
//! document record moves through `pending -> processing -> {ready, failed}`;
//! pipeline failures are contained to the document (status `failed` with a
//! readable `error_message`, zero chunk rows) and never bubble out of
//! [`IngestionPipeline::ingest`].

use std::sync::Arc;

use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;
use tracing::instrument;

use crate::chunker::{ChunkerError, TokenChunker};
use crate::config::RagConfig;
use crate::extract::{self, ExtractError};
use crate::models::{Chunk, Document};
use crate::providers::{EmbeddingProvider, ProviderError};
use crate::stores::{DocumentStore, StoreError};

/// A file handed over by the request layer.
#[derive(Clone, Debug)]
pub struct DocumentUpload {
    /// Original filename; doubles as the document title.
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl DocumentUpload {
    #[must_use]
    pub fn new(filename: &str, mime_type: &str, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.to_string(),
            mime_type: mime_type.to_string(),
            bytes,
        }
    }
}

/// Upload rejections and infrastructure faults surfaced by ingestion.
///
/// Extraction, chunking, and embedding failures are not here: those mark the
/// document `failed` instead of erroring the call.
#[derive(Debug, Error, Diagnostic)]
pub enum IngestError {
    #[error("Document limit reached")]
    #[diagnostic(
        code(ragweave::ingestion::document_limit),
        help("the owner already holds {limit} documents; delete some before uploading more")
    )]
    DocumentLimitReached { limit: usize },

    #[error("Unsupported file type: {mime_type}")]
    #[diagnostic(
        code(ragweave::ingestion::unsupported_type),
        help("supported types: text/plain, text/markdown, application/pdf, and DOCX")
    )]
    UnsupportedType { mime_type: String },

    #[error("File too large")]
    #[diagnostic(
        code(ragweave::ingestion::file_too_large),
        help("{size_bytes} bytes exceeds the {max_bytes} byte ceiling")
    )]
    FileTooLarge { size_bytes: u64, max_bytes: u64 },

    #[error("document persistence failed: {0}")]
    #[diagnostic(code(ragweave::ingestion::store))]
    Store(#[from] StoreError),
}

/// Failures contained to a single document; their rendering becomes the
/// document's `error_message`.
#[derive(Debug, Error)]
enum PipelineError {
    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Chunker(#[from] ChunkerError),

    #[error(transparent)]
    Embedding(#[from] ProviderError),

    #[error("No text content extracted from document")]
    EmptyText,

    #[error("No chunks generated from document")]
    NoChunks,

    #[error("embedding provider returned {got} vectors for {want} chunks")]
    EmbeddingCountMismatch { got: usize, want: usize },
}

/// Runs uploads through extract -> chunk -> embed -> persist.
pub struct IngestionPipeline {
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: TokenChunker,
    max_file_size_bytes: u64,
    max_documents_per_owner: usize,
}

impl std::fmt::Debug for IngestionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionPipeline")
            .field("chunker", &self.chunker)
            .field("max_file_size_bytes", &self.max_file_size_bytes)
            .field("max_documents_per_owner", &self.max_documents_per_owner)
            .finish()
    }
}

impl IngestionPipeline {
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        chunker: TokenChunker,
        config: &RagConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            chunker,
            max_file_size_bytes: config.max_file_size_bytes,
            max_documents_per_owner: config.max_documents_per_owner,
        }
    }

    /// Builds the pipeline with a chunker derived from `config`.
    pub fn from_config(
        config: &RagConfig,
        store: Arc<dyn DocumentStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, ChunkerError> {
        let chunker = TokenChunker::from_config(config)?;
        Ok(Self::new(store, embedder, chunker, config))
    }

    /// Ingests one upload for `owner_id` and returns the final document
    /// record.
    ///
    /// Validation failures (quota, type, size) error out before anything is
    /// persisted. Once the document record exists, pipeline failures land in
    /// its `error_message` with status `failed`; the returned record reflects
    /// whichever terminal state was reached.
    #[instrument(skip(self, upload), err)]
    pub async fn ingest(
        &self,
        owner_id: &str,
        upload: DocumentUpload,
    ) -> Result<Document, IngestError> {
        let owned = self.store.count_documents(owner_id).await?;
        if owned >= self.max_documents_per_owner {
            return Err(IngestError::DocumentLimitReached {
                limit: self.max_documents_per_owner,
            });
        }
        if !extract::is_supported_mime(&upload.mime_type) {
            return Err(IngestError::UnsupportedType {
                mime_type: upload.mime_type,
            });
        }
        let size_bytes = upload.bytes.len() as u64;
        if size_bytes > self.max_file_size_bytes {
            return Err(IngestError::FileTooLarge {
                size_bytes,
                max_bytes: self.max_file_size_bytes,
            });
        }

        let title = if upload.filename.is_empty() {
            "Untitled"
        } else {
            upload.filename.as_str()
        };
        let document = Document::new(owner_id, title, &upload.mime_type, size_bytes);
        self.store.create_document(&document).await?;
        tracing::debug!(document_id = %document.id, title, "document registered");

        if !self.store.mark_processing(document.id).await? {
            tracing::warn!(document_id = %document.id, "document already claimed, skipping");
            return Ok(self
                .store
                .get_document(owner_id, document.id)
                .await?
                .unwrap_or(document));
        }

        match self.run_pipeline(&document, &upload.bytes).await {
            Ok((chunks, total_tokens)) => {
                let committed = self
                    .store
                    .complete_document(document.id, chunks, total_tokens)
                    .await?;
                if committed {
                    tracing::info!(
                        document_id = %document.id,
                        total_tokens,
                        "document ready"
                    );
                } else {
                    tracing::warn!(document_id = %document.id, "completion lost the claim");
                }
            }
            Err(failure) => {
                let message = failure.to_string();
                tracing::warn!(document_id = %document.id, error = %message, "ingestion failed");
                self.store.fail_document(document.id, &message).await?;
            }
        }

        Ok(self
            .store
            .get_document(owner_id, document.id)
            .await?
            .unwrap_or(document))
    }

    /// Extracts, chunks, and embeds one document's bytes. Pure with respect
    /// to the store; persistence happens in the caller.
    async fn run_pipeline(
        &self,
        document: &Document,
        bytes: &[u8],
    ) -> Result<(Vec<Chunk>, u32), PipelineError> {
        let text = extract::extract_text(bytes, &document.mime_type)?;
        if text.trim().is_empty() {
            return Err(PipelineError::EmptyText);
        }

        let text_chunks = self.chunker.chunk(&text)?;
        if text_chunks.is_empty() {
            return Err(PipelineError::NoChunks);
        }

        let contents: Vec<String> = text_chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.embedder.embed(&contents).await?;
        if embeddings.len() != text_chunks.len() {
            return Err(PipelineError::EmbeddingCountMismatch {
                got: embeddings.len(),
                want: text_chunks.len(),
            });
        }

        let total_chunks = text_chunks.len();
        let total_tokens: u32 = text_chunks.iter().map(|c| c.token_count).sum();
        let chunks = text_chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (text_chunk, embedding))| {
                Chunk::new(document.id, i as u32, &text_chunk.content, text_chunk.token_count)
                    .with_embedding(embedding)
                    .with_metadata(json!({
                        "document_title": document.title,
                        "chunk_index": i,
                        "total_chunks": total_chunks,
                    }))
            })
            .collect();

        Ok((chunks, total_tokens))
    }
}
