//! Persistence traits and backends.
//!
//! Two backends implement the same pair of traits: [`memory::MemoryStore`]
//! for tests and demos, and [`sqlite::SqliteStore`] (behind the `sqlite`
//! feature) for durable deployments. A single backend value implements both
//! traits so documents and conversations share one underlying state.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    ChatMessage, Chunk, Conversation, Document, DocumentStatus, Feedback, MessagePage,
};

/// Storage failure.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    /// The backend could not execute the operation.
    #[error("store backend error: {message}")]
    #[diagnostic(
        code(ragweave::store::backend),
        help("Check the database URL and that migrations have been applied.")
    )]
    Backend { message: String },

    /// Persisted data failed to decode.
    #[error("corrupt stored data: {message}")]
    #[diagnostic(code(ragweave::store::corrupt))]
    Corrupt { message: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A chunk joined with its document's title, as retrieval consumes it.
#[derive(Clone, Debug, PartialEq)]
pub struct RetrievalCandidate {
    pub chunk: Chunk,
    pub document_title: String,
}

/// Document and chunk persistence.
///
/// All read paths are owner-scoped: a caller can only ever observe documents
/// whose `owner_id` matches. Write paths that are driven by the ingestion
/// pipeline (`mark_processing`, `complete_document`, `fail_document`) address
/// documents by id, since the pipeline has already resolved ownership.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Inserts a new document record (normally in the `Pending` state).
    async fn create_document(&self, document: &Document) -> Result<()>;

    /// Fetches one owned document.
    async fn get_document(&self, owner_id: &str, document_id: Uuid) -> Result<Option<Document>>;

    /// Lists owned documents, newest first, optionally filtered by status.
    async fn list_documents(
        &self,
        owner_id: &str,
        status: Option<DocumentStatus>,
    ) -> Result<Vec<Document>>;

    /// Counts owned documents, for the per-owner upload cap.
    async fn count_documents(&self, owner_id: &str) -> Result<usize>;

    /// Deletes an owned document together with its chunks and any
    /// conversation links. Returns false when no such document exists.
    async fn delete_document(&self, owner_id: &str, document_id: Uuid) -> Result<bool>;

    /// Atomically claims a `Pending` document for processing.
    ///
    /// Returns true when this caller won the claim; false when the document
    /// is missing or in any other state, in which case the caller must not
    /// ingest it.
    async fn mark_processing(&self, document_id: Uuid) -> Result<bool>;

    /// Atomically persists the ingestion result: all chunks plus the `Ready`
    /// status and counters, or nothing at all.
    ///
    /// Returns false when the document is no longer in `Processing` (for
    /// example it was deleted mid-run); no chunks are written in that case.
    async fn complete_document(
        &self,
        document_id: Uuid,
        chunks: Vec<Chunk>,
        total_tokens: u32,
    ) -> Result<bool>;

    /// Marks a document `Failed` with a reason. Best-effort: a document
    /// deleted mid-run is ignored.
    async fn fail_document(&self, document_id: Uuid, error_message: &str) -> Result<()>;

    /// Lists an owned document's chunks in `chunk_index` order.
    async fn list_chunks(&self, owner_id: &str, document_id: Uuid) -> Result<Vec<Chunk>>;

    /// Retrieval candidates: embedded chunks of the owner's `Ready`
    /// documents, optionally restricted to a set of document ids.
    async fn candidate_chunks(
        &self,
        owner_id: &str,
        document_ids: Option<&[Uuid]>,
    ) -> Result<Vec<RetrievalCandidate>>;
}

/// Conversation and message persistence.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Inserts a conversation and its document links.
    async fn create_conversation(
        &self,
        conversation: &Conversation,
        document_ids: &[Uuid],
    ) -> Result<()>;

    /// Fetches one owned conversation.
    async fn get_conversation(
        &self,
        owner_id: &str,
        conversation_id: Uuid,
    ) -> Result<Option<Conversation>>;

    /// Lists owned conversations, most recently active first.
    async fn list_conversations(&self, owner_id: &str) -> Result<Vec<Conversation>>;

    /// Patches the title and/or system prompt of an owned conversation;
    /// `None` fields stay untouched. Returns the updated record, or `None`
    /// when no such conversation exists.
    async fn update_conversation(
        &self,
        owner_id: &str,
        conversation_id: Uuid,
        title: Option<&str>,
        system_prompt: Option<&str>,
    ) -> Result<Option<Conversation>>;

    /// Deletes an owned conversation with its messages and links. Returns
    /// false when no such conversation exists.
    async fn delete_conversation(&self, owner_id: &str, conversation_id: Uuid) -> Result<bool>;

    /// Document ids linked to a conversation at creation time.
    async fn linked_document_ids(&self, conversation_id: Uuid) -> Result<Vec<Uuid>>;

    /// Appends a message and bumps the conversation's `updated_at`.
    async fn append_message(&self, message: &ChatMessage) -> Result<()>;

    /// One page of history ending just before `before` (exclusive), or the
    /// latest messages when `before` is `None`. Messages come back oldest
    /// first; `has_more` reports whether older history remains. An unknown
    /// cursor id yields an empty page.
    async fn list_messages(
        &self,
        conversation_id: Uuid,
        limit: usize,
        before: Option<Uuid>,
    ) -> Result<MessagePage>;

    /// Overwrites the feedback on a message and returns the updated record,
    /// or `None` when the message does not exist in that conversation.
    async fn set_feedback(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        feedback: Feedback,
    ) -> Result<Option<ChatMessage>>;
}
