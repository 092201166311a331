//! Persisted domain records: documents, chunks, conversations, chat messages.
//!
//! These are the shapes stores read and write. Wire-level completion messages
//! live in [`crate::message`]; retrieval scoring wrappers live in
//! [`crate::retrieval`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of an uploaded document.
///
/// A document starts as `Pending`, is claimed by the ingestion pipeline as
/// `Processing`, and ends in exactly one of the terminal states: `Ready`
/// (chunks and embeddings persisted) or `Failed` (no chunks persisted,
/// `error_message` set).
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Uploaded, not yet claimed by ingestion.
    Pending,
    /// Claimed by an ingestion run; transient.
    Processing,
    /// Ingestion completed; chunks are searchable.
    Ready,
    /// Ingestion failed; no chunks persisted.
    Failed,
}

impl DocumentStatus {
    /// Stable string form used in storage and API payloads.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Ready => "ready",
            DocumentStatus::Failed => "failed",
        }
    }

    /// Parses the stable string form back into a status.
    ///
    /// Returns `None` for unknown strings so callers can surface a
    /// corruption error instead of guessing.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DocumentStatus::Pending),
            "processing" => Some(DocumentStatus::Processing),
            "ready" => Some(DocumentStatus::Ready),
            "failed" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, DocumentStatus::Pending)
    }

    #[must_use]
    pub fn is_processing(&self) -> bool {
        matches!(self, DocumentStatus::Processing)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, DocumentStatus::Ready)
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, DocumentStatus::Failed)
    }

    /// True for `Ready` and `Failed`, the two end states of ingestion.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Ready | DocumentStatus::Failed)
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An uploaded document and its ingestion bookkeeping.
///
/// `chunk_count` and `total_tokens` are meaningful only once `status` is
/// [`DocumentStatus::Ready`]; until then they stay at zero.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    /// Owner scope; every read path filters on this.
    pub owner_id: String,
    pub title: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub status: DocumentStatus,
    /// Human-readable failure reason, set only in the `Failed` state.
    pub error_message: Option<String>,
    pub chunk_count: u32,
    pub total_tokens: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Creates a new document record in the `Pending` state.
    #[must_use]
    pub fn new(owner_id: &str, title: &str, mime_type: &str, size_bytes: u64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            title: title.to_string(),
            mime_type: mime_type.to_string(),
            size_bytes,
            status: DocumentStatus::Pending,
            error_message: None,
            chunk_count: 0,
            total_tokens: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A contiguous slice of a document with its embedding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    /// Zero-based position within the document.
    pub chunk_index: u32,
    pub content: String,
    pub token_count: u32,
    /// Dense vector produced at ingestion time; `None` until embedded.
    pub embedding: Option<Vec<f32>>,
    /// Free-form provenance (document title, chunk position, totals).
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Chunk {
    /// Creates a chunk for `document_id` at `chunk_index`.
    #[must_use]
    pub fn new(document_id: Uuid, chunk_index: u32, content: &str, token_count: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            chunk_index,
            content: content.to_string(),
            token_count,
            embedding: None,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    /// Attach the embedding vector.
    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Attach provenance metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A chat conversation owned by a single user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub owner_id: String,
    pub title: String,
    /// Overrides the builtin system prompt for this conversation when set.
    pub system_prompt: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Bumped on every appended message, so listings surface active
    /// conversations first.
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    #[must_use]
    pub fn new(owner_id: &str, title: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            title: title.to_string(),
            system_prompt: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach a conversation-specific system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, system_prompt: &str) -> Self {
        self.system_prompt = Some(system_prompt.to_string());
        self
    }
}

/// User rating attached to an assistant message.
///
/// Serialized as the integer the API exchanges: `-1`, `0`, or `1`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i8", try_from = "i8")]
pub enum Feedback {
    Down,
    #[default]
    Neutral,
    Up,
}

impl Feedback {
    #[must_use]
    pub fn as_i8(&self) -> i8 {
        match self {
            Feedback::Down => -1,
            Feedback::Neutral => 0,
            Feedback::Up => 1,
        }
    }
}

impl From<Feedback> for i8 {
    fn from(f: Feedback) -> Self {
        f.as_i8()
    }
}

impl TryFrom<i8> for Feedback {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Feedback::Down),
            0 => Ok(Feedback::Neutral),
            1 => Ok(Feedback::Up),
            other => Err(format!("feedback must be -1, 0, or 1, got {other}")),
        }
    }
}

/// Provenance pointer from an assistant message back to a retrieved chunk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub document_id: Uuid,
    pub chunk_index: u32,
    /// First part of the chunk text, for display without a second lookup.
    pub content_preview: String,
    pub similarity: f32,
}

impl SourceRef {
    /// Characters kept in `content_preview`.
    pub const PREVIEW_CHARS: usize = 200;

    /// Truncates `content` to the preview length on a character boundary.
    #[must_use]
    pub fn preview_of(content: &str) -> String {
        content.chars().take(Self::PREVIEW_CHARS).collect()
    }
}

/// A persisted chat message, user or assistant.
///
/// Generation metadata (`sources`, `model`, `latency_ms`, `token_count`) is
/// populated on assistant messages only; user messages carry the defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    /// "user" or "assistant"; use the constants on [`crate::message::Message`].
    pub role: String,
    pub content: String,
    /// Chunks the answer was grounded on, in rank order.
    pub sources: Vec<SourceRef>,
    pub model: Option<String>,
    /// Wall-clock span of the whole answer pipeline for this turn.
    pub latency_ms: Option<u64>,
    pub token_count: Option<u32>,
    pub feedback: Feedback,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Creates a user message with no generation metadata.
    #[must_use]
    pub fn user(conversation_id: Uuid, content: &str) -> Self {
        Self::new(conversation_id, crate::message::Message::USER, content)
    }

    /// Creates an assistant message; attach metadata with the `with_*` methods.
    #[must_use]
    pub fn assistant(conversation_id: Uuid, content: &str) -> Self {
        Self::new(conversation_id, crate::message::Message::ASSISTANT, content)
    }

    #[must_use]
    pub fn new(conversation_id: Uuid, role: &str, content: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            role: role.to_string(),
            content: content.to_string(),
            sources: Vec::new(),
            model: None,
            latency_ms: None,
            token_count: None,
            feedback: Feedback::Neutral,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_sources(mut self, sources: Vec<SourceRef>) -> Self {
        self.sources = sources;
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }

    #[must_use]
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    #[must_use]
    pub fn with_token_count(mut self, token_count: u32) -> Self {
        self.token_count = Some(token_count);
        self
    }
}

/// One page of conversation history, oldest first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<ChatMessage>,
    /// True when older messages exist before this page.
    pub has_more: bool,
}
