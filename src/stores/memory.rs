//! In-memory backend for tests, demos, and single-process deployments.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use uuid::Uuid;

use super::{ChatStore, DocumentStore, Result, RetrievalCandidate};
use crate::models::{
    ChatMessage, Chunk, Conversation, Document, DocumentStatus, Feedback, MessagePage,
};

#[derive(Default)]
struct MemoryInner {
    documents: FxHashMap<Uuid, Document>,
    /// Chunks per document, kept in `chunk_index` order.
    chunks: FxHashMap<Uuid, Vec<Chunk>>,
    conversations: FxHashMap<Uuid, Conversation>,
    /// Linked document ids per conversation.
    links: FxHashMap<Uuid, Vec<Uuid>>,
    /// Messages per conversation, in append order.
    messages: FxHashMap<Uuid, Vec<ChatMessage>>,
}

/// Shared in-memory store implementing both [`DocumentStore`] and
/// [`ChatStore`].
///
/// Clones share state, so one value can serve both trait positions.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryInner>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("MemoryStore")
            .field("documents", &inner.documents.len())
            .field("conversations", &inner.conversations.len())
            .finish()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create_document(&self, document: &Document) -> Result<()> {
        self.inner
            .write()
            .documents
            .insert(document.id, document.clone());
        Ok(())
    }

    async fn get_document(&self, owner_id: &str, document_id: Uuid) -> Result<Option<Document>> {
        let inner = self.inner.read();
        Ok(inner
            .documents
            .get(&document_id)
            .filter(|d| d.owner_id == owner_id)
            .cloned())
    }

    async fn list_documents(
        &self,
        owner_id: &str,
        status: Option<DocumentStatus>,
    ) -> Result<Vec<Document>> {
        let inner = self.inner.read();
        let mut docs: Vec<Document> = inner
            .documents
            .values()
            .filter(|d| d.owner_id == owner_id)
            .filter(|d| status.is_none_or(|s| d.status == s))
            .cloned()
            .collect();
        docs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(docs)
    }

    async fn count_documents(&self, owner_id: &str) -> Result<usize> {
        let inner = self.inner.read();
        Ok(inner
            .documents
            .values()
            .filter(|d| d.owner_id == owner_id)
            .count())
    }

    async fn delete_document(&self, owner_id: &str, document_id: Uuid) -> Result<bool> {
        let mut inner = self.inner.write();
        let owned = inner
            .documents
            .get(&document_id)
            .is_some_and(|d| d.owner_id == owner_id);
        if !owned {
            return Ok(false);
        }
        inner.documents.remove(&document_id);
        inner.chunks.remove(&document_id);
        for linked in inner.links.values_mut() {
            linked.retain(|id| *id != document_id);
        }
        Ok(true)
    }

    async fn mark_processing(&self, document_id: Uuid) -> Result<bool> {
        let mut inner = self.inner.write();
        match inner.documents.get_mut(&document_id) {
            Some(doc) if doc.status.is_pending() => {
                doc.status = DocumentStatus::Processing;
                doc.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_document(
        &self,
        document_id: Uuid,
        mut chunks: Vec<Chunk>,
        total_tokens: u32,
    ) -> Result<bool> {
        let mut inner = self.inner.write();
        let Some(doc) = inner.documents.get_mut(&document_id) else {
            return Ok(false);
        };
        if !doc.status.is_processing() {
            return Ok(false);
        }
        chunks.sort_by_key(|c| c.chunk_index);
        doc.status = DocumentStatus::Ready;
        doc.chunk_count = chunks.len() as u32;
        doc.total_tokens = total_tokens;
        doc.error_message = None;
        doc.updated_at = Utc::now();
        inner.chunks.insert(document_id, chunks);
        Ok(true)
    }

    async fn fail_document(&self, document_id: Uuid, error_message: &str) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(doc) = inner.documents.get_mut(&document_id) {
            doc.status = DocumentStatus::Failed;
            doc.error_message = Some(error_message.to_string());
            doc.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn list_chunks(&self, owner_id: &str, document_id: Uuid) -> Result<Vec<Chunk>> {
        let inner = self.inner.read();
        let owned = inner
            .documents
            .get(&document_id)
            .is_some_and(|d| d.owner_id == owner_id);
        if !owned {
            return Ok(Vec::new());
        }
        Ok(inner.chunks.get(&document_id).cloned().unwrap_or_default())
    }

    async fn candidate_chunks(
        &self,
        owner_id: &str,
        document_ids: Option<&[Uuid]>,
    ) -> Result<Vec<RetrievalCandidate>> {
        let inner = self.inner.read();
        let mut candidates = Vec::new();
        for doc in inner.documents.values() {
            if doc.owner_id != owner_id || !doc.status.is_ready() {
                continue;
            }
            if let Some(ids) = document_ids {
                if !ids.contains(&doc.id) {
                    continue;
                }
            }
            if let Some(chunks) = inner.chunks.get(&doc.id) {
                for chunk in chunks.iter().filter(|c| c.embedding.is_some()) {
                    candidates.push(RetrievalCandidate {
                        chunk: chunk.clone(),
                        document_title: doc.title.clone(),
                    });
                }
            }
        }
        Ok(candidates)
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn create_conversation(
        &self,
        conversation: &Conversation,
        document_ids: &[Uuid],
    ) -> Result<()> {
        let mut inner = self.inner.write();
        inner
            .conversations
            .insert(conversation.id, conversation.clone());
        inner.links.insert(conversation.id, document_ids.to_vec());
        inner.messages.entry(conversation.id).or_default();
        Ok(())
    }

    async fn get_conversation(
        &self,
        owner_id: &str,
        conversation_id: Uuid,
    ) -> Result<Option<Conversation>> {
        let inner = self.inner.read();
        Ok(inner
            .conversations
            .get(&conversation_id)
            .filter(|c| c.owner_id == owner_id)
            .cloned())
    }

    async fn list_conversations(&self, owner_id: &str) -> Result<Vec<Conversation>> {
        let inner = self.inner.read();
        let mut conversations: Vec<Conversation> = inner
            .conversations
            .values()
            .filter(|c| c.owner_id == owner_id)
            .cloned()
            .collect();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(conversations)
    }

    async fn update_conversation(
        &self,
        owner_id: &str,
        conversation_id: Uuid,
        title: Option<&str>,
        system_prompt: Option<&str>,
    ) -> Result<Option<Conversation>> {
        let mut inner = self.inner.write();
        match inner.conversations.get_mut(&conversation_id) {
            Some(conversation) if conversation.owner_id == owner_id => {
                if let Some(title) = title {
                    conversation.title = title.to_string();
                }
                if let Some(system_prompt) = system_prompt {
                    conversation.system_prompt = Some(system_prompt.to_string());
                }
                conversation.updated_at = Utc::now();
                Ok(Some(conversation.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete_conversation(&self, owner_id: &str, conversation_id: Uuid) -> Result<bool> {
        let mut inner = self.inner.write();
        let owned = inner
            .conversations
            .get(&conversation_id)
            .is_some_and(|c| c.owner_id == owner_id);
        if !owned {
            return Ok(false);
        }
        inner.conversations.remove(&conversation_id);
        inner.links.remove(&conversation_id);
        inner.messages.remove(&conversation_id);
        Ok(true)
    }

    async fn linked_document_ids(&self, conversation_id: Uuid) -> Result<Vec<Uuid>> {
        let inner = self.inner.read();
        Ok(inner.links.get(&conversation_id).cloned().unwrap_or_default())
    }

    async fn append_message(&self, message: &ChatMessage) -> Result<()> {
        let mut inner = self.inner.write();
        inner
            .messages
            .entry(message.conversation_id)
            .or_default()
            .push(message.clone());
        if let Some(conversation) = inner.conversations.get_mut(&message.conversation_id) {
            conversation.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        limit: usize,
        before: Option<Uuid>,
    ) -> Result<MessagePage> {
        let inner = self.inner.read();
        let all = inner
            .messages
            .get(&conversation_id)
            .map(Vec::as_slice)
            .unwrap_or_default();

        // Upper bound is exclusive: everything strictly older than the cursor.
        let upper = match before {
            Some(cursor) => all.iter().position(|m| m.id == cursor).unwrap_or(0),
            None => all.len(),
        };
        let window = &all[..upper];
        let start = window.len().saturating_sub(limit);
        Ok(MessagePage {
            messages: window[start..].to_vec(),
            has_more: start > 0,
        })
    }

    async fn set_feedback(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        feedback: Feedback,
    ) -> Result<Option<ChatMessage>> {
        let mut inner = self.inner.write();
        let Some(messages) = inner.messages.get_mut(&conversation_id) else {
            return Ok(None);
        };
        match messages.iter_mut().find(|m| m.id == message_id) {
            Some(message) => {
                message.feedback = feedback;
                Ok(Some(message.clone()))
            }
            None => Ok(None),
        }
    }
}
