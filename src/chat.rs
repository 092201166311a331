//! Conversation management and answer turns.
//!
//! [`ChatService`] owns the full question-to-answer path: persist the user
//! message, retrieve context scoped to the conversation's linked documents,
//! assemble the prompt, generate, and persist the assistant message with its
//! provenance. Batch turns return the finished message; streamed turns hand
//! back a [`TurnStream`] fed by a background task.
//!
//! Completion failures are contained: the turn still persists an assistant
//! message carrying a readable failure notice instead of erroring the call.
//! Retrieval failures are not contained and surface as [`ChatError`].

use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use miette::Diagnostic;
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use crate::config::RagConfig;
use crate::models::{ChatMessage, Conversation, Feedback, MessagePage, SourceRef};
use crate::prompt::{self, AssembledPrompt, DEFAULT_SYSTEM_PROMPT};
use crate::providers::{
    CompletionOptions, CompletionProvider, EmbeddingProvider, ProviderError,
};
use crate::retrieval::{RetrieveError, Retriever};
use crate::stores::{ChatStore, DocumentStore, StoreError};
use crate::streaming::{turn_channel, TurnEvent, TurnStream};

#[derive(Debug, Error, Diagnostic)]
pub enum ChatError {
    #[error("Conversation not found")]
    #[diagnostic(code(ragweave::chat::conversation_not_found))]
    ConversationNotFound,

    #[error("Message not found")]
    #[diagnostic(code(ragweave::chat::message_not_found))]
    MessageNotFound,

    #[error("retrieval failed: {0}")]
    #[diagnostic(code(ragweave::chat::retrieval))]
    Retrieval(#[from] RetrieveError),

    #[error("conversation persistence failed: {0}")]
    #[diagnostic(code(ragweave::chat::store))]
    Store(#[from] StoreError),
}

/// Answer text persisted when the completion provider fails mid-turn.
fn containment_message(error: &ProviderError) -> String {
    format!("I encountered an error generating a response: {error}")
}

/// Whitespace word count with a floor of one, recorded as the answer's
/// token count.
fn answer_token_count(answer: &str) -> u32 {
    let words = answer.split_whitespace().count().max(1);
    u32::try_from(words).unwrap_or(u32::MAX)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Orchestrates conversations and RAG answer turns for one deployment.
///
/// Cheap to clone; all fields are shared handles.
#[derive(Clone)]
pub struct ChatService {
    documents: Arc<dyn DocumentStore>,
    chats: Arc<dyn ChatStore>,
    retriever: Retriever,
    completer: Arc<dyn CompletionProvider>,
}

impl std::fmt::Debug for ChatService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatService")
            .field("retriever", &self.retriever)
            .finish()
    }
}

impl ChatService {
    #[must_use]
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        chats: Arc<dyn ChatStore>,
        retriever: Retriever,
        completer: Arc<dyn CompletionProvider>,
    ) -> Self {
        Self {
            documents,
            chats,
            retriever,
            completer,
        }
    }

    /// Builds the service with a retriever derived from `config`.
    #[must_use]
    pub fn from_config(
        config: &RagConfig,
        documents: Arc<dyn DocumentStore>,
        chats: Arc<dyn ChatStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        completer: Arc<dyn CompletionProvider>,
    ) -> Self {
        let retriever = Retriever::from_config(config, Arc::clone(&documents), embedder);
        Self::new(documents, chats, retriever, completer)
    }

    /// Creates a conversation, optionally pinned to a set of documents.
    ///
    /// A missing title defaults to "New Chat". Document ids are filtered to
    /// those the owner actually holds; unknown or foreign ids are dropped
    /// silently, deduplicated, in request order.
    #[instrument(skip(self, title, system_prompt, document_ids), err)]
    pub async fn create_conversation(
        &self,
        owner_id: &str,
        title: Option<&str>,
        system_prompt: Option<&str>,
        document_ids: &[Uuid],
    ) -> Result<Conversation, ChatError> {
        let mut conversation = Conversation::new(owner_id, title.unwrap_or("New Chat"));
        if let Some(system_prompt) = system_prompt {
            conversation = conversation.with_system_prompt(system_prompt);
        }

        let mut linked = Vec::with_capacity(document_ids.len());
        for &document_id in document_ids {
            if linked.contains(&document_id) {
                continue;
            }
            if self
                .documents
                .get_document(owner_id, document_id)
                .await?
                .is_some()
            {
                linked.push(document_id);
            }
        }

        self.chats.create_conversation(&conversation, &linked).await?;
        tracing::debug!(
            conversation_id = %conversation.id,
            linked = linked.len(),
            "conversation created"
        );
        Ok(conversation)
    }

    pub async fn get_conversation(
        &self,
        owner_id: &str,
        conversation_id: Uuid,
    ) -> Result<Conversation, ChatError> {
        self.chats
            .get_conversation(owner_id, conversation_id)
            .await?
            .ok_or(ChatError::ConversationNotFound)
    }

    /// Owned conversations, most recently active first.
    pub async fn list_conversations(
        &self,
        owner_id: &str,
    ) -> Result<Vec<Conversation>, ChatError> {
        Ok(self.chats.list_conversations(owner_id).await?)
    }

    /// Patches the title and/or system prompt; `None` fields are left alone.
    pub async fn update_conversation(
        &self,
        owner_id: &str,
        conversation_id: Uuid,
        title: Option<&str>,
        system_prompt: Option<&str>,
    ) -> Result<Conversation, ChatError> {
        self.chats
            .update_conversation(owner_id, conversation_id, title, system_prompt)
            .await?
            .ok_or(ChatError::ConversationNotFound)
    }

    /// Deletes a conversation with its messages and document links.
    #[instrument(skip(self), err)]
    pub async fn delete_conversation(
        &self,
        owner_id: &str,
        conversation_id: Uuid,
    ) -> Result<(), ChatError> {
        if self
            .chats
            .delete_conversation(owner_id, conversation_id)
            .await?
        {
            Ok(())
        } else {
            Err(ChatError::ConversationNotFound)
        }
    }

    /// Document ids the conversation was pinned to at creation time.
    pub async fn linked_documents(
        &self,
        owner_id: &str,
        conversation_id: Uuid,
    ) -> Result<Vec<Uuid>, ChatError> {
        self.get_conversation(owner_id, conversation_id).await?;
        Ok(self.chats.linked_document_ids(conversation_id).await?)
    }

    /// Runs one batch answer turn and returns the persisted assistant
    /// message.
    ///
    /// The user message is persisted first and survives any later failure.
    /// `latency_ms` on the answer spans retrieval, prompt assembly, and
    /// generation.
    #[instrument(skip(self, content), err)]
    pub async fn send_message(
        &self,
        owner_id: &str,
        conversation_id: Uuid,
        content: &str,
    ) -> Result<ChatMessage, ChatError> {
        let conversation = self.get_conversation(owner_id, conversation_id).await?;

        let user_message = ChatMessage::user(conversation_id, content);
        self.chats.append_message(&user_message).await?;

        let started = Instant::now();
        let assembled = self.assemble_for(owner_id, &conversation, content).await?;
        let options = CompletionOptions::batch();
        let (answer, sources) = match self.completer.complete(&assembled.messages, &options).await
        {
            Ok(text) => (text, assembled.sources),
            Err(error) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %error,
                    "generation failed, persisting the failure notice"
                );
                (containment_message(&error), Vec::new())
            }
        };

        let assistant = ChatMessage::assistant(conversation_id, &answer)
            .with_sources(sources)
            .with_model(self.completer.model_name())
            .with_latency_ms(elapsed_ms(started))
            .with_token_count(answer_token_count(&answer));
        self.chats.append_message(&assistant).await?;
        tracing::debug!(
            conversation_id = %conversation_id,
            message_id = %assistant.id,
            latency_ms = assistant.latency_ms,
            "assistant turn persisted"
        );
        Ok(assistant)
    }

    /// Starts a streamed answer turn.
    ///
    /// The user message is persisted before this returns. Deltas and the
    /// terminal event arrive on the returned [`TurnStream`]; the turn runs
    /// on a background task and keeps going if the caller lags.
    #[instrument(skip(self, content), err)]
    pub async fn stream_message(
        &self,
        owner_id: &str,
        conversation_id: Uuid,
        content: &str,
    ) -> Result<TurnStream, ChatError> {
        let conversation = self.get_conversation(owner_id, conversation_id).await?;

        let user_message = ChatMessage::user(conversation_id, content);
        self.chats.append_message(&user_message).await?;

        let (events, stream) = turn_channel();
        let service = self.clone();
        let owner = owner_id.to_string();
        let query = content.to_string();
        tokio::spawn(async move {
            service
                .run_streaming_turn(&owner, &conversation, &query, &events)
                .await;
        });
        Ok(stream)
    }

    /// One page of history, oldest first, ending just before `before`.
    pub async fn list_messages(
        &self,
        owner_id: &str,
        conversation_id: Uuid,
        limit: usize,
        before: Option<Uuid>,
    ) -> Result<MessagePage, ChatError> {
        self.get_conversation(owner_id, conversation_id).await?;
        Ok(self
            .chats
            .list_messages(conversation_id, limit, before)
            .await?)
    }

    /// Records feedback on a message, overwriting any earlier rating.
    #[instrument(skip(self), err)]
    pub async fn set_feedback(
        &self,
        owner_id: &str,
        conversation_id: Uuid,
        message_id: Uuid,
        feedback: Feedback,
    ) -> Result<ChatMessage, ChatError> {
        self.get_conversation(owner_id, conversation_id).await?;
        self.chats
            .set_feedback(conversation_id, message_id, feedback)
            .await?
            .ok_or(ChatError::MessageNotFound)
    }

    /// Retrieves context and assembles the prompt for one turn.
    ///
    /// Retrieval is scoped to the conversation's linked documents when any
    /// exist, otherwise to everything the owner holds.
    async fn assemble_for(
        &self,
        owner_id: &str,
        conversation: &Conversation,
        query: &str,
    ) -> Result<AssembledPrompt, ChatError> {
        let linked = self.chats.linked_document_ids(conversation.id).await?;
        let scope = if linked.is_empty() {
            None
        } else {
            Some(linked)
        };
        let retrieved = self
            .retriever
            .retrieve(owner_id, query, scope.as_deref())
            .await?;
        let system_prompt = conversation
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        Ok(prompt::assemble_prompt(system_prompt, query, &retrieved))
    }

    /// Drives one streamed turn to its terminal event.
    ///
    /// Failures before the first delta emit `Failed` with no partial and
    /// persist nothing. Once text has arrived, a provider failure persists
    /// the partial answer and attaches it to the `Failed` event; a consumer
    /// that disappears mid-stream gets the same persistence without the
    /// event.
    async fn run_streaming_turn(
        &self,
        owner_id: &str,
        conversation: &Conversation,
        query: &str,
        events: &flume::Sender<TurnEvent>,
    ) {
        let started = Instant::now();
        let conversation_id = conversation.id;

        let assembled = match self.assemble_for(owner_id, conversation, query).await {
            Ok(assembled) => assembled,
            Err(error) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %error,
                    "streamed turn failed before generation"
                );
                let _ = events.send(TurnEvent::Failed {
                    error: error.to_string(),
                    partial: None,
                });
                return;
            }
        };

        let options = CompletionOptions::streaming();
        let mut deltas = match self.completer.stream(&assembled.messages, &options).await {
            Ok(stream) => stream,
            Err(error) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %error,
                    "provider refused the stream"
                );
                let _ = events.send(TurnEvent::Failed {
                    error: error.to_string(),
                    partial: None,
                });
                return;
            }
        };

        let mut answer = String::new();
        let mut consumer_gone = false;
        let failure = loop {
            match deltas.next().await {
                Some(Ok(delta)) => {
                    answer.push_str(&delta);
                    if events.send(TurnEvent::delta(delta)).is_err() {
                        consumer_gone = true;
                        break None;
                    }
                }
                Some(Err(error)) => break Some(error),
                None => break None,
            }
        };

        let answer = answer.trim().to_string();

        if consumer_gone {
            if answer.is_empty() {
                return;
            }
            match self
                .persist_streamed(conversation_id, &answer, assembled.sources, started)
                .await
            {
                Ok(message) => tracing::debug!(
                    conversation_id = %conversation_id,
                    message_id = %message.id,
                    "persisted partial answer after consumer left"
                ),
                Err(error) => tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %error,
                    "failed to persist partial answer after consumer left"
                ),
            }
            return;
        }

        match failure {
            None => {
                match self
                    .persist_streamed(conversation_id, &answer, assembled.sources, started)
                    .await
                {
                    Ok(message) => {
                        let _ = events.send(TurnEvent::Completed { message });
                    }
                    Err(error) => {
                        tracing::warn!(
                            conversation_id = %conversation_id,
                            error = %error,
                            "failed to persist streamed answer"
                        );
                        let _ = events.send(TurnEvent::Failed {
                            error: error.to_string(),
                            partial: None,
                        });
                    }
                }
            }
            Some(provider_error) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %provider_error,
                    "stream died mid-generation"
                );
                let partial = if answer.is_empty() {
                    None
                } else {
                    match self
                        .persist_streamed(conversation_id, &answer, assembled.sources, started)
                        .await
                    {
                        Ok(message) => Some(message),
                        Err(persist_error) => {
                            tracing::warn!(
                                conversation_id = %conversation_id,
                                error = %persist_error,
                                "failed to persist partial answer"
                            );
                            None
                        }
                    }
                };
                let _ = events.send(TurnEvent::Failed {
                    error: provider_error.to_string(),
                    partial,
                });
            }
        }
    }

    async fn persist_streamed(
        &self,
        conversation_id: Uuid,
        content: &str,
        sources: Vec<SourceRef>,
        started: Instant,
    ) -> Result<ChatMessage, StoreError> {
        let message = ChatMessage::assistant(conversation_id, content)
            .with_sources(sources)
            .with_model(self.completer.model_name())
            .with_latency_ms(elapsed_ms(started))
            .with_token_count(answer_token_count(content));
        self.chats.append_message(&message).await?;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::local::{LocalCompletion, LocalEmbedding};
    use crate::stores::memory::MemoryStore;

    fn service_over(store: MemoryStore) -> ChatService {
        let config = RagConfig::default();
        let store = Arc::new(store);
        ChatService::from_config(
            &config,
            store.clone(),
            store,
            Arc::new(LocalEmbedding::new(config.local_embedding_dims)),
            Arc::new(LocalCompletion::new()),
        )
    }

    #[test]
    fn token_count_floors_at_one() {
        assert_eq!(answer_token_count(""), 1);
        assert_eq!(answer_token_count("   "), 1);
        assert_eq!(answer_token_count("two words"), 2);
    }

    #[test]
    fn containment_text_carries_the_provider_error() {
        let error = ProviderError::Request {
            provider: "openai",
            message: "connection reset".to_string(),
        };
        let text = containment_message(&error);
        assert!(text.starts_with("I encountered an error generating a response: "));
        assert!(text.contains("connection reset"));
    }

    #[tokio::test]
    async fn unknown_document_links_are_dropped_at_creation() {
        let service = service_over(MemoryStore::new());

        let convo = service
            .create_conversation("u1", None, None, &[Uuid::new_v4(), Uuid::new_v4()])
            .await
            .unwrap();
        assert_eq!(convo.title, "New Chat");

        let linked = service.linked_documents("u1", convo.id).await.unwrap();
        assert!(linked.is_empty());
    }

    #[tokio::test]
    async fn conversation_lifecycle_round_trip() {
        let service = service_over(MemoryStore::new());

        let convo = service
            .create_conversation("u1", Some("Research"), Some("Be terse."), &[])
            .await
            .unwrap();
        assert_eq!(convo.system_prompt.as_deref(), Some("Be terse."));

        let renamed = service
            .update_conversation("u1", convo.id, Some("Paper notes"), None)
            .await
            .unwrap();
        assert_eq!(renamed.title, "Paper notes");
        assert_eq!(renamed.system_prompt.as_deref(), Some("Be terse."));

        service.delete_conversation("u1", convo.id).await.unwrap();
        let err = service.get_conversation("u1", convo.id).await.unwrap_err();
        assert!(matches!(err, ChatError::ConversationNotFound));
    }

    #[tokio::test]
    async fn feedback_on_a_foreign_conversation_reads_as_not_found() {
        let service = service_over(MemoryStore::new());

        let convo = service
            .create_conversation("u1", None, None, &[])
            .await
            .unwrap();

        let err = service
            .set_feedback("intruder", convo.id, Uuid::new_v4(), Feedback::Up)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::ConversationNotFound));
    }
}
