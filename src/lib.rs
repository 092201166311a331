//! # Ragweave: Retrieval-Augmented Chat Backend
//!
//! Ragweave turns a pile of uploaded documents into grounded, cited chat
//! answers. Documents are chunked into overlapping token windows, embedded,
//! and stored; each chat turn retrieves the best-matching chunks, assembles
//! a context-bearing prompt, and persists the generated answer together with
//! its provenance.
//!
//! ## Core Concepts
//!
//! - **Documents & Chunks**: Uploaded files move through
//!   `pending -> processing -> {ready, failed}`; only ready documents feed
//!   retrieval
//! - **Ingestion**: Validate, extract text, chunk by tokens, embed, persist
//!   atomically
//! - **Retrieval**: Cosine similarity over the owner's embedded chunks,
//!   deterministic top-k ranking
//! - **Turns**: Batch answers in one call, or streamed deltas with a
//!   terminal completed/failed event
//! - **Stores**: One trait pair with in-memory and SQLite backends
//! - **Providers**: OpenAI-compatible embedding/completion over HTTP, with
//!   deterministic local fallbacks for credential-less runs
//!
//! ## Quick Start
//!
//! ### Working with Messages
//!
//! Prompt messages use role-based typing with convenience constructors:
//!
//! ```
//! use ragweave::message::Message;
//!
//! let user_msg = Message::user("What does the handbook say about travel?");
//! let system_msg = Message::system("You are a helpful assistant.");
//!
//! assert!(user_msg.has_role(Message::USER));
//! assert!(!user_msg.has_role(Message::ASSISTANT));
//! ```
//!
//! ### Prompt Assembly
//!
//! Retrieved chunks become a context block between the system prompt and the
//! user's question; an empty retrieval still produces a well-formed prompt:
//!
//! ```
//! use ragweave::prompt::{assemble_prompt, DEFAULT_SYSTEM_PROMPT};
//!
//! let assembled = assemble_prompt(DEFAULT_SYSTEM_PROMPT, "What is ragweave?", &[]);
//! assert_eq!(assembled.messages.len(), 3);
//! assert!(assembled.messages[1].content.contains("No relevant context found."));
//! assert!(assembled.sources.is_empty());
//! ```
//!
//! ### Configuration
//!
//! [`config::RagConfig`] reads the environment (with `.env` support) and
//! validates itself before anything expensive runs:
//!
//! ```
//! use ragweave::config::RagConfig;
//!
//! let config = RagConfig::default().with_chunking(256, 32).with_top_k(3);
//! config.validate().unwrap();
//! assert!(RagConfig::default().with_chunking(10, 10).validate().is_err());
//! ```
//!
//! ### End to End
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ragweave::chat::ChatService;
//! use ragweave::config::RagConfig;
//! use ragweave::ingestion::{DocumentUpload, IngestionPipeline};
//! use ragweave::providers::{completion_provider_from_config, embedding_provider_from_config};
//! use ragweave::stores::memory::MemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> miette::Result<()> {
//!     let config = RagConfig::from_env();
//!     config.validate()?;
//!
//!     let store = Arc::new(MemoryStore::new());
//!     let embedder = embedding_provider_from_config(&config);
//!     let completer = completion_provider_from_config(&config);
//!
//!     let pipeline = IngestionPipeline::from_config(&config, store.clone(), embedder.clone())?;
//!     let document = pipeline
//!         .ingest(
//!             "alice",
//!             DocumentUpload::new(
//!                 "notes.md",
//!                 "text/markdown",
//!                 b"Weave retrieval context into every answer.".to_vec(),
//!             ),
//!         )
//!         .await?;
//!     println!("ingested {} ({})", document.title, document.status);
//!
//!     let chat = ChatService::from_config(&config, store.clone(), store, embedder, completer);
//!     let conversation = chat
//!         .create_conversation("alice", Some("Notes"), None, &[document.id])
//!         .await?;
//!     let answer = chat
//!         .send_message("alice", conversation.id, "What should every answer include?")
//!         .await?;
//!     println!("{}", answer.content);
//!     for source in &answer.sources {
//!         println!("  [{}:chunk_{}]", source.document_id, source.chunk_index);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Guide
//!
//! - [`models`] - Documents, chunks, conversations, messages, feedback
//! - [`config`] - Environment-driven configuration and validation
//! - [`ingestion`] - Upload validation and the extract/chunk/embed pipeline
//! - [`extract`] - Plain text, Markdown, PDF, and DOCX text extraction
//! - [`chunker`] - Overlapping token-window chunking
//! - [`similarity`] - Cosine similarity over embedding vectors
//! - [`retrieval`] - Query embedding and top-k chunk ranking
//! - [`prompt`] - Context formatting and prompt assembly
//! - [`chat`] - Conversation management and answer turns
//! - [`streaming`] - Turn events for streamed generation
//! - [`message`] - Prompt message primitives
//! - [`providers`] - Embedding and completion providers with retry
//! - [`stores`] - Storage traits plus in-memory and SQLite backends

pub mod chat;
pub mod chunker;
pub mod config;
pub mod extract;
pub mod ingestion;
pub mod message;
pub mod models;
pub mod prompt;
pub mod providers;
pub mod retrieval;
pub mod similarity;
pub mod stores;
pub mod streaming;
