//! Chat Demo: Retrieval-Grounded Conversations
//!
//! This demonstration ingests a document, pins a conversation to it, and
//! runs both answer styles: a batch turn that returns the persisted message
//! in one call, and a streamed turn consumed delta by delta.
//!
//! What You'll Learn:
//! 1. Conversations: Creating and pinning a conversation to documents
//! 2. Batch Turns: `send_message` with cited sources and latency metadata
//! 3. Streamed Turns: Consuming `TurnEvent`s off a `TurnStream`
//! 4. Feedback: Rating a persisted assistant message
//! 5. History: Cursor pagination through the message log
//!
//! Without OPENAI_API_KEY the demo uses the deterministic local providers,
//! so answers are canned but the full retrieval and persistence paths run.
//!
//! Running This Demo:
//! ```bash
//! cargo run --example chat_demo
//! ```

use std::sync::Arc;

use miette::Result;
use ragweave::chat::ChatService;
use ragweave::config::RagConfig;
use ragweave::ingestion::{DocumentUpload, IngestionPipeline};
use ragweave::models::Feedback;
use ragweave::providers::{completion_provider_from_config, embedding_provider_from_config};
use ragweave::stores::memory::MemoryStore;
use ragweave::streaming::TurnEvent;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            EnvFilter::from_default_env()
                .add_directive("ragweave=info".parse().unwrap())
                .add_directive("chat_demo=info".parse().unwrap()),
        )
        .init();
}

fn init_miette() {
    miette::set_panic_hook();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_miette();
    demo().await
}

async fn demo() -> Result<()> {
    info!("=== Retrieval Chat Demo ===\n");

    // Step 1: Wire the service from one config and a shared in-memory store.
    info!("## Step 1: Service wiring");
    let config = RagConfig::from_env().with_chunking(64, 8).with_top_k(3);
    config.validate()?;

    let store = Arc::new(MemoryStore::new());
    let embedder = embedding_provider_from_config(&config);
    let completer = completion_provider_from_config(&config);
    info!("   completion provider: {}", completer.model_name());

    let pipeline = IngestionPipeline::from_config(&config, store.clone(), embedder.clone())?;
    let chat = ChatService::from_config(&config, store.clone(), store, embedder, completer);

    // Step 2: Ingest the knowledge the conversation will draw on.
    info!("\n## Step 2: Ingesting the source document");
    let notes = "\
Release checklist: tag the commit, run the full test suite, and publish the
changelog. Rollbacks revert the tag and redeploy the previous artifact.
Feature flags stay off until the canary run finishes.
";
    let document = pipeline
        .ingest(
            "alice",
            DocumentUpload::new("release.md", "text/markdown", notes.as_bytes().to_vec()),
        )
        .await?;
    info!("   {} is {}", document.title, document.status);

    // Step 3: A conversation pinned to that document.
    info!("\n## Step 3: Creating the conversation");
    let conversation = chat
        .create_conversation("alice", Some("Release process"), None, &[document.id])
        .await?;
    info!("   conversation: {}", conversation.title);

    // Step 4: Batch turn. The persisted answer carries sources and timing.
    info!("\n## Step 4: Batch turn");
    let answer = chat
        .send_message("alice", conversation.id, "How do we roll back a release?")
        .await?;
    info!("   answer: {}", answer.content);
    info!(
        "   model {:?}, latency {:?} ms, {} sources",
        answer.model,
        answer.latency_ms,
        answer.sources.len()
    );
    for source in &answer.sources {
        info!(
            "     [{}:chunk_{}] score {:.3}",
            source.document_id, source.chunk_index, source.similarity
        );
    }

    // Step 5: Streamed turn. Deltas arrive first, then one terminal event.
    info!("\n## Step 5: Streamed turn");
    let mut stream = chat
        .stream_message("alice", conversation.id, "What gates a feature flag?")
        .await?;
    let mut streamed = String::new();
    while let Some(event) = stream.recv().await {
        match event {
            TurnEvent::Delta { content } => streamed.push_str(&content),
            TurnEvent::Completed { message } => {
                info!("   streamed answer: {}", message.content);
                assert_eq!(streamed, message.content);

                // Step 6: Rate the answer we just received.
                let rated = chat
                    .set_feedback("alice", conversation.id, message.id, Feedback::Up)
                    .await?;
                info!("   feedback recorded: {:?}", rated.feedback);
            }
            TurnEvent::Failed { error, .. } => {
                info!("   turn failed: {error}");
            }
        }
    }

    // Step 7: Walk the history backwards one page at a time.
    info!("\n## Step 7: History pagination");
    let mut before = None;
    let mut page_number = 1;
    loop {
        let page = chat
            .list_messages("alice", conversation.id, 2, before)
            .await?;
        info!("   page {page_number}: {} message(s)", page.messages.len());
        for message in &page.messages {
            let preview: String = message.content.chars().take(40).collect();
            info!("     [{}] {preview}", message.role);
        }
        match page.messages.first() {
            Some(oldest) if page.has_more => {
                before = Some(oldest.id);
                page_number += 1;
            }
            _ => break,
        }
    }

    info!("\n=== Demo complete ===");
    Ok(())
}
