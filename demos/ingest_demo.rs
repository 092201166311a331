//! Ingest Demo: Document Upload and Processing
//!
//! This demonstration walks a few uploads through the full ingestion
//! pipeline: validation, text extraction, token-window chunking, embedding,
//! and atomic persistence into an in-memory store.
//!
//! What You'll Learn:
//! 1. Configuration: Building and validating a `RagConfig`
//! 2. Providers: Credential-less runs fall back to the local hash embedder
//! 3. Ingestion: Upload validation and the document status lifecycle
//! 4. Chunk Inspection: Reading back the persisted chunks and their metadata
//! 5. Error Handling: Rejected uploads and failed documents
//!
//! Running This Demo:
//! ```bash
//! cargo run --example ingest_demo
//! ```

use std::sync::Arc;

use miette::Result;
use ragweave::config::RagConfig;
use ragweave::ingestion::{DocumentUpload, IngestError, IngestionPipeline};
use ragweave::providers::embedding_provider_from_config;
use ragweave::stores::memory::MemoryStore;
use ragweave::stores::DocumentStore;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            EnvFilter::from_default_env()
                .add_directive("ragweave=info".parse().unwrap())
                .add_directive("ingest_demo=info".parse().unwrap()),
        )
        .init();
}

fn init_miette() {
    // Pretty panic reports
    miette::set_panic_hook();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_miette();
    demo().await
}

async fn demo() -> Result<()> {
    info!("=== Ingestion Pipeline Demo ===\n");

    // Step 1: Configuration. Without OPENAI_API_KEY the provider factory
    // returns the deterministic local embedder, so the demo runs offline.
    info!("## Step 1: Configuration");
    let config = RagConfig::from_env().with_chunking(64, 8);
    config.validate()?;
    info!(
        "   chunk window: {} tokens, overlap {}",
        config.chunk_size_tokens, config.chunk_overlap_tokens
    );

    let store = Arc::new(MemoryStore::new());
    let embedder = embedding_provider_from_config(&config);
    info!("   embedding provider: {}", embedder.model_name());

    let pipeline = IngestionPipeline::from_config(&config, store.clone(), embedder)?;

    // Step 2: A successful upload moving pending -> processing -> ready.
    info!("\n## Step 2: Ingesting a Markdown document");
    let handbook = "\
# Travel Handbook

Employees may book flights up to 14 days in advance. Economy class is the
default for trips under six hours. Hotel bookings go through the internal
travel portal, and meal expenses are reimbursed against receipts.

## Approvals

Trips above the budget threshold need manager approval before booking.
";
    let document = pipeline
        .ingest(
            "alice",
            DocumentUpload::new("handbook.md", "text/markdown", handbook.as_bytes().to_vec()),
        )
        .await?;
    info!("   status: {}", document.status);
    info!("   total tokens: {}", document.total_tokens);

    let chunks = store.list_chunks("alice", document.id).await?;
    info!("   chunks persisted: {}", chunks.len());
    for chunk in &chunks {
        let preview: String = chunk.content.chars().take(48).collect();
        info!(
            "     chunk {} ({} tokens): {preview:?}...",
            chunk.chunk_index, chunk.token_count
        );
    }

    // Step 3: Validation failures never create a document record.
    info!("\n## Step 3: Rejected uploads");
    let rejected = pipeline
        .ingest(
            "alice",
            DocumentUpload::new("slides.pptx", "application/vnd.ms-powerpoint", vec![0; 16]),
        )
        .await;
    match rejected {
        Err(IngestError::UnsupportedType { mime_type }) => {
            info!("   rejected as expected: unsupported type {mime_type}");
        }
        other => panic!("expected an unsupported-type rejection, got {other:?}"),
    }
    let on_record = store.count_documents("alice").await?;
    info!("   documents on record for alice: {on_record}");

    // Step 4: Pipeline failures are recorded on the document instead.
    info!("\n## Step 4: A document that fails mid-pipeline");
    let empty = pipeline
        .ingest(
            "alice",
            DocumentUpload::new("blank.txt", "text/plain", b"   \n\t  ".to_vec()),
        )
        .await?;
    info!("   status: {}", empty.status);
    if let Some(error_message) = &empty.error_message {
        info!("   recorded error: {error_message}");
    }

    info!("\n=== Demo complete ===");
    info!("Next: run chat_demo to ask questions against the ingested content");
    Ok(())
}
