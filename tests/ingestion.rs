mod common;
use common::*;

use std::sync::Arc;

use ragweave::ingestion::{DocumentUpload, IngestError, IngestionPipeline};
use ragweave::models::DocumentStatus;
use ragweave::providers::local::LocalEmbedding;
use ragweave::retrieval::Retriever;
use ragweave::stores::DocumentStore;
use ragweave::stores::memory::MemoryStore;

fn text_upload(filename: &str, text: &str) -> DocumentUpload {
    DocumentUpload::new(filename, "text/plain", text.as_bytes().to_vec())
}

#[tokio::test]
async fn failed_embedding_marks_the_document_and_persists_no_chunks() {
    let store = MemoryStore::new();
    let config = test_config();
    let pipeline = IngestionPipeline::from_config(
        &config,
        Arc::new(store.clone()),
        Arc::new(FailingEmbedder::default()),
    )
    .expect("pipeline");

    let doc = pipeline
        .ingest("u1", text_upload("notes.txt", "some words worth embedding"))
        .await
        .expect("pipeline failures are contained");

    assert_eq!(doc.status, DocumentStatus::Failed);
    let reason = doc.error_message.expect("failure reason");
    assert!(
        reason.contains("embedding backend unreachable"),
        "got: {reason}"
    );
    assert!(store.list_chunks("u1", doc.id).await.unwrap().is_empty());
    // The failed record still exists and still counts against the quota.
    assert_eq!(store.count_documents("u1").await.unwrap(), 1);
}

#[tokio::test]
async fn type_check_precedes_size_check() {
    let store = MemoryStore::new();
    let config = test_config().with_max_file_size_bytes(4);
    let pipeline = IngestionPipeline::from_config(
        &config,
        Arc::new(store),
        Arc::new(LocalEmbedding::new(16)),
    )
    .expect("pipeline");

    // Both checks would fail; the type error wins.
    let err = pipeline
        .ingest(
            "u1",
            DocumentUpload::new("photo.png", "image/png", vec![0u8; 64]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::UnsupportedType { .. }));
    assert_eq!(err.to_string(), "Unsupported file type: image/png");
}

#[tokio::test]
async fn quota_counts_documents_of_any_status() {
    let store = MemoryStore::new();
    let config = test_config().with_max_documents_per_owner(1);

    // First upload fails during embedding, leaving a failed record behind.
    let failing = IngestionPipeline::from_config(
        &config,
        Arc::new(store.clone()),
        Arc::new(FailingEmbedder::default()),
    )
    .expect("pipeline");
    let failed = failing
        .ingest("u1", text_upload("broken.txt", "text that never embeds"))
        .await
        .expect("contained failure");
    assert_eq!(failed.status, DocumentStatus::Failed);

    // The failed record still occupies the single quota slot.
    let healthy = IngestionPipeline::from_config(
        &config,
        Arc::new(store),
        Arc::new(LocalEmbedding::new(16)),
    )
    .expect("pipeline");
    let err = healthy
        .ingest("u1", text_upload("next.txt", "more text"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Document limit reached");
}

#[tokio::test]
async fn multi_chunk_documents_accumulate_counters() {
    let store = MemoryStore::new();
    let config = test_config().with_chunking(8, 2);
    let pipeline = IngestionPipeline::from_config(
        &config,
        Arc::new(store.clone()),
        Arc::new(LocalEmbedding::new(16)),
    )
    .expect("pipeline");

    let words: Vec<String> = (0..80).map(|i| format!("word{i}")).collect();
    let text = words.join(" ");
    let doc = pipeline
        .ingest("u1", text_upload("long.txt", &text))
        .await
        .expect("ingest");

    assert_eq!(doc.status, DocumentStatus::Ready);
    assert!(doc.chunk_count > 1, "chunk_count: {}", doc.chunk_count);

    let chunks = store.list_chunks("u1", doc.id).await.unwrap();
    assert_eq!(chunks.len() as u32, doc.chunk_count);

    let summed: u32 = chunks.iter().map(|c| c.token_count).sum();
    assert_eq!(summed, doc.total_tokens);

    for (position, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_index as usize, position);
        assert!(chunk.embedding.is_some());
        assert_eq!(chunk.metadata["document_title"], "long.txt");
        assert_eq!(chunk.metadata["chunk_index"], position);
        assert_eq!(chunk.metadata["total_chunks"], chunks.len());
    }
}

#[tokio::test]
async fn ingested_markdown_is_retrievable() {
    let store = Arc::new(MemoryStore::new());
    let config = test_config();
    let embedder = Arc::new(LocalEmbedding::new(16));
    let pipeline = IngestionPipeline::from_config(&config, store.clone(), embedder.clone())
        .expect("pipeline");

    let text = "Ownership rules: each value has a single owner and moves transfer it.";
    let doc = pipeline
        .ingest(
            "u1",
            DocumentUpload::new("guide.md", "text/markdown", text.as_bytes().to_vec()),
        )
        .await
        .expect("ingest");
    assert_eq!(doc.status, DocumentStatus::Ready);

    // Same text, same embedder: the chunk should come back as the top hit.
    let retriever = Retriever::from_config(&config, store, embedder);
    let hits = retriever.retrieve("u1", text, None).await.expect("retrieve");
    assert!(!hits.is_empty());
    assert_eq!(hits[0].document_title, "guide.md");
    assert!(
        hits[0].similarity > 0.999,
        "similarity: {}",
        hits[0].similarity
    );
}

#[tokio::test]
async fn seeded_fixture_walks_the_status_transitions() {
    let store = MemoryStore::new();
    let doc = seed_ready_document(
        &store,
        "u1",
        "seeded.txt",
        &[("alpha", vec![1.0, 0.0]), ("beta", vec![0.0, 1.0])],
    )
    .await;

    assert_eq!(doc.status, DocumentStatus::Ready);
    assert_eq!(doc.chunk_count, 2);

    // A ready document cannot be claimed again.
    assert!(!store.mark_processing(doc.id).await.unwrap());
}
