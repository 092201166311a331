#![allow(dead_code)]

use ragweave::config::RagConfig;
use ragweave::models::{Chunk, Document};
use ragweave::stores::DocumentStore;

/// Config with small windows and no hosted credentials, for fast tests.
pub fn test_config() -> RagConfig {
    RagConfig::default().with_chunking(64, 8).with_top_k(5)
}

/// Seeds one `Ready` document whose chunks carry the given contents and
/// embeddings, walking the real `pending -> processing -> ready` path.
pub async fn seed_ready_document(
    store: &dyn DocumentStore,
    owner_id: &str,
    title: &str,
    chunks: &[(&str, Vec<f32>)],
) -> Document {
    let document = Document::new(owner_id, title, "text/plain", 1024);
    store.create_document(&document).await.expect("create document");
    assert!(
        store
            .mark_processing(document.id)
            .await
            .expect("claim document"),
        "fresh document should be claimable"
    );

    let mut total_tokens = 0;
    let rows: Vec<Chunk> = chunks
        .iter()
        .enumerate()
        .map(|(index, (content, embedding))| {
            let token_count = u32::try_from(content.split_whitespace().count().max(1))
                .expect("token count fits");
            total_tokens += token_count;
            Chunk::new(document.id, index as u32, content, token_count)
                .with_embedding(embedding.clone())
        })
        .collect();

    assert!(
        store
            .complete_document(document.id, rows, total_tokens)
            .await
            .expect("complete document"),
        "claimed document should complete"
    );

    store
        .get_document(owner_id, document.id)
        .await
        .expect("reload document")
        .expect("document exists")
}
