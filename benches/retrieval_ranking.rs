use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use ragweave::config::RagConfig;
use ragweave::models::{Chunk, Document};
use ragweave::providers::embedding_provider_from_config;
use ragweave::retrieval::Retriever;
use ragweave::similarity::cosine_similarity;
use ragweave::stores::DocumentStore;
use ragweave::stores::memory::MemoryStore;
use tokio::runtime::Runtime;

const VECTOR_DIMS: &[usize] = &[64, 384, 1536];
const CANDIDATE_COUNTS: &[usize] = &[100, 1_000, 10_000];

/// Deterministic non-degenerate vector so scores vary across candidates.
fn patterned_vector(dims: usize, seed: usize) -> Vec<f32> {
    (0..dims)
        .map(|i| ((i * 7 + seed) % 17) as f32 / 17.0 - 0.5)
        .collect()
}

async fn seeded_store(chunk_count: usize, dims: usize) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let document = Document::new("bench", "corpus.txt", "text/plain", 0);
    store.create_document(&document).await.expect("create");
    store.mark_processing(document.id).await.expect("claim");

    let chunks: Vec<Chunk> = (0..chunk_count)
        .map(|i| {
            Chunk::new(document.id, i as u32, &format!("chunk {i}"), 4)
                .with_embedding(patterned_vector(dims, i))
        })
        .collect();
    let total_tokens = (chunk_count * 4) as u32;
    store
        .complete_document(document.id, chunks, total_tokens)
        .await
        .expect("complete");
    store
}

fn bench_cosine_similarity(c: &mut Criterion) {
    let mut group = c.benchmark_group("cosine_similarity");

    for &dims in VECTOR_DIMS {
        let a = patterned_vector(dims, 1);
        let b_vec = patterned_vector(dims, 9);
        group.throughput(Throughput::Elements(dims as u64));
        group.bench_with_input(BenchmarkId::from_parameter(dims), &dims, |b, _| {
            b.iter(|| cosine_similarity(&a, &b_vec));
        });
    }

    group.finish();
}

fn bench_retrieval_rank(c: &mut Criterion) {
    let runtime = Runtime::new().expect("runtime");
    let config = RagConfig::default().with_top_k(5);
    let mut group = c.benchmark_group("retrieval_rank");

    for &count in CANDIDATE_COUNTS {
        let store = runtime.block_on(seeded_store(count, config.local_embedding_dims));
        let retriever = Retriever::from_config(
            &config,
            store.clone(),
            embedding_provider_from_config(&config),
        );

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.to_async(&runtime).iter(|| async {
                retriever
                    .retrieve("bench", "which chunk matches best", None)
                    .await
                    .expect("retrieve")
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_cosine_similarity, bench_retrieval_rank);
criterion_main!(benches);
