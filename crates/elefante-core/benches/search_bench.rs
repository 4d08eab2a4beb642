//! Elefante retrieval benchmarks
//!
//! Benchmarks for the classification + fusion hot path using Criterion.
//! Run with: cargo bench -p elefante-core

use std::collections::HashMap;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use elefante_core::embeddings::{cosine_similarity, Embedder, HashEmbedder};
use elefante_core::search::{classify_query, min_max_normalize};

fn bench_classify_query(c: &mut Criterion) {
    let queries = [
        "what did we decide about it",
        "who created the billing service",
        "everything about Project Omega",
        "memories similar to this one",
        "rust ownership model",
    ];

    c.bench_function("classify_query", |b| {
        b.iter(|| {
            for q in &queries {
                black_box(classify_query(q, None, true));
            }
        })
    });
}

fn bench_min_max_normalize(c: &mut Criterion) {
    let raw: HashMap<String, f64> = (0..100)
        .map(|i| (format!("mem-{i}"), (i as f64).sin().abs()))
        .collect();

    c.bench_function("min_max_normalize_100", |b| {
        b.iter(|| {
            black_box(min_max_normalize(&raw));
        })
    });
}

fn bench_hash_embedder(c: &mut Criterion) {
    let embedder = HashEmbedder::new(384);
    c.bench_function("hash_embed_384d", |b| {
        b.iter(|| {
            black_box(
                embedder
                    .embed("the hybrid retrieval orchestrator fuses vector and graph signals")
                    .unwrap(),
            );
        })
    });
}

fn bench_cosine_similarity(c: &mut Criterion) {
    let embedder = HashEmbedder::new(384);
    let a = embedder.embed("dark mode editor preferences").unwrap();
    let b_vec = embedder.embed("editor theme settings").unwrap();

    c.bench_function("cosine_384d", |b| {
        b.iter(|| {
            black_box(cosine_similarity(&a, &b_vec));
        })
    });
}

criterion_group!(
    benches,
    bench_classify_query,
    bench_min_max_normalize,
    bench_hash_embedder,
    bench_cosine_similarity
);
criterion_main!(benches);
