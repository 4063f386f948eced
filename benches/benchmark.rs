//! Benchmarks for planweave's retrieval hot path.
//!
//! Run with: `cargo bench`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use planweave::retrieval::fusion::{RRF_K, reciprocal_rank_fusion};
use planweave::retrieval::keywords::extract_keywords;
use planweave::retrieval::mmr::mmr_select;
use planweave::store::cosine_similarity;

/// Deterministic pseudo-embedding for benchmark inputs.
fn bench_embedding(seed: usize, dimensions: usize) -> Vec<f32> {
    let mut vector = vec![0.0_f32; dimensions];
    let mut value = seed as f32 + 1.0;
    for slot in vector.iter_mut() {
        value = (value * 1.103_515_2 + 0.123_45) % 7.0;
        *slot = value - 3.5;
    }
    vector
}

/// Benchmark RRF fusion over two retrieval lanes.
fn bench_rrf_fusion(c: &mut Criterion) {
    let mut group = c.benchmark_group("rrf_fusion");

    for lane_size in [50usize, 500] {
        let keyword_lane: Vec<String> = (0..lane_size).map(|i| format!("node_{}", i)).collect();
        let semantic_lane: Vec<String> = (0..lane_size)
            .map(|i| format!("node_{}", (i * 7) % (lane_size * 2)))
            .collect();
        let lanes = vec![keyword_lane, semantic_lane];

        group.bench_with_input(
            BenchmarkId::new("two_lanes", lane_size),
            &lanes,
            |b, lanes| b.iter(|| std::hint::black_box(reciprocal_rank_fusion(lanes, RRF_K))),
        );
    }

    group.finish();
}

/// Benchmark MMR diversification over fused candidates.
fn bench_mmr(c: &mut Criterion) {
    let mut group = c.benchmark_group("mmr");

    for candidates in [50usize, 200] {
        let relevance: Vec<f32> = (0..candidates)
            .map(|i| 1.0 - i as f32 / candidates as f32)
            .collect();
        let embeddings: Vec<Vec<f32>> =
            (0..candidates).map(|i| bench_embedding(i, 384)).collect();

        group.bench_with_input(
            BenchmarkId::new("select_10", candidates),
            &(relevance, embeddings),
            |b, (relevance, embeddings)| {
                b.iter(|| std::hint::black_box(mmr_select(relevance, embeddings, 10, 0.7)))
            },
        );
    }

    group.finish();
}

/// Benchmark cosine similarity at a production embedding size.
fn bench_cosine(c: &mut Criterion) {
    let a = bench_embedding(1, 1536);
    let b_vec = bench_embedding(2, 1536);

    c.bench_function("cosine_1536", |b| {
        b.iter(|| std::hint::black_box(cosine_similarity(&a, &b_vec)))
    });
}

/// Benchmark query keyword extraction.
fn bench_keywords(c: &mut Criterion) {
    let query = "What is the emergency protocol for hospital evacuation during mass \
                 casualty incidents including triage surge capacity and staff recall";

    c.bench_function("extract_keywords", |b| {
        b.iter(|| std::hint::black_box(extract_keywords(query)))
    });
}

criterion_group!(benches, bench_rrf_fusion, bench_mmr, bench_cosine, bench_keywords);
criterion_main!(benches);
