//! Benchmarks for graph traversal and hybrid search.
//!
//! Benchmark targets:
//! - Depth-2 neighborhood on a 1k-node graph: <5ms
//! - Hybrid search over 1k documents: <20ms
//! - Graph score calculation: <1µs
//!
//! Graphs are built in memory so the numbers reflect query cost rather than
//! disk I/O.

// Criterion macros generate items without docs - this is expected for benchmarks
// Benchmarks use expect/unwrap for simplicity - panics are acceptable in benchmarks
#![allow(missing_docs)]
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::cast_precision_loss,
    clippy::doc_markdown
)]

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use mnemos::services::graph_score;
use mnemos::{
    Entity, EntityType, GraphStore, HybridSearchConfig, HybridSearchOptions, InMemoryVectorIndex,
    MemoryGraph, NeighborhoodQuery, NewEntity, NewRelation, RelationType,
};

const TOPICS: [&str; 8] = [
    "parser", "storage", "network", "cache", "render", "auth", "config", "logging",
];

/// Builds a graph of `size` entities where node `i` calls `i + 1` and `i + 7`.
fn build_graph(size: usize) -> (MemoryGraph, Vec<Entity>) {
    let store = GraphStore::in_memory().expect("Failed to create in-memory store");
    let graph = MemoryGraph::new(
        store,
        Arc::new(InMemoryVectorIndex::new()),
        HybridSearchConfig::default(),
    );

    let entities: Vec<Entity> = (0..size)
        .map(|i| {
            let topic = TOPICS[i % TOPICS.len()];
            graph
                .add_entity(NewEntity::new(
                    EntityType::Function,
                    format!("{topic}_{i}"),
                    format!("{topic} helper number {i} handles {topic} requests"),
                ))
                .unwrap()
        })
        .collect();

    for (i, entity) in entities.iter().enumerate() {
        for step in [1, 7] {
            if let Some(target) = entities.get(i + step) {
                graph
                    .add_relation(
                        NewRelation::new(entity.id.clone(), target.id.clone(), RelationType::Calls)
                            .with_weight(0.5 + (i % 5) as f32 / 10.0),
                    )
                    .unwrap();
            }
        }
    }
    (graph, entities)
}

/// Benchmarks neighborhood expansion at increasing depth.
fn bench_neighborhood(c: &mut Criterion) {
    let mut group = c.benchmark_group("neighborhood");
    group.measurement_time(Duration::from_secs(5));

    let (graph, entities) = build_graph(1000);
    let seed = entities[500].id.clone();

    for depth in [1_u32, 2, 3] {
        group.bench_with_input(BenchmarkId::new("depth", depth), &depth, |b, &depth| {
            b.iter(|| {
                black_box(
                    graph
                        .store()
                        .get_neighborhood(&NeighborhoodQuery::new([seed.clone()]).with_depth(depth))
                        .unwrap(),
                )
            });
        });
    }

    group.finish();
}

/// Benchmarks hybrid search against pure semantic search.
fn bench_hybrid_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("hybrid_search");
    group.measurement_time(Duration::from_secs(5));

    let (graph, _) = build_graph(1000);
    let options = HybridSearchOptions::new().with_top_k(10);

    group.bench_function("hybrid", |b| {
        b.iter(|| black_box(graph.hybrid_search("storage requests", &options).unwrap()));
    });

    group.bench_function("semantic", |b| {
        b.iter(|| black_box(graph.semantic_search("storage requests", &options).unwrap()));
    });

    group.finish();
}

/// Benchmarks the connectivity score.
fn bench_graph_score(c: &mut Criterion) {
    let weights: Vec<f32> = (0..12).map(|i| i as f32 / 12.0).collect();
    c.bench_function("graph_score_12_edges", |b| {
        b.iter(|| black_box(graph_score(black_box(&weights), 5)));
    });
}

criterion_group!(
    benches,
    bench_neighborhood,
    bench_hybrid_search,
    bench_graph_score
);
criterion_main!(benches);
