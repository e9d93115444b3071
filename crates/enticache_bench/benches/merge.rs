//! Merge session benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use enticache_bench::{customer_graphs, customer_nodes, referencing_orders};
use enticache_core::{EntityManager, JsonResultsAdapter, MergeKind, MergeOptions, MergeStrategy};
use enticache_testkit::shop_metadata;
use std::sync::Arc;

/// Benchmark merging flat nodes into an empty cache.
fn bench_attach(c: &mut Criterion) {
    let mut group = c.benchmark_group("attach");
    let metadata = Arc::new(shop_metadata());
    let adapter = JsonResultsAdapter::new();

    for count in [100, 1000, 10000].iter() {
        let nodes = customer_nodes(*count);
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &nodes, |b, nodes| {
            b.iter(|| {
                let mut manager = EntityManager::with_config(Arc::clone(&metadata), Default::default());
                let outcome = manager.merge_query_results(black_box(nodes), &adapter).unwrap();
                black_box(outcome);
            });
        });
    }
    group.finish();
}

/// Benchmark re-merging nodes over a populated cache, per strategy.
fn bench_remerge(c: &mut Criterion) {
    let mut group = c.benchmark_group("remerge");
    let adapter = JsonResultsAdapter::new();
    let nodes = customer_nodes(1000);

    for strategy in [
        MergeStrategy::PreserveChanges,
        MergeStrategy::OverwriteChanges,
        MergeStrategy::SkipMerge,
    ] {
        group.bench_function(strategy.name(), |b| {
            let mut manager = EntityManager::new(shop_metadata());
            manager.merge_query_results(&nodes, &adapter).unwrap();
            let options = MergeOptions::new().with_strategy(strategy);

            b.iter(|| {
                let outcome = manager
                    .merge_nodes(black_box(&nodes), &adapter, options, MergeKind::Query)
                    .unwrap();
                black_box(outcome);
            });
        });
    }
    group.finish();
}

/// Benchmark nested graphs with inverse-collection maintenance.
fn bench_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph");
    let metadata = Arc::new(shop_metadata());
    let adapter = JsonResultsAdapter::new();

    for (orders, lines) in [(1, 1), (5, 5), (10, 20)].iter() {
        let nodes = customer_graphs(50, *orders, *lines);
        let entities = 50 * (1 + orders + orders * lines);
        group.throughput(Throughput::Elements(entities as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{orders}x{lines}")),
            &nodes,
            |b, nodes| {
                b.iter(|| {
                    let mut manager =
                        EntityManager::with_config(Arc::clone(&metadata), Default::default());
                    let outcome = manager.merge_query_results(black_box(nodes), &adapter).unwrap();
                    black_box(outcome);
                });
            },
        );
    }
    group.finish();
}

/// Benchmark `$ref` resolution.
fn bench_references(c: &mut Criterion) {
    let metadata = Arc::new(shop_metadata());
    let adapter = JsonResultsAdapter::new();
    let nodes = referencing_orders(1000, 20);

    c.bench_function("references", |b| {
        b.iter(|| {
            let mut manager = EntityManager::with_config(Arc::clone(&metadata), Default::default());
            let outcome = manager.merge_query_results(black_box(&nodes), &adapter).unwrap();
            black_box(outcome);
        });
    });
}

criterion_group!(
    benches,
    bench_attach,
    bench_remerge,
    bench_graph,
    bench_references,
);

criterion_main!(benches);
