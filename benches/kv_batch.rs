//! Benchmarks for batched key-value access.
//!
//! Measures the adapter's chunking and decoding overhead against the
//! in-process store:
//! - `get_nodes` at sizes spanning one to several read windows
//! - `get_nodes` with parallel chunks
//! - `create_nodes` at sizes spanning several write windows

// Criterion macros generate items without docs - this is expected for benchmarks
// Benchmarks use expect/unwrap for simplicity - panics are acceptable in benchmarks
#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

use bcfs::models::Nodes;
use bcfs::storage::{Graph, InMemoryKvStore, KvGraphBackend, KvSettings};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;

const SOURCE: &str = "bench";

fn backend(max_concurrency: usize) -> KvGraphBackend {
    let store = Arc::new(InMemoryKvStore::with_default_tables());
    KvGraphBackend::new(
        store,
        KvSettings {
            max_concurrency,
            ..KvSettings::default()
        },
    )
}

fn populated(count: usize) -> Nodes {
    let mut nodes = Nodes::with_source(SOURCE);
    for i in 0..count {
        let props = &mut nodes.get_or_create(i.to_string()).properties;
        props.set_string("name", format!("file-{i}.txt"));
        props.set_number("size", (i * 512).to_string());
        props.set_binary("digest", vec![u8::try_from(i % 256).unwrap(); 32]);
    }
    nodes
}

fn request(count: usize) -> Nodes {
    let mut nodes = Nodes::with_source(SOURCE);
    for i in 0..count {
        nodes.get_or_create(i.to_string());
    }
    nodes
}

fn bench_get_nodes(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_nodes");
    for (count, concurrency) in [(100, 1), (1_000, 1), (1_000, 4), (5_000, 4)] {
        let backend = backend(concurrency);
        backend.create_nodes(populated(count)).unwrap();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(
            BenchmarkId::new(format!("concurrency_{concurrency}"), count),
            &count,
            |b, &count| {
                b.iter_batched(
                    || request(count),
                    |nodes| black_box(backend.get_nodes(nodes).unwrap()),
                    criterion::BatchSize::SmallInput,
                );
            },
        );
    }
    group.finish();
}

fn bench_create_nodes(c: &mut Criterion) {
    let mut group = c.benchmark_group("create_nodes");
    for count in [25, 250, 2_500] {
        let backend = backend(1);

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter_batched(
                || populated(count),
                |nodes| black_box(backend.create_nodes(nodes).unwrap()),
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_get_nodes, bench_create_nodes);
criterion_main!(benches);
