//! Benchmarks for xds-cache operations.
//!
//! Run with: `cargo bench --package xds-cache`
//!
//! These benchmarks measure:
//! - Apply with and without content-derived versions
//! - Snapshot reads under a growing resource count
//! - Mixed read/apply workload

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use xds_cache::ResourceVersionStore;
use xds_core::{Cluster, Resource, TypeUrl};

fn clusters(count: usize, timeout_ms: u64) -> Vec<Resource> {
    (0..count)
        .map(|i| {
            Resource::Cluster(Cluster {
                name: format!("cluster-{i}"),
                eds_service_name: None,
                connect_timeout: Duration::from_millis(timeout_ms),
            })
        })
        .collect()
}

/// Benchmark apply with explicit versions.
fn bench_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply");

    for count in [1, 10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let store = ResourceVersionStore::new();
            let mut version = 0u64;
            b.iter(|| {
                version += 1;
                store
                    .apply(TypeUrl::CLUSTER, version.to_string(), clusters(count, 1))
                    .expect("apply");
            });
        });
    }

    group.finish();
}

/// Benchmark apply with content-derived versions (hashing every resource).
fn bench_apply_versioned(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_versioned");

    for count in [1, 10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let store = ResourceVersionStore::new();
            b.iter(|| {
                black_box(store.apply_versioned(TypeUrl::CLUSTER, clusters(count, 1)).expect("apply"));
            });
        });
    }

    group.finish();
}

/// Benchmark snapshot reads.
fn bench_snapshot_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_read");

    for count in [1, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let store = ResourceVersionStore::new();
            store.apply(TypeUrl::CLUSTER, "v1", clusters(count, 1)).expect("apply");
            b.iter(|| {
                black_box(store.snapshot(TypeUrl::CLUSTER));
            });
        });
    }

    group.finish();
}

/// Benchmark mixed read/write workload.
fn bench_mixed_workload(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixed_workload");

    // 90% reads, 10% writes
    group.bench_function("90_read_10_write", |b| {
        let store = ResourceVersionStore::new();
        store.apply(TypeUrl::CLUSTER, "0", clusters(50, 0)).expect("apply");

        let mut counter = 0u64;
        b.iter(|| {
            counter += 1;
            if counter % 10 == 0 {
                store
                    .apply(TypeUrl::CLUSTER, counter.to_string(), clusters(50, counter))
                    .expect("apply");
            } else {
                black_box(store.snapshot(TypeUrl::CLUSTER));
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_apply,
    bench_apply_versioned,
    bench_snapshot_read,
    bench_mixed_workload
);
criterion_main!(benches);
