// Benchmarks for lock ordering and acquisition
// Measures sibling sorting, acquirability checks and an uncontended acquire/release

use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use tessera_client::MemoryCoordinator;
use tessera_common::{READ_LOCK_NAME, WRITE_LOCK_NAME};
use tessera_recipes::driver::{read_is_acquirable, standard_is_acquirable};
use tessera_recipes::{InterProcessMutex, LockDriver};

fn contenders(count: usize) -> Vec<String> {
    // reversed so the sort has work to do
    (0..count)
        .rev()
        .map(|i| {
            let marker = if i % 10 == 0 { WRITE_LOCK_NAME } else { READ_LOCK_NAME };
            format!("{:032x}-{}{:010}", i * 7919, marker, i)
        })
        .collect()
}

fn bench_sort_children(c: &mut Criterion) {
    let mut group = c.benchmark_group("sort_children");
    let driver = LockDriver::Write;

    for size in [10, 100, 1000] {
        let children = contenders(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &children, |b, children| {
            b.iter(|| {
                let mut sorted = children.clone();
                sorted.sort_by(|a, b| driver.compare(a, b, WRITE_LOCK_NAME));
                black_box(sorted)
            })
        });
    }
    group.finish();
}

fn bench_is_acquirable(c: &mut Criterion) {
    let mut group = c.benchmark_group("is_acquirable");

    for size in [10, 100, 1000] {
        let mut children = contenders(size);
        children.sort_by(|a, b| LockDriver::Write.compare(a, b, WRITE_LOCK_NAME));
        let last = children[size - 1].clone();

        group.bench_with_input(BenchmarkId::new("standard", size), &children, |b, children| {
            b.iter(|| standard_is_acquirable(black_box(children), black_box(&last), 1))
        });
        group.bench_with_input(BenchmarkId::new("read", size), &children, |b, children| {
            b.iter(|| read_is_acquirable(black_box(children), black_box(&last)))
        });
    }
    group.finish();
}

fn bench_uncontended_acquire(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let server = MemoryCoordinator::new();
    let mutex = InterProcessMutex::new(Arc::new(server.connect()), "/bench/lock");

    c.bench_function("uncontended_acquire_release", |b| {
        b.to_async(&runtime).iter(|| async {
            mutex.acquire(Duration::from_secs(1)).await.unwrap();
            mutex.release().await.unwrap();
        })
    });
}

criterion_group!(
    benches,
    bench_sort_children,
    bench_is_acquirable,
    bench_uncontended_acquire
);
criterion_main!(benches);
