//! Microbenchmarks for the write and read hot paths.
//!
//! Measures per-cycle cost of staging writes, committing, and iterating the
//! committed view.
//!
//! Run with: `cargo bench -p metrix -- cycle`

#![allow(missing_docs, clippy::cast_precision_loss)]

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use metrix::{CollectorStore, ReadOptions, SnapshotGauge, StatefulCounter};

/// Creates a store with `series_count` gauges under one metric.
fn setup_store(series_count: u32) -> (CollectorStore, Vec<SnapshotGauge>) {
    let store = CollectorStore::new();
    let vec = store
        .write()
        .snapshot_meter("bench")
        .gauge_vec("value", &["id"], &[])
        .unwrap();

    let gauges = (0..series_count)
        .map(|i| {
            let id = i.to_string();
            vec.with_label_values(&[id.as_str()]).unwrap()
        })
        .collect();

    (store, gauges)
}

fn bench_observe_single(c: &mut Criterion) {
    let (store, gauges) = setup_store(1);
    let cc = store.cycle_controller();
    cc.begin_cycle().unwrap();

    c.bench_function("observe/single_series", |b| {
        b.iter(|| gauges[0].observe(black_box(42.5)));
    });

    cc.commit_cycle_success().unwrap();
}

fn bench_counter_add(c: &mut Criterion) {
    let store = CollectorStore::new();
    let counter: StatefulCounter = store
        .write()
        .stateful_meter("bench")
        .counter("ops_total", &[])
        .unwrap();
    let cc = store.cycle_controller();
    cc.begin_cycle().unwrap();

    c.bench_function("add/stateful_counter", |b| {
        b.iter(|| counter.add(black_box(1.0)));
    });

    cc.commit_cycle_success().unwrap();
}

fn bench_full_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("cycle/series_count");

    for count in [1, 10, 100, 1_000] {
        let (store, gauges) = setup_store(count);
        let cc = store.cycle_controller();

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                cc.begin_cycle().unwrap();
                for (i, g) in gauges.iter().enumerate() {
                    g.observe(black_box(i as f64));
                }
                cc.commit_cycle_success().unwrap();
            });
        });
    }

    group.finish();
}

fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("read/series_count");

    for count in [10, 100, 1_000] {
        let (store, gauges) = setup_store(count);
        let cc = store.cycle_controller();
        cc.begin_cycle().unwrap();
        for g in &gauges {
            g.observe(1.0);
        }
        cc.commit_cycle_success().unwrap();

        group.bench_with_input(BenchmarkId::new("filtered", count), &count, |b, _| {
            b.iter(|| {
                let mut sum = 0.0;
                store
                    .read(ReadOptions::default())
                    .for_each_match(black_box("bench.value{id=*\"1*\"}"), |_| true, |_, v| sum += v)
                    .unwrap();
                sum
            });
        });

        group.bench_with_input(BenchmarkId::new("raw", count), &count, |b, _| {
            b.iter(|| {
                let mut n = 0_usize;
                store.read(ReadOptions::raw()).for_each_series(|_| n += 1);
                n
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_observe_single,
    bench_counter_add,
    bench_full_cycle,
    bench_read,
);
criterion_main!(benches);
