//! Benchmarks for reconciliation.
//!
//! Run with: `cargo bench --package weft-preserve --bench reconcile_bench`
//!
//! # Performance Baselines
//!
//! - Keyed lists where every row matches and changes one field
//! - Keyed lists where the order is reversed
//! - Deep positional trees (no identity hints)

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use serde_json::{Value as Json, json};
use weft_core::Heap;
use weft_preserve::{PreserveOptions, reconcile_detailed};

// ============================================================================
// Data
// ============================================================================

fn rows(n: usize, version: u64, reversed: bool) -> Json {
    let mut rows: Vec<Json> = (0..n)
        .map(|i| {
            json!({
                "id": i,
                "label": format!("row {i}"),
                "version": version,
                "tags": ["a", "b"],
            })
        })
        .collect();
    if reversed {
        rows.reverse();
    }
    json!({ "rows": rows })
}

fn tree(depth: u32, version: u64) -> Json {
    if depth == 0 {
        return json!({ "leaf": version });
    }
    json!({
        "left": tree(depth - 1, version),
        "right": tree(depth - 1, version),
        "items": [version, version + 1],
    })
}

// ============================================================================
// Benchmarks
// ============================================================================

fn bench_keyed_lists(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile/keyed");
    for &n in &[100usize, 1_000, 10_000] {
        group.throughput(Throughput::Elements(n as u64));
        for (name, reversed) in [("update", false), ("reverse", true)] {
            let old_doc = rows(n, 1, false);
            let new_doc = rows(n, 2, reversed);
            group.bench_with_input(BenchmarkId::new(name, n), &n, |b, _| {
                b.iter_batched(
                    || {
                        let heap = Heap::new();
                        let old = heap.from_json(&old_doc);
                        let new = heap.from_json(&new_doc);
                        (heap, old, new)
                    },
                    |(heap, old, new)| {
                        black_box(
                            reconcile_detailed(&heap, &old, &new, &PreserveOptions::default())
                                .map(|r| r.merged),
                        )
                    },
                    criterion::BatchSize::LargeInput,
                );
            });
        }
    }
    group.finish();
}

fn bench_positional_tree(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile/tree");
    for &depth in &[6u32, 10] {
        let old_doc = tree(depth, 1);
        let new_doc = tree(depth, 2);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter_batched(
                || {
                    let heap = Heap::new();
                    let old = heap.from_json(&old_doc);
                    let new = heap.from_json(&new_doc);
                    (heap, old, new)
                },
                |(heap, old, new)| {
                    black_box(
                        reconcile_detailed(&heap, &old, &new, &PreserveOptions::default())
                            .map(|r| r.invalidated),
                    )
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_keyed_lists, bench_positional_tree);
criterion_main!(benches);
