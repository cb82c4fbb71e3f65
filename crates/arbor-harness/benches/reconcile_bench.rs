//! Benchmarks for full render/commit cycles on the recording host.
//!
//! Measures:
//! - keyed list reorders (reverse, rotate) at several sizes
//! - re-rendering an unchanged element (bailout path)
//! - mounting a fresh list
//!
//! Run with: cargo bench -p arbor-harness --bench reconcile_bench

use arbor_core::{Node, host};
use arbor_harness::TestRenderer;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

fn keyed_list(keys: &[usize]) -> Node {
    host("ul")
        .children(keys.iter().map(|&k| {
            host("li")
                .key(k as u64)
                .child(k.to_string())
                .build()
        }))
        .build()
}

// =============================================================================
// Keyed reorder
// =============================================================================

fn bench_keyed_reorder(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile/keyed_reorder");

    for n in [16usize, 128, 1024] {
        group.throughput(Throughput::Elements(n as u64));
        let forward: Vec<usize> = (0..n).collect();
        let reversed: Vec<usize> = (0..n).rev().collect();
        let mut rotated = forward.clone();
        rotated.rotate_right(1);

        let mut r = TestRenderer::new();
        let lists = [keyed_list(&forward), keyed_list(&reversed)];
        let mut flip = 0;
        group.bench_with_input(BenchmarkId::new("reverse", n), &(), |b, _| {
            b.iter(|| {
                flip ^= 1;
                r.render(lists[flip].clone());
                r.take_ops();
                black_box(r.host().created());
            })
        });

        let mut r = TestRenderer::new();
        let lists = [keyed_list(&forward), keyed_list(&rotated)];
        let mut flip = 0;
        group.bench_with_input(BenchmarkId::new("rotate", n), &(), |b, _| {
            b.iter(|| {
                flip ^= 1;
                r.render(lists[flip].clone());
                r.take_ops();
                black_box(r.host().created());
            })
        });
    }

    group.finish();
}

// =============================================================================
// Bailout and mount
// =============================================================================

fn bench_unchanged_rerender(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile/unchanged");
    for n in [128usize, 1024] {
        let list = keyed_list(&(0..n).collect::<Vec<_>>());
        let mut r = TestRenderer::new();
        r.render(list.clone());
        group.bench_with_input(BenchmarkId::new("same_element", n), &list, |b, list| {
            b.iter(|| {
                r.render(list.clone());
                black_box(r.take_ops().len());
            })
        });
    }
    group.finish();
}

fn bench_mount(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile/mount");
    for n in [128usize, 1024] {
        group.throughput(Throughput::Elements(n as u64));
        let list = keyed_list(&(0..n).collect::<Vec<_>>());
        group.bench_with_input(BenchmarkId::new("fresh_root", n), &list, |b, list| {
            b.iter(|| {
                let mut r = TestRenderer::new();
                r.render(list.clone());
                black_box(r.snapshot().len())
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_keyed_reorder,
    bench_unchanged_rerender,
    bench_mount
);
criterion_main!(benches);
