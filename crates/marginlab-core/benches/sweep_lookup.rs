//! Sweep table lookup benchmarks.
//!
//! Measures:
//! - single lookup in a dense group (1024 margins)
//! - lookup across a realistic grid (12 × 12 × 6 points, 256 samples each)
//! - table build from raw samples
//!
//! Run with: cargo bench --package marginlab-core

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use marginlab_core::noise::NoiseSetting;
use marginlab_core::sweep::{SweepSample, SweepTable};

fn grid_samples(freqs: usize, syms: usize, powers: usize, per_point: usize) -> Vec<SweepSample> {
    let mut out = Vec::with_capacity(freqs * syms * powers * per_point);
    for f in 0..freqs {
        for s in 0..syms {
            for p in 0..powers {
                for n in 0..per_point {
                    out.push(SweepSample {
                        frequency: 950.0 + 100.0 * f as f64,
                        symbol_rate: 1.0 + 5.0 * s as f64,
                        power: -30.0 + 5.0 * p as f64,
                        noise: NoiseSetting::from_dec(0x1C000 + 4 * n as u32),
                        locked: true,
                        margin_db: 15.0 - 0.07 * n as f64,
                    });
                }
            }
        }
    }
    out
}

fn bench_lookup_dense_group(c: &mut Criterion) {
    let table = SweepTable::build(grid_samples(1, 1, 1, 1024));
    let mut group = c.benchmark_group("lookup_dense_group");
    group.throughput(Throughput::Elements(1));
    group.bench_function("1024_margins", |b| {
        b.iter(|| table.lookup(black_box(950.0), black_box(1.0), black_box(-30.0), black_box(3.3)))
    });
    group.finish();
}

fn bench_lookup_grid(c: &mut Criterion) {
    let table = SweepTable::build(grid_samples(12, 12, 6, 256));
    let mut group = c.benchmark_group("lookup_grid");
    group.throughput(Throughput::Elements(1));
    group.bench_function("864_points", |b| {
        b.iter(|| {
            table.lookup(
                black_box(1550.0),
                black_box(31.0),
                black_box(-10.0),
                black_box(6.2),
            )
        })
    });
    group.finish();
}

fn bench_build(c: &mut Criterion) {
    let samples = grid_samples(4, 4, 4, 256);
    let mut group = c.benchmark_group("table_build");
    group.throughput(Throughput::Elements(samples.len() as u64));
    group.bench_function("16k_samples", |b| {
        b.iter(|| SweepTable::build(black_box(samples.clone())))
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_lookup_dense_group,
    bench_lookup_grid,
    bench_build
);
criterion_main!(benches);
