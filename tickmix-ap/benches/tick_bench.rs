//! Tick conversion throughput
//!
//! Tick arithmetic sits on every frame of every chain; it should cost no
//! more than a multiply or a checked divide.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tickmix_common::timing::{align_up, samples_to_ticks, ticks_to_samples, SampleRate};

fn bench_tick_conversions(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick_conversions");
    let samples: Vec<i64> = vec![0, 100, 1000, 10_000, 100_000, 1_000_000];

    group.bench_function("samples_to_ticks", |b| {
        b.iter(|| {
            for &rate in &SampleRate::ALL {
                for &n in &samples {
                    black_box(samples_to_ticks(black_box(n), rate));
                }
            }
        });
    });

    group.bench_function("ticks_to_samples", |b| {
        let ticks: Vec<i64> = samples
            .iter()
            .map(|&n| samples_to_ticks(n, SampleRate::Hz44100))
            .collect();
        b.iter(|| {
            for &t in &ticks {
                let _ = black_box(ticks_to_samples(black_box(t), SampleRate::Hz44100));
            }
        });
    });

    group.bench_function("align_up", |b| {
        b.iter(|| {
            for t in 0..1000i64 {
                black_box(align_up(black_box(t * 641), SampleRate::Hz48000));
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_tick_conversions);
criterion_main!(benches);
