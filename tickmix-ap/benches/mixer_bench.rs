//! Mixer step cost with several chains on the bus
//!
//! Buffers are refilled outside the timed region, so only the output path
//! (command drain, pops, summation, quantization) is measured.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use std::sync::Arc;
use tickmix_ap::audio::{AudioFrame, FadedFrame};
use tickmix_ap::playback::chain::ChainShared;
use tickmix_ap::playback::mixer::{BusCommand, MixSlot};
use tickmix_ap::playback::{ChainRingBuffer, Mixer};
use tickmix_common::params::PipelineParams;
use tickmix_common::timing::{PassageTiming, TICK_RATE};
use uuid::Uuid;

const FRAMES: i64 = 4096;

fn loaded_mixer(chains: usize) -> Mixer {
    let mut params = PipelineParams::default();
    params.parallelism = chains;
    let (mixer, mut control) = Mixer::new(&params).unwrap();
    let timing = PassageTiming::unfaded(0, 10 * TICK_RATE);

    for _ in 0..chains {
        let (mut producer, consumer) = ChainRingBuffer::new(FRAMES as usize);
        for n in 0..FRAMES {
            let frame = FadedFrame {
                tick: n * 640,
                frame: AudioFrame::from_stereo(0.1, -0.1),
                gain: 0.5,
            };
            if producer.push(frame).is_err() {
                break;
            }
        }
        producer.mark_finished();
        let slot = MixSlot::new(
            Uuid::new_v4(),
            consumer,
            Arc::new(ChainShared::default()),
            &timing,
            Some(0),
        );
        if control.send(BusCommand::Add(slot)).is_err() {
            panic!("command queue full");
        }
    }
    mixer
}

fn bench_mix_steps(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixer_4096_frames");

    for chains in [1usize, 2, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(chains), &chains, |b, &chains| {
            b.iter_batched(
                || loaded_mixer(chains),
                |mut mixer| {
                    for _ in 0..FRAMES {
                        black_box(mixer.mix_step());
                    }
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_mix_steps);
criterion_main!(benches);
