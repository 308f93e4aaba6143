//! Crossfade envelope tests
//!
//! Two passages overlapping for one second: a LeadOut on the first and a
//! LeadIn on the second landing on the same mix positions.

mod helpers;

use helpers::{constant_decoder, CaptureSink};
use tickmix_ap::audio::{AudioFrame, FadedFrame, OutputSink, TickedFrame};
use tickmix_ap::playback::{FadeProcessor, Pipeline};
use tickmix_common::params::PipelineParams;
use tickmix_common::timing::{PassageTiming, SampleRate, Tick, TICK_RATE};
use tickmix_common::FadeCurve;
use uuid::Uuid;

const SECOND: Tick = TICK_RATE;

/// Gains a processor attaches to a constant signal over `[from, to)`
fn gains(timing: PassageTiming, params: &PipelineParams, from: Tick, to: Tick) -> Vec<(Tick, f32)> {
    let rate = SampleRate::Hz44100;
    let tps = rate.ticks_per_sample();
    let mut fader = FadeProcessor::new(timing, rate, params);
    let mut out: Vec<FadedFrame> = Vec::new();
    let mut tick = from;
    while tick < to {
        fader.process(TickedFrame::new(tick, AudioFrame::from_mono(0.5)), &mut out);
        tick += tps;
    }
    fader.flush(&mut out);
    out.into_iter().map(|f| (f.tick, f.gain)).collect()
}

#[test]
fn test_linear_crossfade_gain_sum() {
    let params = PipelineParams::default();
    let outgoing = PassageTiming::with_fades(0, 3 * SECOND, 0, SECOND);
    let incoming = PassageTiming::with_fades(0, 3 * SECOND, SECOND, 0);

    // Overlap: outgoing ticks [2s, 3s) against incoming ticks [0, 1s)
    let out_gains = gains(outgoing, &params, 2 * SECOND, 3 * SECOND);
    let in_gains = gains(incoming, &params, 0, SECOND);
    assert_eq!(out_gains.len(), in_gains.len());
    assert_eq!(out_gains.len(), 44_100);

    let sums: Vec<f64> = out_gains
        .iter()
        .zip(&in_gains)
        .map(|((_, a), (_, b))| *a as f64 + *b as f64)
        .collect();

    let midpoint = sums[sums.len() / 2];
    assert!((midpoint - 1.0).abs() < 1e-6, "midpoint sum {}", midpoint);
    for (i, sum) in sums.iter().enumerate() {
        assert!(*sum <= 1.0 + 1e-6, "sum {} above unity at frame {}", sum, i);
        assert!(*sum >= 1.0 - 1e-6, "sum {} dips at frame {}", sum, i);
    }

    // Ramps hit their end points
    assert_eq!(out_gains[0].1, 1.0);
    assert_eq!(in_gains[0].1, 0.0);
}

#[test]
fn test_equal_power_exceeds_unity_mid_fade() {
    let mut params = PipelineParams::default();
    params.fade_in_curve = FadeCurve::EqualPower;
    params.fade_out_curve = FadeCurve::EqualPower;
    let outgoing = PassageTiming::with_fades(0, 3 * SECOND, 0, SECOND);
    let incoming = PassageTiming::with_fades(0, 3 * SECOND, SECOND, 0);

    let out_gains = gains(outgoing, &params, 2 * SECOND, 3 * SECOND);
    let in_gains = gains(incoming, &params, 0, SECOND);
    let mid = out_gains.len() / 2;
    let sum = out_gains[mid].1 as f64 + in_gains[mid].1 as f64;
    assert!(sum > 1.4, "equal power midpoint sum {}", sum);
}

/// Render two constant passages crossfaded over one second
fn render_overlap(incoming_rate: SampleRate) -> (CaptureSink, tickmix_ap::playback::MixerStats) {
    let params = PipelineParams::default();
    let (mut pipeline, mut mixer) = Pipeline::new(params).unwrap();

    let outgoing = PassageTiming::with_fades(0, 3 * SECOND, 0, SECOND);
    let incoming = PassageTiming::with_fades(0, 3 * SECOND, SECOND, 0);

    pipeline
        .start_passage(
            Uuid::new_v4(),
            Box::new(constant_decoder(0.5, SampleRate::Hz44100, 3.0)),
            outgoing,
            Some(0),
        )
        .unwrap();
    pipeline
        .start_passage(
            Uuid::new_v4(),
            Box::new(constant_decoder(0.5, incoming_rate, 3.0)),
            incoming,
            Some(outgoing.lead_out_offset()),
        )
        .unwrap();

    let mut sink = CaptureSink::default();
    sink.render(&mut mixer, 5 * 44_100).unwrap();
    let stats = pipeline.stats();
    (sink, stats)
}

#[test]
fn test_one_second_overlap_is_continuous() {
    let (sink, stats) = render_overlap(SampleRate::Hz44100);
    let left = sink.left();
    assert_eq!(left.len(), 5 * 44_100);

    // 0.5 full scale throughout: before, during and after the overlap
    let expected = (0.5 * i16::MAX as f64).round() as i32;
    for (i, sample) in left.iter().enumerate() {
        assert!(
            (sample - expected).abs() <= 2,
            "frame {}: {} (expected {})",
            i,
            sample,
            expected
        );
    }
    assert_eq!(stats.underruns, 0);
    assert_eq!(stats.clipped_samples, 0);
}

#[test]
fn test_resampled_incoming_passage_crossfades() {
    let (sink, _) = render_overlap(SampleRate::Hz48000);
    let left = sink.left();
    let expected = (0.5 * i16::MAX as f64).round() as i32;

    // Skip the incoming passage's unfaded tail, where the filter runs out of input
    for (i, sample) in left[..(4.9 * 44_100.0) as usize].iter().enumerate() {
        assert!(
            (sample - expected).abs() <= 16,
            "frame {}: {} (expected {})",
            i,
            sample,
            expected
        );
    }
}

#[test]
fn test_output_ticks_are_contiguous() {
    let (sink, _) = render_overlap(SampleRate::Hz44100);
    assert_eq!(sink.frames[0].tick, 0);
    assert!(sink.frames.windows(2).all(|w| w[1].tick - w[0].tick == 640));
}
