//! Deterministic test audio
//!
//! In-memory decoders for pipeline tests and WAV files for the symphonia
//! adapter.

use hound::{WavSpec, WavWriter};
use std::f64::consts::TAU;
use std::path::Path;
use tickmix_ap::audio::PcmDecoder;
use tickmix_common::timing::SampleRate;

/// Mono decoder holding `seconds` of a constant value
pub fn constant_decoder(value: f32, rate: SampleRate, seconds: f64) -> PcmDecoder {
    let frames = (seconds * rate.hz() as f64).round() as usize;
    PcmDecoder::new(vec![value; frames], rate, 1)
}

/// Mono sine decoder
pub fn sine_decoder(freq_hz: f64, amplitude: f64, rate: SampleRate, seconds: f64) -> PcmDecoder {
    let frames = (seconds * rate.hz() as f64).round() as usize;
    let samples = (0..frames)
        .map(|n| (amplitude * (TAU * freq_hz * n as f64 / rate.hz() as f64).sin()) as f32)
        .collect();
    PcmDecoder::new(samples, rate, 1)
}

/// 16-bit sine WAV with `channels` identical channels
pub fn generate_sine_wav<P: AsRef<Path>>(
    path: P,
    rate: u32,
    channels: u16,
    frames: u32,
    freq_hz: f64,
    amplitude: f64,
) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for n in 0..frames {
        let value = amplitude * (TAU * freq_hz * n as f64 / rate as f64).sin();
        let sample = (value * i16::MAX as f64).round() as i16;
        for _ in 0..channels {
            writer.write_sample(sample)?;
        }
    }
    writer.finalize()?;
    Ok(())
}
