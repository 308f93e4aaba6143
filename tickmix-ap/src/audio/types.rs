//! Core audio data types
//!
//! Frames flowing through a chain are stereo `f32` tagged with the tick at
//! which they sound. The mixer emits [`OutputFrame`]s in the configured
//! integer output format.

use crate::error::{Error, Result};
use tickmix_common::params::PipelineParams;
use tickmix_common::timing::Tick;

/// A single stereo sample (one frame of audio)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AudioFrame {
    /// Left channel sample
    pub left: f32,

    /// Right channel sample
    pub right: f32,
}

impl AudioFrame {
    /// Create a silent frame (0.0, 0.0)
    pub const fn zero() -> Self {
        AudioFrame { left: 0.0, right: 0.0 }
    }

    /// Create a frame from mono sample (duplicate to both channels)
    pub const fn from_mono(sample: f32) -> Self {
        AudioFrame {
            left: sample,
            right: sample,
        }
    }

    pub const fn from_stereo(left: f32, right: f32) -> Self {
        AudioFrame { left, right }
    }

    /// Build a stereo frame from one interleaved frame of `samples.len()` channels
    ///
    /// Mono is duplicated. With more than two channels, even-indexed channels
    /// are averaged into left and odd-indexed into right.
    pub fn from_channels(samples: &[f32]) -> Self {
        match samples.len() {
            0 => AudioFrame::zero(),
            1 => AudioFrame::from_mono(samples[0]),
            2 => AudioFrame::from_stereo(samples[0], samples[1]),
            n => {
                let (mut left, mut right) = (0.0f32, 0.0f32);
                for (i, s) in samples.iter().enumerate() {
                    if i % 2 == 0 {
                        left += s;
                    } else {
                        right += s;
                    }
                }
                let left_count = n.div_ceil(2) as f32;
                let right_count = (n / 2) as f32;
                AudioFrame::from_stereo(left / left_count, right / right_count)
            }
        }
    }

    /// Mean of the squared channel samples
    pub fn mean_square(&self) -> f64 {
        let l = self.left as f64;
        let r = self.right as f64;
        (l * l + r * r) * 0.5
    }
}

/// Frame tagged with its tick position (decoder and resampler output)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickedFrame {
    pub tick: Tick,
    pub frame: AudioFrame,
}

impl TickedFrame {
    pub const fn new(tick: Tick, frame: AudioFrame) -> Self {
        Self { tick, frame }
    }
}

/// Frame with the fade gain that applies to it (ring buffer element)
///
/// The gain is not yet multiplied in; the mixer applies it while summing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadedFrame {
    pub tick: Tick,
    pub frame: AudioFrame,
    pub gain: f32,
}

/// Output sample width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleBits {
    Bits16,
    Bits24,
    Bits32,
}

impl SampleBits {
    pub fn bits(&self) -> u16 {
        match self {
            SampleBits::Bits16 => 16,
            SampleBits::Bits24 => 24,
            SampleBits::Bits32 => 32,
        }
    }

    /// Largest representable sample value
    pub fn max_value(&self) -> i32 {
        match self {
            SampleBits::Bits16 => i16::MAX as i32,
            SampleBits::Bits24 => (1 << 23) - 1,
            SampleBits::Bits32 => i32::MAX,
        }
    }

    /// Smallest representable sample value
    pub fn min_value(&self) -> i32 {
        match self {
            SampleBits::Bits16 => i16::MIN as i32,
            SampleBits::Bits24 => -(1 << 23),
            SampleBits::Bits32 => i32::MIN,
        }
    }
}

impl TryFrom<u16> for SampleBits {
    type Error = Error;

    fn try_from(bits: u16) -> Result<Self> {
        match bits {
            16 => Ok(SampleBits::Bits16),
            24 => Ok(SampleBits::Bits24),
            32 => Ok(SampleBits::Bits32),
            other => Err(Error::AudioOutput(format!(
                "Unsupported output sample width: {} bits",
                other
            ))),
        }
    }
}

/// Output format, fixed before the pipeline starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    /// 1 (mono) or 2 (stereo)
    pub channels: u16,
    pub bits: SampleBits,
}

impl OutputFormat {
    pub fn from_params(params: &PipelineParams) -> Result<Self> {
        if !(1..=2).contains(&params.output_channels) {
            return Err(Error::AudioOutput(format!(
                "Unsupported output channel count: {}",
                params.output_channels
            )));
        }
        Ok(Self {
            channels: params.output_channels,
            bits: SampleBits::try_from(params.output_bits)?,
        })
    }

    /// Convert a mixed sample in [-1.0, 1.0] full scale to the output range
    ///
    /// Returns the converted value and whether it had to be saturated.
    pub fn quantize(&self, sample: f64) -> (i32, bool) {
        let max = self.bits.max_value() as f64;
        let min = self.bits.min_value() as f64;
        let scaled = (sample * max).round();
        if scaled > max {
            (self.bits.max_value(), true)
        } else if scaled < min {
            (self.bits.min_value(), true)
        } else {
            (scaled as i32, false)
        }
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self {
            channels: 2,
            bits: SampleBits::Bits16,
        }
    }
}

/// One frame of mixer output
///
/// `samples[1]` is unused (zero) when `channels == 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFrame {
    pub tick: Tick,
    pub channels: u16,
    pub samples: [i32; 2],
}

impl OutputFrame {
    pub const fn silence(tick: Tick, channels: u16) -> Self {
        Self {
            tick,
            channels,
            samples: [0, 0],
        }
    }

    pub fn is_silent(&self) -> bool {
        self.samples == [0, 0]
    }

    /// Active samples (one or two)
    pub fn as_slice(&self) -> &[i32] {
        &self.samples[..self.channels as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_channels_folding() {
        assert_eq!(AudioFrame::from_channels(&[0.5]), AudioFrame::from_mono(0.5));
        assert_eq!(
            AudioFrame::from_channels(&[0.1, 0.2]),
            AudioFrame::from_stereo(0.1, 0.2)
        );
        // 5.1 style layout: L, R, C, LFE, Ls, Rs
        let f = AudioFrame::from_channels(&[0.3, 0.6, 0.3, 0.0, 0.3, 0.6]);
        assert!((f.left - 0.3).abs() < 1e-6);
        assert!((f.right - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_quantize_saturates() {
        let fmt = OutputFormat::default();
        assert_eq!(fmt.quantize(0.0), (0, false));
        assert_eq!(fmt.quantize(1.0), (32767, false));
        assert_eq!(fmt.quantize(1.8), (32767, true));
        assert_eq!(fmt.quantize(-1.8), (-32768, true));
    }

    #[test]
    fn test_quantize_24_and_32_bit() {
        let fmt24 = OutputFormat {
            channels: 2,
            bits: SampleBits::Bits24,
        };
        assert_eq!(fmt24.quantize(1.0), (8_388_607, false));
        assert_eq!(fmt24.quantize(-4.0), (-8_388_608, true));

        let fmt32 = OutputFormat {
            channels: 1,
            bits: SampleBits::Bits32,
        };
        assert_eq!(fmt32.quantize(2.0), (i32::MAX, true));
        assert_eq!(fmt32.quantize(-2.0), (i32::MIN, true));
    }

    #[test]
    fn test_output_format_from_params() {
        let mut params = PipelineParams::default();
        assert_eq!(OutputFormat::from_params(&params).unwrap(), OutputFormat::default());
        params.output_bits = 12;
        assert!(OutputFormat::from_params(&params).is_err());
    }

    #[test]
    fn test_output_frame_slice() {
        let mono = OutputFrame {
            tick: 0,
            channels: 1,
            samples: [7, 0],
        };
        assert_eq!(mono.as_slice(), &[7]);
        assert!(OutputFrame::silence(640, 2).is_silent());
    }
}
