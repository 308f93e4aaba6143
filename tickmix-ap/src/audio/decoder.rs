//! Decoder boundary
//!
//! A [`Decoder`] yields the native-rate frames of one source, lazily and
//! exactly once, each tagged with its tick position. Tick 0 is the first
//! frame of the source; consecutive frames are exactly
//! `ticks_per_sample(native_rate)` apart.
//!
//! Container demuxing and codec work live behind this trait (see
//! [`SymphoniaDecoder`](super::symphonia_decoder::SymphoniaDecoder)).
//! [`PcmDecoder`] serves raw PCM already in memory.

use crate::audio::types::{AudioFrame, TickedFrame};
use std::fmt;
use thiserror::Error;
use tickmix_common::timing::{samples_to_ticks, SampleRate, Tick};

/// Failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// Underlying read failed
    Io,
    /// Bitstream is malformed
    Corrupt,
    /// Format, codec or rate not supported
    Unsupported,
}

impl fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DecodeErrorKind::Io => "I/O",
            DecodeErrorKind::Corrupt => "corrupt stream",
            DecodeErrorKind::Unsupported => "unsupported",
        };
        f.write_str(name)
    }
}

/// Decoding stopped at `position`
///
/// Fatal for the chain that owns the decoder; other chains are unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Decode error ({kind}) at tick {position}: {message}")]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    /// Tick of the first frame that could not be produced
    pub position: Tick,
    pub message: String,
}

impl DecodeError {
    pub fn new(kind: DecodeErrorKind, position: Tick, message: impl Into<String>) -> Self {
        Self {
            kind,
            position,
            message: message.into(),
        }
    }
}

/// Source of native-rate, tick-tagged frames
pub trait Decoder: Send {
    /// Native sample rate of the source
    fn sample_rate(&self) -> SampleRate;

    /// Channel count of the source before stereo folding
    fn channels(&self) -> u16;

    /// Next frame, `Ok(None)` at end of stream
    ///
    /// After `Ok(None)` or an error the decoder is exhausted.
    fn next_frame(&mut self) -> Result<Option<TickedFrame>, DecodeError>;

    /// Total length of the source, when the container declares it
    fn duration_ticks(&self) -> Option<Tick> {
        None
    }
}

impl<D: Decoder + ?Sized> Decoder for Box<D> {
    fn sample_rate(&self) -> SampleRate {
        (**self).sample_rate()
    }

    fn channels(&self) -> u16 {
        (**self).channels()
    }

    fn next_frame(&mut self) -> Result<Option<TickedFrame>, DecodeError> {
        (**self).next_frame()
    }

    fn duration_ticks(&self) -> Option<Tick> {
        (**self).duration_ticks()
    }
}

/// In-memory interleaved PCM
pub struct PcmDecoder {
    samples: Vec<f32>,
    rate: SampleRate,
    channels: u16,
    next_index: usize,
    /// Injected failure: report `Corrupt` instead of this frame index
    fail_at: Option<usize>,
}

impl PcmDecoder {
    /// `samples` is interleaved with `channels` values per frame; a trailing
    /// partial frame is ignored.
    pub fn new(samples: Vec<f32>, rate: SampleRate, channels: u16) -> Self {
        Self {
            samples,
            rate,
            channels: channels.max(1),
            next_index: 0,
            fail_at: None,
        }
    }

    /// Stereo decoder from a list of frames
    pub fn from_frames(frames: &[AudioFrame], rate: SampleRate) -> Self {
        let samples = frames.iter().flat_map(|f| [f.left, f.right]).collect();
        Self::new(samples, rate, 2)
    }

    /// Report a corrupt stream when frame `frame_index` is requested
    pub fn failing_at(mut self, frame_index: usize) -> Self {
        self.fail_at = Some(frame_index);
        self
    }

    /// Total number of whole frames
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels as usize
    }
}

impl Decoder for PcmDecoder {
    fn sample_rate(&self) -> SampleRate {
        self.rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn next_frame(&mut self) -> Result<Option<TickedFrame>, DecodeError> {
        let tick = samples_to_ticks(self.next_index as i64, self.rate);
        if self.fail_at == Some(self.next_index) {
            self.fail_at = None;
            self.next_index = self.frame_count();
            return Err(DecodeError::new(
                DecodeErrorKind::Corrupt,
                tick,
                "injected failure",
            ));
        }
        if self.next_index >= self.frame_count() {
            return Ok(None);
        }

        let ch = self.channels as usize;
        let start = self.next_index * ch;
        let frame = AudioFrame::from_channels(&self.samples[start..start + ch]);
        self.next_index += 1;
        Ok(Some(TickedFrame::new(tick, frame)))
    }

    fn duration_ticks(&self) -> Option<Tick> {
        Some(samples_to_ticks(self.frame_count() as i64, self.rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_ticks_are_contiguous() {
        let mut dec = PcmDecoder::new(vec![0.1, 0.2, 0.3], SampleRate::Hz48000, 1);
        let ticks: Vec<Tick> = std::iter::from_fn(|| dec.next_frame().unwrap())
            .map(|f| f.tick)
            .collect();
        assert_eq!(ticks, vec![0, 588, 1176]);
        assert_eq!(dec.next_frame().unwrap(), None);
    }

    #[test]
    fn test_pcm_mono_is_duplicated() {
        let mut dec = PcmDecoder::new(vec![0.25], SampleRate::Hz44100, 1);
        let frame = dec.next_frame().unwrap().unwrap().frame;
        assert_eq!(frame, AudioFrame::from_stereo(0.25, 0.25));
    }

    #[test]
    fn test_pcm_partial_frame_ignored() {
        let dec = PcmDecoder::new(vec![0.0; 5], SampleRate::Hz44100, 2);
        assert_eq!(dec.frame_count(), 2);
        assert_eq!(dec.duration_ticks(), Some(1280));
    }

    #[test]
    fn test_injected_failure_position() {
        let mut dec = PcmDecoder::new(vec![0.0; 10], SampleRate::Hz44100, 1).failing_at(3);
        for _ in 0..3 {
            assert!(dec.next_frame().unwrap().is_some());
        }
        let err = dec.next_frame().unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::Corrupt);
        assert_eq!(err.position, 3 * 640);
        assert_eq!(dec.next_frame().unwrap(), None);
    }
}
