//! Shared fixtures for tickmix-ap integration tests
//!
//! - `audio_generator`: constant and sine PCM, WAV files on disk
//! - `CaptureSink`: keeps every mixed frame for inspection

#![allow(dead_code)]

pub mod audio_generator;

use tickmix_ap::audio::{OutputFrame, OutputSink};
use tickmix_ap::Result;

pub use audio_generator::{constant_decoder, generate_sine_wav, sine_decoder};

/// Records every frame it is given
#[derive(Debug, Default)]
pub struct CaptureSink {
    pub frames: Vec<OutputFrame>,
}

impl CaptureSink {
    /// Left (or mono) channel of every captured frame
    pub fn left(&self) -> Vec<i32> {
        self.frames.iter().map(|f| f.samples[0]).collect()
    }

    /// Index of the first frame with any signal
    pub fn first_audible(&self) -> Option<usize> {
        self.frames.iter().position(|f| !f.is_silent())
    }
}

impl OutputSink for CaptureSink {
    fn write_frame(&mut self, frame: &OutputFrame) -> Result<()> {
        self.frames.push(*frame);
        Ok(())
    }
}
