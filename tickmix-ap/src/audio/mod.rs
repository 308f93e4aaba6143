//! Audio stages and boundaries: frame types, decoding, resampling, output

pub mod decoder;
pub mod output;
pub mod resampler;
pub mod symphonia_decoder;
pub mod types;

pub use decoder::{DecodeError, DecodeErrorKind, Decoder, PcmDecoder};
pub use output::{FrameSource, NullSink, OutputSink, WavFileSink};
pub use resampler::Resampler;
pub use symphonia_decoder::SymphoniaDecoder;
pub use types::{AudioFrame, FadedFrame, OutputFormat, OutputFrame, SampleBits, TickedFrame};
