//! Per-passage chains, the mix bus and the pipeline control surface

pub mod chain;
pub mod fader;
pub mod mixer;
pub mod pipeline;
pub mod ring_buffer;

pub use chain::{ChainOutcome, StreamChain};
pub use fader::{FadeProcessor, FadeState};
pub use mixer::{Mixer, MixerState, MixerStats};
pub use pipeline::{Pipeline, RetiredChain};
pub use ring_buffer::{ChainRingBuffer, FrameConsumer, FrameProducer};
