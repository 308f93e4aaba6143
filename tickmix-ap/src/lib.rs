//! # tickmix audio pipeline (tickmix-ap)
//!
//! Sample-accurate multi-source playback: every passage gets a chain
//! (decoder → resampler → fade processor → ring buffer) on its own worker
//! thread, and the mixer sums all chains into one output stream on a shared
//! tick timeline.
//!
//! **Architecture:** symphonia for decoding, a tick-phased polyphase
//! resampler, ringbuf between workers and the mixer, hound/cpal sinks.
//!
//! Timing values are [`Tick`](tickmix_common::Tick)s throughout; see
//! [`tickmix_common::timing`].

pub mod audio;
pub mod error;
pub mod playback;

pub use error::{Error, Result};
pub use playback::{Mixer, Pipeline};
