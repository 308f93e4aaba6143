//! Error types for tickmix-ap
//!
//! Timing defects and configuration errors stop the operation that raised
//! them. Per-chain decode failures and underruns never surface here: they
//! degrade that chain to silence inside the pipeline.

use crate::audio::decoder::DecodeError;
use thiserror::Error;
use tickmix_common::params::ParamError;
use tickmix_common::timing::{SampleRate, Tick, TimingError};
use uuid::Uuid;

/// Main error type for tickmix-ap
#[derive(Error, Debug)]
pub enum Error {
    /// Tick misalignment, unsupported rate or malformed passage timing
    #[error(transparent)]
    Timing(#[from] TimingError),

    /// Invalid pipeline parameters
    #[error("Configuration error: {0}")]
    Param(#[from] ParamError),

    /// Decoder failure
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Frame tick did not follow the previous frame by exactly one sample period
    #[error("Non-monotonic tick: expected {expected}, got {actual}")]
    NonMonotonicTick { expected: Tick, actual: Tick },

    /// Ring buffer full (the rejected frame is returned separately)
    #[error("Ring buffer full")]
    BufferFull,

    /// Working rate change requested while chains are still active
    #[error("Cannot change working rate to {requested} with {active_chains} active chains")]
    RateReconfiguration {
        requested: SampleRate,
        active_chains: usize,
    },

    /// Admission limit reached
    #[error("Too many active chains (limit {limit})")]
    TooManyChains { limit: usize },

    /// A chain for this passage is already active
    #[error("Chain already active for passage {0}")]
    DuplicateChain(Uuid),

    /// No active chain for this passage
    #[error("No active chain for passage {0}")]
    ChainNotFound(Uuid),

    /// Audio output device or file sink errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using tickmix-ap Error
pub type Result<T> = std::result::Result<T, Error>;
