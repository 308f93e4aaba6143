//! # tickmix Common Library
//!
//! Shared code for the tickmix playback pipeline:
//! - Tick-based timing (`timing`)
//! - Fade curve definitions and calculations (`fade_curves`)
//! - Validated pipeline parameters and presets (`params`)

pub mod fade_curves;
pub mod params;
pub mod timing;

pub use fade_curves::{FadeCurve, UnknownCurve};
pub use params::{ParamError, PipelineParams, Preset};
pub use timing::{PassageTiming, SampleRate, Tick, TimingError, TICK_RATE};
