//! Tick-based timing system for sample-accurate audio timing
//!
//! This module provides the core timing abstraction for tickmix, using a unified
//! tick rate of 28,224,000 Hz that divides evenly into every supported audio
//! sample rate (8 kHz to 192 kHz).
//!
//! # Architecture
//!
//! tickmix uses two time representations:
//!
//! 1. **Ticks**: `i64` values at 28,224,000 Hz. Stored, transmitted and used
//!    for all sample arithmetic.
//! 2. **Samples**: `i64` frame counts at a specific [`SampleRate`], derived
//!    from ticks by exact integer division.
//!
//! Seconds exist only for display and logging ([`ticks_to_seconds`]).
//!
//! ## Tick Rate Selection
//!
//! 28,224,000 is the LCM of the supported sample rates:
//!
//! - 44,100 Hz: 28,224,000 ÷ 44,100 = 640 ticks/sample
//! - 48,000 Hz: 28,224,000 ÷ 48,000 = 588 ticks/sample
//! - 192,000 Hz: 28,224,000 ÷ 192,000 = 147 ticks/sample
//! - 8,000 Hz: 28,224,000 ÷ 8,000 = 3,528 ticks/sample
//!
//! A timing point expressed in ticks can therefore be re-expressed at any
//! working rate without rounding, no matter how often that rate changes.
//!
//! # Examples
//!
//! ```rust
//! use tickmix_common::timing::*;
//!
//! let rate = SampleRate::Hz44100;
//! let ticks = samples_to_ticks(100, rate);
//! assert_eq!(ticks, 64_000);
//! assert_eq!(ticks_to_samples(ticks, rate).unwrap(), 100);
//!
//! // 641 ticks is not on a 44.1kHz sample boundary
//! assert!(ticks_to_samples(641, rate).is_err());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// Constants
// ============================================================================

/// Time value in ticks (1/28,224,000 second)
pub type Tick = i64;

/// Tick rate: 28,224,000 Hz
///
/// LCM of all supported sample rates.
pub const TICK_RATE: i64 = 28_224_000;

/// Ticks per millisecond: 28,224
pub const TICKS_PER_MS: i64 = 28_224;

// ============================================================================
// Errors
// ============================================================================

/// Timing defects
///
/// These are programming or data errors. They are never silently rounded away.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimingError {
    /// A tick value does not fall on a sample boundary of the target rate
    #[error("Misaligned tick: {ticks} is not a multiple of {ticks_per_sample} ticks/sample at {rate}")]
    MisalignedTick {
        ticks: Tick,
        rate: SampleRate,
        ticks_per_sample: i64,
    },

    /// Sample rate outside the supported set
    #[error("Unsupported sample rate: {0} Hz")]
    UnsupportedSampleRate(u32),

    /// PassageTiming ordering or duration invariant violated
    #[error("Invalid passage timing: {0}")]
    InvalidPassageTiming(String),
}

// ============================================================================
// Sample Rates
// ============================================================================

/// Supported sample rates
///
/// | Rate (Hz) | Ticks/Sample |
/// |-----------|--------------|
/// | 8,000     | 3,528        |
/// | 11,025    | 2,560        |
/// | 16,000    | 1,764        |
/// | 22,050    | 1,280        |
/// | 32,000    | 882          |
/// | 44,100    | 640          |
/// | 48,000    | 588          |
/// | 88,200    | 320          |
/// | 96,000    | 294          |
/// | 176,400   | 160          |
/// | 192,000   | 147          |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum SampleRate {
    Hz8000,
    Hz11025,
    Hz16000,
    Hz22050,
    Hz32000,
    Hz44100,
    Hz48000,
    Hz88200,
    Hz96000,
    Hz176400,
    Hz192000,
}

impl SampleRate {
    /// Every supported rate, ascending
    pub const ALL: [SampleRate; 11] = [
        SampleRate::Hz8000,
        SampleRate::Hz11025,
        SampleRate::Hz16000,
        SampleRate::Hz22050,
        SampleRate::Hz32000,
        SampleRate::Hz44100,
        SampleRate::Hz48000,
        SampleRate::Hz88200,
        SampleRate::Hz96000,
        SampleRate::Hz176400,
        SampleRate::Hz192000,
    ];

    /// Rate in Hz
    pub const fn hz(self) -> u32 {
        match self {
            SampleRate::Hz8000 => 8_000,
            SampleRate::Hz11025 => 11_025,
            SampleRate::Hz16000 => 16_000,
            SampleRate::Hz22050 => 22_050,
            SampleRate::Hz32000 => 32_000,
            SampleRate::Hz44100 => 44_100,
            SampleRate::Hz48000 => 48_000,
            SampleRate::Hz88200 => 88_200,
            SampleRate::Hz96000 => 96_000,
            SampleRate::Hz176400 => 176_400,
            SampleRate::Hz192000 => 192_000,
        }
    }

    /// Exact number of ticks in one sample period at this rate
    pub const fn ticks_per_sample(self) -> i64 {
        match self {
            SampleRate::Hz8000 => 3_528,
            SampleRate::Hz11025 => 2_560,
            SampleRate::Hz16000 => 1_764,
            SampleRate::Hz22050 => 1_280,
            SampleRate::Hz32000 => 882,
            SampleRate::Hz44100 => 640,
            SampleRate::Hz48000 => 588,
            SampleRate::Hz88200 => 320,
            SampleRate::Hz96000 => 294,
            SampleRate::Hz176400 => 160,
            SampleRate::Hz192000 => 147,
        }
    }

    /// Look up a rate by its value in Hz
    pub fn from_hz(hz: u32) -> Result<Self, TimingError> {
        SampleRate::ALL
            .iter()
            .copied()
            .find(|rate| rate.hz() == hz)
            .ok_or(TimingError::UnsupportedSampleRate(hz))
    }
}

impl TryFrom<u32> for SampleRate {
    type Error = TimingError;

    fn try_from(hz: u32) -> Result<Self, Self::Error> {
        SampleRate::from_hz(hz)
    }
}

impl From<SampleRate> for u32 {
    fn from(rate: SampleRate) -> u32 {
        rate.hz()
    }
}

impl fmt::Display for SampleRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz", self.hz())
    }
}

// ============================================================================
// Core Conversion Functions
// ============================================================================

/// Get ticks per sample for a sample rate
///
/// ```rust
/// use tickmix_common::timing::{ticks_per_sample, SampleRate};
///
/// assert_eq!(ticks_per_sample(SampleRate::Hz44100), 640);
/// assert_eq!(ticks_per_sample(SampleRate::Hz192000), 147);
/// assert_eq!(ticks_per_sample(SampleRate::Hz8000), 3_528);
/// ```
pub fn ticks_per_sample(rate: SampleRate) -> i64 {
    rate.ticks_per_sample()
}

/// Convert ticks to a sample count at `rate`
///
/// Fails with [`TimingError::MisalignedTick`] unless `ticks` is an exact
/// multiple of `ticks_per_sample(rate)`. The result is never rounded.
///
/// ```rust
/// use tickmix_common::timing::{ticks_to_samples, SampleRate};
///
/// assert_eq!(ticks_to_samples(28_224_000, SampleRate::Hz48000).unwrap(), 48_000);
/// assert!(ticks_to_samples(1, SampleRate::Hz48000).is_err());
/// ```
pub fn ticks_to_samples(ticks: Tick, rate: SampleRate) -> Result<i64, TimingError> {
    let tps = rate.ticks_per_sample();
    if ticks % tps != 0 {
        return Err(TimingError::MisalignedTick {
            ticks,
            rate,
            ticks_per_sample: tps,
        });
    }
    Ok(ticks / tps)
}

/// Convert a sample count at `rate` to ticks
///
/// Exact for every supported rate; there is no failure mode.
///
/// ```rust
/// use tickmix_common::timing::{samples_to_ticks, SampleRate};
///
/// assert_eq!(samples_to_ticks(1, SampleRate::Hz44100), 640);
/// assert_eq!(samples_to_ticks(44_100, SampleRate::Hz44100), 28_224_000);
/// ```
pub fn samples_to_ticks(samples: i64, rate: SampleRate) -> Tick {
    samples * rate.ticks_per_sample()
}

/// Convert ticks to seconds
///
/// For display and logging only. Never store or compute timing from the result.
pub fn ticks_to_seconds(ticks: Tick) -> f64 {
    ticks as f64 / TICK_RATE as f64
}

/// Convert milliseconds to ticks (lossless)
pub fn ms_to_ticks(milliseconds: i64) -> Tick {
    milliseconds * TICKS_PER_MS
}

/// Convert ticks to milliseconds using truncating division
pub fn ticks_to_ms(ticks: Tick) -> i64 {
    ticks / TICKS_PER_MS
}

/// Whether `ticks` lies on a sample boundary at `rate`
pub fn is_aligned(ticks: Tick, rate: SampleRate) -> bool {
    ticks.rem_euclid(rate.ticks_per_sample()) == 0
}

/// Smallest tick at or after `ticks` that lies on a sample boundary at `rate`
///
/// ```rust
/// use tickmix_common::timing::{align_up, SampleRate};
///
/// assert_eq!(align_up(640, SampleRate::Hz44100), 640);
/// assert_eq!(align_up(641, SampleRate::Hz44100), 1280);
/// assert_eq!(align_up(640, SampleRate::Hz48000), 1176);
/// ```
pub fn align_up(ticks: Tick, rate: SampleRate) -> Tick {
    let tps = rate.ticks_per_sample();
    let remainder = ticks.rem_euclid(tps);
    if remainder == 0 {
        ticks
    } else {
        ticks + (tps - remainder)
    }
}

/// Largest tick at or before `ticks` that lies on a sample boundary at `rate`
pub fn align_down(ticks: Tick, rate: SampleRate) -> Tick {
    ticks - ticks.rem_euclid(rate.ticks_per_sample())
}

// ============================================================================
// Passage Timing
// ============================================================================

/// Passage timing in ticks
///
/// All boundaries are positions in the source's own timeline (tick 0 is the
/// first decoded frame). Persisted and transmitted as 64-bit integers.
///
/// Invariant: `start_tick ≤ lead_in_end_tick ≤ lead_out_start_tick ≤ end_tick`,
/// with each fade fitting inside its lead region.
///
/// ```rust
/// use tickmix_common::timing::{PassageTiming, SampleRate, TICK_RATE};
///
/// // 10 second passage, 1 second fades at both ends
/// let timing = PassageTiming::with_fades(0, 10 * TICK_RATE, TICK_RATE, TICK_RATE);
/// assert!(timing.validate().is_ok());
/// assert!(timing.check_alignment(SampleRate::Hz44100).is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PassageTiming {
    /// First audible tick
    pub start_tick: Tick,
    /// First tick past the passage
    pub end_tick: Tick,
    /// End of the lead-in region
    pub lead_in_end_tick: Tick,
    /// Start of the lead-out region
    pub lead_out_start_tick: Tick,
    /// Fade-in ramp length (anchored at `start_tick`)
    pub fade_in_duration_ticks: Tick,
    /// Fade-out ramp length (ending at `end_tick`)
    pub fade_out_duration_ticks: Tick,
}

impl PassageTiming {
    /// Timing whose lead regions are exactly the fade ramps
    pub fn with_fades(start_tick: Tick, end_tick: Tick, fade_in: Tick, fade_out: Tick) -> Self {
        Self {
            start_tick,
            end_tick,
            lead_in_end_tick: start_tick + fade_in,
            lead_out_start_tick: end_tick - fade_out,
            fade_in_duration_ticks: fade_in,
            fade_out_duration_ticks: fade_out,
        }
    }

    /// Timing with no lead regions and no fades
    pub fn unfaded(start_tick: Tick, end_tick: Tick) -> Self {
        Self::with_fades(start_tick, end_tick, 0, 0)
    }

    /// Check ordering and duration invariants
    pub fn validate(&self) -> Result<(), TimingError> {
        let invalid = |msg: String| Err(TimingError::InvalidPassageTiming(msg));

        if self.start_tick < 0 {
            return invalid(format!("start_tick {} is negative", self.start_tick));
        }
        if !(self.start_tick <= self.lead_in_end_tick
            && self.lead_in_end_tick <= self.lead_out_start_tick
            && self.lead_out_start_tick <= self.end_tick)
        {
            return invalid(format!(
                "boundaries out of order: start={} lead_in_end={} lead_out_start={} end={}",
                self.start_tick, self.lead_in_end_tick, self.lead_out_start_tick, self.end_tick
            ));
        }
        if self.fade_in_duration_ticks < 0 || self.fade_out_duration_ticks < 0 {
            return invalid(format!(
                "negative fade duration: fade_in={} fade_out={}",
                self.fade_in_duration_ticks, self.fade_out_duration_ticks
            ));
        }
        if self.fade_in_duration_ticks > self.lead_in_ticks() {
            return invalid(format!(
                "fade_in {} exceeds lead-in region {}",
                self.fade_in_duration_ticks,
                self.lead_in_ticks()
            ));
        }
        if self.fade_out_duration_ticks > self.lead_out_ticks() {
            return invalid(format!(
                "fade_out {} exceeds lead-out region {}",
                self.fade_out_duration_ticks,
                self.lead_out_ticks()
            ));
        }
        Ok(())
    }

    /// Validate, then require every boundary and duration to be sample-aligned at `rate`
    pub fn check_alignment(&self, rate: SampleRate) -> Result<(), TimingError> {
        self.validate()?;
        for ticks in [
            self.start_tick,
            self.end_tick,
            self.lead_in_end_tick,
            self.lead_out_start_tick,
            self.fade_in_duration_ticks,
            self.fade_out_duration_ticks,
        ] {
            ticks_to_samples(ticks, rate)?;
        }
        Ok(())
    }

    /// Passage length
    pub fn duration_ticks(&self) -> Tick {
        self.end_tick - self.start_tick
    }

    /// Length of the lead-in region
    pub fn lead_in_ticks(&self) -> Tick {
        self.lead_in_end_tick - self.start_tick
    }

    /// Length of the lead-out region
    pub fn lead_out_ticks(&self) -> Tick {
        self.end_tick - self.lead_out_start_tick
    }

    /// Offset from `start_tick` at which the lead-out region begins
    ///
    /// A following passage whose lead-in should overlap this passage's
    /// lead-out starts this many ticks after this passage started.
    pub fn lead_out_offset(&self) -> Tick {
        self.lead_out_start_tick - self.start_tick
    }
}

// ============================================================================
// Tests Module
// ============================================================================

#[cfg(test)]
#[path = "timing_tests.rs"]
mod tests;
