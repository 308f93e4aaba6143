//! Fade curves for lead-in and lead-out envelopes
//!
//! A curve maps normalized progress through a ramp (0.0 at the first tick of
//! the ramp, 1.0 at its end) to an amplitude multiplier. Progress is computed
//! by the caller from integer ticks; curves never see time directly.
//!
//! Crossfade envelope: when one chain fades out while another fades in over
//! the same window with the same curve, the summed amplitude is
//!
//! | curve       | sum at midpoint | max sum |
//! |-------------|-----------------|---------|
//! | Linear      | 1.0             | 1.0     |
//! | SCurve      | 1.0             | 1.0     |
//! | Exponential | 0.5             | 1.0     |
//! | EqualPower  | 1.414           | 1.414   |
//!
//! Linear is the default because it is amplitude-complementary.

use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Fade curve shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    /// v(t) = t
    #[default]
    Linear,
    /// v(t) = t², slow start
    Exponential,
    /// v(t) = √t on fade-in, (1-t)² on fade-out
    Logarithmic,
    /// v(t) = 0.5 × (1 - cos(π t))
    SCurve,
    /// v(t) = sin(t × π/2), constant power rather than constant amplitude
    EqualPower,
}

impl FadeCurve {
    /// Every variant, in display order
    pub const ALL: [FadeCurve; 5] = [
        FadeCurve::Linear,
        FadeCurve::Exponential,
        FadeCurve::Logarithmic,
        FadeCurve::SCurve,
        FadeCurve::EqualPower,
    ];

    /// Fade-in multiplier, rising from 0.0 to 1.0
    ///
    /// `progress` is clamped to [0.0, 1.0].
    pub fn fade_in_gain(&self, progress: f64) -> f64 {
        let t = progress.clamp(0.0, 1.0);
        match self {
            FadeCurve::Linear => t,
            FadeCurve::Exponential => t * t,
            FadeCurve::Logarithmic => t.sqrt(),
            FadeCurve::SCurve => 0.5 * (1.0 - (PI * t).cos()),
            FadeCurve::EqualPower => (t * FRAC_PI_2).sin(),
        }
    }

    /// Fade-out multiplier, falling from 1.0 to 0.0
    ///
    /// `progress` is clamped to [0.0, 1.0].
    pub fn fade_out_gain(&self, progress: f64) -> f64 {
        let t = progress.clamp(0.0, 1.0);
        match self {
            FadeCurve::Linear => 1.0 - t,
            FadeCurve::Exponential | FadeCurve::Logarithmic => {
                let inv = 1.0 - t;
                inv * inv
            }
            FadeCurve::SCurve => 0.5 * (1.0 + (PI * t).cos()),
            FadeCurve::EqualPower => (t * FRAC_PI_2).cos(),
        }
    }

    /// Curve that complements this one on the opposite side of a crossfade
    pub fn recommended_pair(&self) -> FadeCurve {
        match self {
            FadeCurve::Exponential => FadeCurve::Logarithmic,
            FadeCurve::Logarithmic => FadeCurve::Exponential,
            other => *other,
        }
    }

    /// Canonical configuration name (matches the serde representation)
    pub fn as_str(&self) -> &'static str {
        match self {
            FadeCurve::Linear => "linear",
            FadeCurve::Exponential => "exponential",
            FadeCurve::Logarithmic => "logarithmic",
            FadeCurve::SCurve => "s_curve",
            FadeCurve::EqualPower => "equal_power",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            FadeCurve::Linear => "Linear",
            FadeCurve::Exponential => "Exponential",
            FadeCurve::Logarithmic => "Logarithmic",
            FadeCurve::SCurve => "S-Curve",
            FadeCurve::EqualPower => "Equal Power",
        }
    }
}

/// Unknown fade curve name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown fade curve '{0}'")]
pub struct UnknownCurve(pub String);

impl FromStr for FadeCurve {
    type Err = UnknownCurve;

    /// Case-insensitive; accepts `cosine`, `scurve`, `s-curve` and
    /// `equalpower` as aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linear" => Ok(FadeCurve::Linear),
            "exponential" => Ok(FadeCurve::Exponential),
            "logarithmic" => Ok(FadeCurve::Logarithmic),
            "cosine" | "scurve" | "s-curve" | "s_curve" => Ok(FadeCurve::SCurve),
            "equal_power" | "equalpower" => Ok(FadeCurve::EqualPower),
            _ => Err(UnknownCurve(s.to_string())),
        }
    }
}

impl fmt::Display for FadeCurve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}
