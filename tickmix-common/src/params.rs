//! Pipeline parameters
//!
//! All tunables of the playback pipeline live in one explicit, typed
//! [`PipelineParams`] value. It is built from defaults, a named preset or a
//! TOML file, validated once, and then handed to the pipeline by value.
//!
//! Validation is driven by a metadata table ([`PipelineParams::metadata`]):
//! one entry per key with its type, default and valid range. Out-of-range
//! values are rejected, never clamped.
//!
//! # Usage
//!
//! ```rust
//! use tickmix_common::params::PipelineParams;
//!
//! let params = PipelineParams::from_toml_str("ring_buffer_ms = 500\nparallelism = 2").unwrap();
//! assert_eq!(params.ring_buffer_ms, 500);
//! assert_eq!(params.working_sample_rate, 44100); // default
//!
//! assert!(PipelineParams::from_toml_str("parallelism = 0").is_err());
//! ```

use crate::fade_curves::FadeCurve;
use crate::timing::{ms_to_ticks, SampleRate, Tick};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Parameter loading and validation errors
#[derive(Debug, Error)]
pub enum ParamError {
    /// Value outside the key's valid range
    #[error("{key}: value {value} out of range {range}")]
    OutOfRange {
        key: &'static str,
        value: String,
        range: &'static str,
    },

    /// Value in range but otherwise unusable
    #[error("{key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    /// Unknown preset name
    #[error("Unknown preset '{0}' (expected classical, rock_pop or electronic)")]
    UnknownPreset(String),

    /// Malformed TOML
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No platform config directory
    #[error("No configuration directory available on this platform")]
    NoConfigDir,
}

/// Pipeline parameters
///
/// Missing TOML keys take their default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineParams {
    /// Mixer output rate in Hz. Must be a supported [`SampleRate`].
    pub working_sample_rate: u32,

    /// Output channel count (1 or 2)
    pub output_channels: u16,

    /// Output sample width (16, 24 or 32 bit signed integer)
    pub output_bits: u16,

    /// Master volume applied after summation, [0.0, 1.0]
    pub master_volume: f32,

    /// Per-chain ring buffer capacity expressed as audio duration
    ///
    /// Default 200 ms (8820 frames @ 44.1kHz).
    pub ring_buffer_ms: u64,

    /// Maximum number of simultaneously active chains
    pub parallelism: usize,

    /// Worker sleep between retries when its ring buffer is full
    pub worker_backoff_ms: u64,

    /// Analysis window for quick-ramp detection
    pub rms_window_ms: u32,

    /// RMS over the first analysis window of the lead-in above which the
    /// fade-in is shortened
    pub quick_ramp_up_threshold: f64,

    /// RMS over the last analysis window before the end above which the
    /// fade-out is shortened
    pub quick_ramp_down_threshold: f64,

    /// Fade-in length used when the quick ramp triggers
    pub quick_ramp_up_duration_ms: u64,

    /// Fade-out length used when the quick ramp triggers
    pub quick_ramp_down_duration_ms: u64,

    pub fade_in_curve: FadeCurve,
    pub fade_out_curve: FadeCurve,

    /// Resampler filter length in taps (even)
    pub sinc_len: usize,

    /// Resampler cutoff relative to the lower Nyquist frequency
    pub sinc_cutoff: f64,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            working_sample_rate: 44100,
            output_channels: 2,
            output_bits: 16,
            master_volume: 1.0,
            ring_buffer_ms: 200,
            parallelism: 4,
            worker_backoff_ms: 2,
            rms_window_ms: 100,
            quick_ramp_up_threshold: 0.75,
            quick_ramp_down_threshold: 0.75,
            quick_ramp_up_duration_ms: 1000,
            quick_ramp_down_duration_ms: 1000,
            fade_in_curve: FadeCurve::Linear,
            fade_out_curve: FadeCurve::Linear,
            sinc_len: 64,
            sinc_cutoff: 0.95,
        }
    }
}

/// Parameter metadata
///
/// One entry per key of [`PipelineParams`]. The validator checks that key's
/// field on a whole parameter set and reports a typed error.
pub struct ParamMetadata {
    pub key: &'static str,
    pub data_type: &'static str,
    pub default_value: &'static str,
    pub validation_range: &'static str,
    pub validator: fn(&PipelineParams) -> Result<(), ParamError>,
}

fn check_range<T>(key: &'static str, value: T, min: T, max: T, range: &'static str) -> Result<(), ParamError>
where
    T: PartialOrd + fmt::Display,
{
    // NaN fails both comparisons and is rejected here too
    if value >= min && value <= max {
        Ok(())
    } else {
        Err(ParamError::OutOfRange {
            key,
            value: value.to_string(),
            range,
        })
    }
}

impl PipelineParams {
    /// Metadata for every parameter key
    pub fn metadata() -> &'static [ParamMetadata] {
        static METADATA: &[ParamMetadata] = &[
            ParamMetadata {
                key: "working_sample_rate",
                data_type: "u32",
                default_value: "44100",
                validation_range: "{8000, 11025, 16000, 22050, 32000, 44100, 48000, 88200, 96000, 176400, 192000}",
                validator: |p| {
                    SampleRate::from_hz(p.working_sample_rate)
                        .map(|_| ())
                        .map_err(|_| ParamError::OutOfRange {
                            key: "working_sample_rate",
                            value: p.working_sample_rate.to_string(),
                            range: "{8000, 11025, 16000, 22050, 32000, 44100, 48000, 88200, 96000, 176400, 192000}",
                        })
                },
            },
            ParamMetadata {
                key: "output_channels",
                data_type: "u16",
                default_value: "2",
                validation_range: "[1, 2]",
                validator: |p| check_range("output_channels", p.output_channels, 1, 2, "[1, 2]"),
            },
            ParamMetadata {
                key: "output_bits",
                data_type: "u16",
                default_value: "16",
                validation_range: "{16, 24, 32}",
                validator: |p| match p.output_bits {
                    16 | 24 | 32 => Ok(()),
                    other => Err(ParamError::OutOfRange {
                        key: "output_bits",
                        value: other.to_string(),
                        range: "{16, 24, 32}",
                    }),
                },
            },
            ParamMetadata {
                key: "master_volume",
                data_type: "f32",
                default_value: "1.0",
                validation_range: "[0.0, 1.0]",
                validator: |p| check_range("master_volume", p.master_volume, 0.0, 1.0, "[0.0, 1.0]"),
            },
            ParamMetadata {
                key: "ring_buffer_ms",
                data_type: "u64",
                default_value: "200",
                validation_range: "[20, 5000]",
                validator: |p| check_range("ring_buffer_ms", p.ring_buffer_ms, 20, 5000, "[20, 5000]"),
            },
            ParamMetadata {
                key: "parallelism",
                data_type: "usize",
                default_value: "4",
                validation_range: "[1, 32]",
                validator: |p| check_range("parallelism", p.parallelism, 1, 32, "[1, 32]"),
            },
            ParamMetadata {
                key: "worker_backoff_ms",
                data_type: "u64",
                default_value: "2",
                validation_range: "[1, 100]",
                validator: |p| check_range("worker_backoff_ms", p.worker_backoff_ms, 1, 100, "[1, 100]"),
            },
            ParamMetadata {
                key: "rms_window_ms",
                data_type: "u32",
                default_value: "100",
                validation_range: "[10, 1000]",
                validator: |p| check_range("rms_window_ms", p.rms_window_ms, 10, 1000, "[10, 1000]"),
            },
            ParamMetadata {
                key: "quick_ramp_up_threshold",
                data_type: "f64",
                default_value: "0.75",
                validation_range: "[0.0, 1.0]",
                validator: |p| {
                    check_range("quick_ramp_up_threshold", p.quick_ramp_up_threshold, 0.0, 1.0, "[0.0, 1.0]")
                },
            },
            ParamMetadata {
                key: "quick_ramp_down_threshold",
                data_type: "f64",
                default_value: "0.75",
                validation_range: "[0.0, 1.0]",
                validator: |p| {
                    check_range("quick_ramp_down_threshold", p.quick_ramp_down_threshold, 0.0, 1.0, "[0.0, 1.0]")
                },
            },
            ParamMetadata {
                key: "quick_ramp_up_duration_ms",
                data_type: "u64",
                default_value: "1000",
                validation_range: "[0, 10000]",
                validator: |p| {
                    check_range("quick_ramp_up_duration_ms", p.quick_ramp_up_duration_ms, 0, 10_000, "[0, 10000]")
                },
            },
            ParamMetadata {
                key: "quick_ramp_down_duration_ms",
                data_type: "u64",
                default_value: "1000",
                validation_range: "[0, 10000]",
                validator: |p| {
                    check_range("quick_ramp_down_duration_ms", p.quick_ramp_down_duration_ms, 0, 10_000, "[0, 10000]")
                },
            },
            ParamMetadata {
                key: "fade_in_curve",
                data_type: "FadeCurve",
                default_value: "linear",
                validation_range: "linear | exponential | logarithmic | s_curve | equal_power",
                validator: |_| Ok(()),
            },
            ParamMetadata {
                key: "fade_out_curve",
                data_type: "FadeCurve",
                default_value: "linear",
                validation_range: "linear | exponential | logarithmic | s_curve | equal_power",
                validator: |_| Ok(()),
            },
            ParamMetadata {
                key: "sinc_len",
                data_type: "usize",
                default_value: "64",
                validation_range: "[8, 512], even",
                validator: |p| {
                    check_range("sinc_len", p.sinc_len, 8, 512, "[8, 512], even")?;
                    if p.sinc_len % 2 != 0 {
                        return Err(ParamError::InvalidValue {
                            key: "sinc_len",
                            reason: format!("{} is odd; filter length must be even", p.sinc_len),
                        });
                    }
                    Ok(())
                },
            },
            ParamMetadata {
                key: "sinc_cutoff",
                data_type: "f64",
                default_value: "0.95",
                validation_range: "[0.5, 0.99]",
                validator: |p| check_range("sinc_cutoff", p.sinc_cutoff, 0.5, 0.99, "[0.5, 0.99]"),
            },
        ];
        METADATA
    }

    /// Validate every key against its metadata entry
    ///
    /// Stops at the first invalid key.
    pub fn validate(&self) -> Result<(), ParamError> {
        for meta in Self::metadata() {
            (meta.validator)(self)?;
        }
        Ok(())
    }

    /// Working rate as a [`SampleRate`]
    pub fn working_rate(&self) -> Result<SampleRate, ParamError> {
        SampleRate::from_hz(self.working_sample_rate).map_err(|_| ParamError::OutOfRange {
            key: "working_sample_rate",
            value: self.working_sample_rate.to_string(),
            range: "supported sample rate",
        })
    }

    /// Ring buffer capacity in frames at `rate` (at least one frame)
    pub fn ring_buffer_frames(&self, rate: SampleRate) -> usize {
        let frames = self.ring_buffer_ms * rate.hz() as u64 / 1000;
        frames.max(1) as usize
    }

    pub fn rms_window_ticks(&self) -> Tick {
        ms_to_ticks(self.rms_window_ms as i64)
    }

    pub fn quick_ramp_up_ticks(&self) -> Tick {
        ms_to_ticks(self.quick_ramp_up_duration_ms as i64)
    }

    pub fn quick_ramp_down_ticks(&self) -> Tick {
        ms_to_ticks(self.quick_ramp_down_duration_ms as i64)
    }

    // ------------------------------------------------------------------------
    // Presets
    // ------------------------------------------------------------------------

    /// Long analysis window, quick ramps only for very loud edges
    pub fn classical() -> Self {
        Self {
            rms_window_ms: 250,
            quick_ramp_up_threshold: 0.9,
            quick_ramp_down_threshold: 0.9,
            quick_ramp_up_duration_ms: 2000,
            quick_ramp_down_duration_ms: 2000,
            fade_in_curve: FadeCurve::SCurve,
            fade_out_curve: FadeCurve::SCurve,
            ring_buffer_ms: 500,
            ..Self::default()
        }
    }

    /// The defaults: linear curves, 0.75 threshold, one second quick ramps
    pub fn rock_pop() -> Self {
        Self::default()
    }

    /// Short window, low threshold, fast ramps
    pub fn electronic() -> Self {
        Self {
            rms_window_ms: 50,
            quick_ramp_up_threshold: 0.5,
            quick_ramp_down_threshold: 0.5,
            quick_ramp_up_duration_ms: 250,
            quick_ramp_down_duration_ms: 250,
            ..Self::default()
        }
    }

    // ------------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------------

    /// Parse and validate TOML. Missing keys take default values.
    pub fn from_toml_str(content: &str) -> Result<Self, ParamError> {
        let params: PipelineParams = toml::from_str(content)?;
        params.validate()?;
        Ok(params)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: &Path) -> Result<Self, ParamError> {
        let content = std::fs::read_to_string(path).map_err(|source| ParamError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let params = Self::from_toml_str(&content)?;
        debug!("Loaded pipeline parameters from {}", path.display());
        Ok(params)
    }

    /// `<config_dir>/tickmix/config.toml` (e.g. `~/.config/tickmix/config.toml` on Linux)
    pub fn default_config_path() -> Result<PathBuf, ParamError> {
        dirs::config_dir()
            .map(|dir| dir.join("tickmix").join("config.toml"))
            .ok_or(ParamError::NoConfigDir)
    }

    /// Load from the default config path, or defaults if no file exists there
    pub fn load_default() -> Result<Self, ParamError> {
        let path = Self::default_config_path()?;
        if path.exists() {
            Self::load(&path)
        } else {
            debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }
}

/// Named presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    Classical,
    RockPop,
    Electronic,
}

impl Preset {
    pub fn params(&self) -> PipelineParams {
        match self {
            Preset::Classical => PipelineParams::classical(),
            Preset::RockPop => PipelineParams::rock_pop(),
            Preset::Electronic => PipelineParams::electronic(),
        }
    }
}

impl FromStr for Preset {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "classical" => Ok(Preset::Classical),
            "rock_pop" | "rockpop" | "rock" | "pop" => Ok(Preset::RockPop),
            "electronic" => Ok(Preset::Electronic),
            _ => Err(ParamError::UnknownPreset(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let params = PipelineParams::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.working_rate().unwrap(), SampleRate::Hz44100);
    }

    #[test]
    fn test_metadata_covers_every_key() {
        let encoded = toml::to_string(&PipelineParams::default()).unwrap();
        let table: toml::Table = toml::from_str(&encoded).unwrap();
        let keys: Vec<&str> = PipelineParams::metadata().iter().map(|m| m.key).collect();
        assert_eq!(keys.len(), table.len());
        for key in table.keys() {
            assert!(keys.contains(&key.as_str()), "no metadata for {}", key);
        }
    }

    #[test]
    fn test_metadata_defaults_match_struct() {
        let encoded = toml::to_string(&PipelineParams::default()).unwrap();
        let table: toml::Table = toml::from_str(&encoded).unwrap();
        for meta in PipelineParams::metadata() {
            let value = &table[meta.key];
            let rendered = match value {
                toml::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            assert_eq!(rendered, meta.default_value, "default mismatch for {}", meta.key);
        }
    }

    #[test]
    fn test_ring_buffer_frames() {
        let params = PipelineParams::default();
        assert_eq!(params.ring_buffer_frames(SampleRate::Hz44100), 8820);
        assert_eq!(params.ring_buffer_frames(SampleRate::Hz48000), 9600);
    }

    #[test]
    fn test_sinc_len_must_be_even() {
        let params = PipelineParams {
            sinc_len: 63,
            ..Default::default()
        };
        assert!(matches!(
            params.validate(),
            Err(ParamError::InvalidValue { key: "sinc_len", .. })
        ));
    }

    #[test]
    fn test_nan_rejected() {
        let params = PipelineParams {
            sinc_cutoff: f64::NAN,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_preset_parse() {
        assert_eq!("Classical".parse::<Preset>().unwrap(), Preset::Classical);
        assert_eq!("rock-pop".parse::<Preset>().unwrap(), Preset::RockPop);
        assert!(matches!(
            "jazz".parse::<Preset>(),
            Err(ParamError::UnknownPreset(_))
        ));
    }
}
