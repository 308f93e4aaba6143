//! Integration tests for pipeline parameter loading, validation and presets

use std::io::Write;
use tickmix_common::params::{ParamError, PipelineParams, Preset};
use tickmix_common::{FadeCurve, SampleRate};

#[test]
fn test_load_full_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
working_sample_rate = 48000
output_channels = 2
output_bits = 24
master_volume = 0.8
ring_buffer_ms = 300
parallelism = 6
rms_window_ms = 50
quick_ramp_up_threshold = 0.6
fade_in_curve = "s_curve"
fade_out_curve = "exponential"
sinc_len = 128
"#
    )
    .unwrap();

    let params = PipelineParams::load(file.path()).unwrap();
    assert_eq!(params.working_rate().unwrap(), SampleRate::Hz48000);
    assert_eq!(params.output_bits, 24);
    assert_eq!(params.master_volume, 0.8);
    assert_eq!(params.parallelism, 6);
    assert_eq!(params.fade_in_curve, FadeCurve::SCurve);
    assert_eq!(params.fade_out_curve, FadeCurve::Exponential);
    assert_eq!(params.sinc_len, 128);
    // Untouched keys keep their defaults
    assert_eq!(params.quick_ramp_down_threshold, 0.75);
    assert_eq!(params.worker_backoff_ms, 2);
}

#[test]
fn test_empty_config_is_default() {
    assert_eq!(PipelineParams::from_toml_str("").unwrap(), PipelineParams::default());
}

#[test]
fn test_out_of_range_is_rejected_not_clamped() {
    let err = PipelineParams::from_toml_str("ring_buffer_ms = 10").unwrap_err();
    match err {
        ParamError::OutOfRange { key, value, range } => {
            assert_eq!(key, "ring_buffer_ms");
            assert_eq!(value, "10");
            assert_eq!(range, "[20, 5000]");
        }
        other => panic!("expected OutOfRange, got {:?}", other),
    }

    let err = PipelineParams::from_toml_str("master_volume = 1.5").unwrap_err();
    assert_eq!(err.to_string(), "master_volume: value 1.5 out of range [0.0, 1.0]");
}

#[test]
fn test_unsupported_working_rate() {
    let err = PipelineParams::from_toml_str("working_sample_rate = 44000").unwrap_err();
    assert!(matches!(
        err,
        ParamError::OutOfRange {
            key: "working_sample_rate",
            ..
        }
    ));
}

#[test]
fn test_output_bits_set() {
    assert!(PipelineParams::from_toml_str("output_bits = 32").is_ok());
    assert!(PipelineParams::from_toml_str("output_bits = 20").is_err());
    assert!(PipelineParams::from_toml_str("output_channels = 3").is_err());
}

#[test]
fn test_unknown_curve_is_parse_error() {
    let err = PipelineParams::from_toml_str("fade_in_curve = \"wobble\"").unwrap_err();
    assert!(matches!(err, ParamError::Parse(_)));
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = PipelineParams::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ParamError::Io { .. }));
}

#[test]
fn test_presets_are_valid_and_distinct() {
    let classical = PipelineParams::classical();
    let rock_pop = PipelineParams::rock_pop();
    let electronic = PipelineParams::electronic();

    for params in [&classical, &rock_pop, &electronic] {
        params.validate().unwrap();
    }

    assert!(classical.quick_ramp_up_threshold > rock_pop.quick_ramp_up_threshold);
    assert!(electronic.quick_ramp_up_threshold < rock_pop.quick_ramp_up_threshold);
    assert!(classical.quick_ramp_up_duration_ms > electronic.quick_ramp_up_duration_ms);
    assert_eq!(Preset::Electronic.params(), electronic);
}

#[test]
fn test_preset_serializes_back_to_equal_value() {
    let params = PipelineParams::classical();
    let encoded = toml::to_string(&params).unwrap();
    assert_eq!(PipelineParams::from_toml_str(&encoded).unwrap(), params);
}

#[test]
fn test_default_config_path_layout() {
    if let Ok(path) = PipelineParams::default_config_path() {
        assert!(path.ends_with("tickmix/config.toml"));
    }
}
