//! tickmix-render - render a crossfaded playlist to a WAV file
//!
//! Each input (an audio file, or a generated tone) becomes one passage.
//! Consecutive passages overlap by the crossfade length: the next passage's
//! lead-in is scheduled on the previous passage's lead-out.

use std::f64::consts::TAU;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tickmix_ap::audio::{
    Decoder, OutputFormat, OutputSink, PcmDecoder, SymphoniaDecoder, WavFileSink,
};
use tickmix_ap::playback::Pipeline;
use tickmix_common::params::{PipelineParams, Preset};
use tickmix_common::timing::{
    align_down, ms_to_ticks, ticks_to_seconds, PassageTiming, SampleRate, Tick,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Frames rendered between scheduling checks
const RENDER_BLOCK: u64 = 4096;

/// Command-line arguments for tickmix-render
#[derive(Parser, Debug)]
#[command(name = "tickmix-render")]
#[command(about = "Render a sample-accurate crossfaded playlist to WAV")]
#[command(version)]
struct Args {
    /// Audio files, played in order
    inputs: Vec<PathBuf>,

    /// Generated sine tone in Hz (repeatable), played after the files
    #[arg(long = "tone")]
    tones: Vec<f64>,

    /// Native sample rate of generated tones
    #[arg(long, default_value = "44100")]
    tone_rate: u32,

    /// Length of each generated tone in seconds
    #[arg(long, default_value = "5.0")]
    tone_seconds: f64,

    /// Output WAV file
    #[arg(short, long, default_value = "tickmix.wav")]
    output: PathBuf,

    /// Parameter preset (classical, rock_pop, electronic)
    #[arg(long, conflicts_with = "config")]
    preset: Option<Preset>,

    /// Parameter file (TOML); defaults to the user config file if present
    #[arg(short, long, env = "TICKMIX_CONFIG")]
    config: Option<PathBuf>,

    /// Crossfade length between consecutive passages
    #[arg(long, default_value = "2000")]
    crossfade_ms: i64,

    /// Override the working sample rate
    #[arg(long)]
    rate: Option<u32>,
}

/// A passage ready to be handed to the pipeline
struct PlannedPassage {
    label: String,
    decoder: Box<dyn Decoder>,
    timing: PassageTiming,
    mix_start: Tick,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tickmix_ap=info,tickmix_render=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let mut params = load_params(&args)?;
    if let Some(rate) = args.rate {
        params.working_sample_rate = rate;
    }
    params.validate().context("Invalid pipeline parameters")?;

    let rate = params.working_rate()?;
    let mut passages = plan(&args, rate)?;
    if passages.is_empty() {
        bail!("Nothing to render: give audio files or --tone");
    }

    let total_ticks = passages
        .iter()
        .map(|p| p.mix_start + p.timing.duration_ticks())
        .max()
        .unwrap_or(0);
    let total_frames = (total_ticks / rate.ticks_per_sample()) as u64;
    info!(
        "Rendering {} passages, {:.2}s at {}",
        passages.len(),
        ticks_to_seconds(total_ticks),
        rate
    );

    let (mut pipeline, mut mixer) =
        Pipeline::new(params.clone()).context("Failed to build pipeline")?;
    let format = OutputFormat::from_params(&params)?;
    let mut sink = WavFileSink::create(&args.output, format, rate)
        .with_context(|| format!("Failed to open {}", args.output.display()))?;

    // Start each chain a little ahead of its mix position so its buffer is full
    let lookahead = ms_to_ticks(params.ring_buffer_ms as i64) * 2;
    passages.reverse();
    let mut written = 0u64;
    while written < total_frames {
        let position = pipeline.current_position_tick();
        while let Some(next) = passages.last() {
            if next.mix_start > position + lookahead {
                break;
            }
            let Some(next) = passages.pop() else { break };
            info!(
                "Starting '{}' at {:.3}s",
                next.label,
                ticks_to_seconds(next.mix_start)
            );
            let started = pipeline.start_passage(
                Uuid::new_v4(),
                next.decoder,
                next.timing,
                Some(next.mix_start),
            );
            if let Err(e) = started {
                warn!("Skipping '{}': {}", next.label, e);
            }
        }

        let block = RENDER_BLOCK.min(total_frames - written);
        written += sink.render(&mut mixer, block)?;

        for retired in pipeline.collect_retired() {
            info!(
                "Passage {} retired: {:?}, {} underruns",
                retired.id, retired.outcome, retired.underruns
            );
        }
    }

    let frames = sink.finalize()?;
    info!("Wrote {} frames to {}", frames, args.output.display());

    let stats = pipeline.stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn load_params(args: &Args) -> Result<PipelineParams> {
    if let Some(preset) = args.preset {
        return Ok(preset.params());
    }
    if let Some(path) = &args.config {
        return PipelineParams::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()));
    }
    match PipelineParams::default_config_path() {
        Ok(path) if path.exists() => PipelineParams::load(&path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        _ => Ok(PipelineParams::default()),
    }
}

/// Open every input and lay the passages out on the mix timeline
fn plan(args: &Args, rate: SampleRate) -> Result<Vec<PlannedPassage>> {
    let mut sources: Vec<(String, Box<dyn Decoder>)> = Vec::new();
    for path in &args.inputs {
        let decoder: Box<dyn Decoder> = Box::new(
            SymphoniaDecoder::open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?,
        );
        sources.push((path.display().to_string(), decoder));
    }
    if !args.tones.is_empty() {
        let tone_rate = SampleRate::from_hz(args.tone_rate)?;
        for &hz in &args.tones {
            let decoder: Box<dyn Decoder> = Box::new(tone(hz, tone_rate, args.tone_seconds));
            sources.push((format!("{} Hz tone", hz), decoder));
        }
    }

    let crossfade = ms_to_ticks(args.crossfade_ms.max(0));
    let mut planned = Vec::with_capacity(sources.len());
    let mut mix_start: Tick = 0;
    for (label, decoder) in sources {
        let Some(length) = decoder.duration_ticks() else {
            bail!("'{}' does not declare its length", label);
        };
        let end = align_down(length, rate);
        let fade = align_down(crossfade.min(end / 2), rate);
        let timing = PassageTiming::with_fades(0, end, fade, fade);
        timing
            .check_alignment(rate)
            .with_context(|| format!("Bad timing for '{}'", label))?;

        planned.push(PlannedPassage {
            label,
            decoder,
            timing,
            mix_start,
        });
        mix_start += timing.lead_out_offset();
    }
    Ok(planned)
}

fn tone(hz: f64, rate: SampleRate, seconds: f64) -> PcmDecoder {
    let frames = (seconds * rate.hz() as f64) as usize;
    let samples = (0..frames)
        .map(|n| (0.5 * (TAU * hz * n as f64 / rate.hz() as f64).sin()) as f32)
        .collect();
    PcmDecoder::new(samples, rate, 1)
}
