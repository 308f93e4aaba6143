//! Tick-exact streaming sample rate conversion
//!
//! Converts a decoder's native-rate frames to the working rate. Every output
//! frame carries a tick that is an exact multiple of the working rate's
//! ticks-per-sample, and its interpolation phase is derived from that tick
//! with integer arithmetic only:
//!
//! ```text
//! rel   = t - origin            (origin = tick of the first input frame)
//! idx   = rel div tps_in        (input frame at or before t)
//! phase = rel mod tps_in        (ticks past that frame)
//! ```
//!
//! Output ticks are multiples of `tps_out` and input ticks multiples of
//! `tps_in`, so `phase` is always a multiple of `gcd(tps_in, tps_out)`. The
//! filter is a polyphase windowed sinc (Blackman-Harris window) with one
//! precomputed row per reachable phase, so no fractional position is ever
//! accumulated and the output grid never drifts.
//!
//! Equal input and output rates bypass filtering entirely (bit-exact copy).
//! The stream is padded with silence before its first and after its last
//! input frame.

use crate::audio::types::{AudioFrame, TickedFrame};
use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::f64::consts::PI;
use tickmix_common::params::PipelineParams;
use tickmix_common::timing::{align_up, ticks_to_samples, SampleRate, Tick};
use tracing::{debug, trace};

// Blackman-Harris 4-term coefficients
const BH_A0: f64 = 0.35875;
const BH_A1: f64 = 0.48829;
const BH_A2: f64 = 0.14128;
const BH_A3: f64 = 0.01168;

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.abs()
}

fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        let px = PI * x;
        px.sin() / px
    }
}

/// Window over d ∈ [-half_width, half_width]
fn blackman_harris(d: f64, half_width: i64) -> f64 {
    let u = (d + half_width as f64) / (2 * half_width) as f64;
    BH_A0 - BH_A1 * (2.0 * PI * u).cos() + BH_A2 * (4.0 * PI * u).cos()
        - BH_A3 * (6.0 * PI * u).cos()
}

/// Precomputed polyphase filter for one input/output rate pair
struct PolyphaseKernel {
    /// Input frames used on each side of the interpolation point
    half_width: i64,
    /// Phase granularity in ticks: gcd(tps_in, tps_out)
    phase_step: i64,
    /// `phases × 2·half_width` taps, row-major
    taps: Vec<f32>,
}

/// Input frames on each side of the interpolation point for a rate pair
///
/// Downsampling lowers the cutoff and widens the kernel in input frames so
/// it keeps sinc_len taps per output-rate zero crossing.
fn kernel_half_width(input: SampleRate, output: SampleRate, sinc_len: usize) -> i64 {
    let scale = (output.hz() as f64 / input.hz() as f64).min(1.0);
    ((sinc_len / 2) as f64 / scale).ceil() as i64
}

impl PolyphaseKernel {
    fn build(input: SampleRate, output: SampleRate, sinc_len: usize, cutoff: f64) -> Self {
        let tps_in = input.ticks_per_sample();
        let tps_out = output.ticks_per_sample();

        let scale = (output.hz() as f64 / input.hz() as f64).min(1.0);
        let half_width = kernel_half_width(input, output, sinc_len);
        let fc = cutoff * scale;

        let phase_step = gcd(tps_in, tps_out);
        let phases = (tps_in / phase_step) as usize;
        let width = (2 * half_width) as usize;

        let mut taps = Vec::with_capacity(phases * width);
        let mut row = vec![0.0f64; width];
        for p in 0..phases {
            let frac = (p as i64 * phase_step) as f64 / tps_in as f64;
            for (j, tap) in row.iter_mut().enumerate() {
                let d = frac + (half_width - 1 - j as i64) as f64;
                *tap = fc * sinc(fc * d) * blackman_harris(d, half_width);
            }
            // Unity DC gain per phase
            let sum: f64 = row.iter().sum();
            taps.extend(row.iter().map(|t| (t / sum) as f32));
        }

        debug!(
            "Built polyphase kernel {} -> {}: {} phases x {} taps (step {} ticks)",
            input, output, phases, width, phase_step
        );

        Self {
            half_width,
            phase_step,
            taps,
        }
    }

    fn row(&self, phase: i64) -> &[f32] {
        let width = (2 * self.half_width) as usize;
        let p = (phase / self.phase_step) as usize;
        &self.taps[p * width..(p + 1) * width]
    }
}

/// Streaming resampler for one chain
pub struct Resampler {
    input_rate: SampleRate,
    output_rate: SampleRate,
    sinc_len: usize,
    cutoff: f64,
    /// None when input and output rates are equal
    kernel: Option<PolyphaseKernel>,

    /// Tick of the first input frame
    origin: Option<Tick>,
    /// Retained input frames; `history[0]` has input index `history_start`
    history: VecDeque<AudioFrame>,
    history_start: i64,
    /// Frames kept behind the next output point: the widest kernel any
    /// output rate needs, so a mid-stream switch never reads trimmed input
    retain: i64,
    /// Input frames received so far
    received: i64,

    next_tick: Tick,
    finished: bool,
}

impl Resampler {
    /// Create a resampler whose first output frame is at `first_output_tick`
    ///
    /// `first_output_tick` must lie on a working-rate sample boundary.
    pub fn new(
        input_rate: SampleRate,
        output_rate: SampleRate,
        params: &PipelineParams,
        first_output_tick: Tick,
    ) -> Result<Self> {
        ticks_to_samples(first_output_tick, output_rate)?;

        let retain = SampleRate::ALL
            .iter()
            .map(|&rate| kernel_half_width(input_rate, rate, params.sinc_len))
            .max()
            .unwrap_or(0);
        let kernel = (input_rate != output_rate).then(|| {
            PolyphaseKernel::build(input_rate, output_rate, params.sinc_len, params.sinc_cutoff)
        });

        debug!(
            "Resampler {} -> {} from tick {}{}",
            input_rate,
            output_rate,
            first_output_tick,
            if kernel.is_none() { " (bypass)" } else { "" }
        );

        Ok(Self {
            input_rate,
            output_rate,
            sinc_len: params.sinc_len,
            cutoff: params.sinc_cutoff,
            kernel,
            origin: None,
            history: VecDeque::new(),
            history_start: 0,
            retain,
            received: 0,
            next_tick: first_output_tick,
            finished: false,
        })
    }

    pub fn input_rate(&self) -> SampleRate {
        self.input_rate
    }

    pub fn output_rate(&self) -> SampleRate {
        self.output_rate
    }

    /// Whether frames are copied without filtering
    pub fn is_bypass(&self) -> bool {
        self.kernel.is_none()
    }

    /// Tick of the next frame this resampler will emit
    pub fn next_output_tick(&self) -> Tick {
        self.next_tick
    }

    /// Feed one input frame, appending every output frame it completes to `out`
    ///
    /// Input ticks must advance by exactly one native sample period.
    pub fn process(&mut self, frame: TickedFrame, out: &mut Vec<TickedFrame>) -> Result<()> {
        let tps_in = self.input_rate.ticks_per_sample();
        match self.origin {
            None => {
                ticks_to_samples(frame.tick, self.input_rate)?;
                self.origin = Some(frame.tick);
            }
            Some(origin) => {
                let expected = origin + self.received * tps_in;
                if frame.tick != expected {
                    return Err(Error::NonMonotonicTick {
                        expected,
                        actual: frame.tick,
                    });
                }
            }
        }

        self.history.push_back(frame.frame);
        self.received += 1;
        self.emit(out, false);
        Ok(())
    }

    /// Signal end of input and emit the remaining output frames
    ///
    /// Emits every output tick before the end of the last input frame's
    /// sample period, padding the filter with silence.
    pub fn finish(&mut self, out: &mut Vec<TickedFrame>) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.emit(out, true);
        self.history.clear();
        debug!(
            "Resampler finished: {} input frames, next output tick {}",
            self.received, self.next_tick
        );
    }

    /// Switch the output rate mid-stream
    ///
    /// The next output tick moves to the first boundary of the new rate at or
    /// after the current one, so the output grid jumps by less than one
    /// output sample and the interpolation phase stays tied to ticks.
    pub fn set_output_rate(&mut self, rate: SampleRate) {
        if rate == self.output_rate {
            return;
        }
        let old_tick = self.next_tick;
        self.output_rate = rate;
        self.next_tick = align_up(self.next_tick, rate);
        self.kernel = (self.input_rate != rate)
            .then(|| PolyphaseKernel::build(self.input_rate, rate, self.sinc_len, self.cutoff));
        debug!(
            "Resampler output rate -> {} (next tick {} -> {})",
            rate, old_tick, self.next_tick
        );
    }

    fn sample(&self, index: i64) -> AudioFrame {
        let offset = index - self.history_start;
        if offset < 0 {
            return AudioFrame::zero();
        }
        self.history
            .get(offset as usize)
            .copied()
            .unwrap_or_else(AudioFrame::zero)
    }

    fn interpolate(&self, idx: i64, phase: i64) -> AudioFrame {
        let Some(kernel) = self.kernel.as_ref() else {
            return self.sample(idx);
        };

        let first = idx - kernel.half_width + 1;
        let (mut left, mut right) = (0.0f32, 0.0f32);
        for (j, tap) in kernel.row(phase).iter().enumerate() {
            let s = self.sample(first + j as i64);
            left += s.left * tap;
            right += s.right * tap;
        }
        AudioFrame::from_stereo(left, right)
    }

    fn emit(&mut self, out: &mut Vec<TickedFrame>, flush: bool) {
        let Some(origin) = self.origin else {
            return;
        };
        let tps_in = self.input_rate.ticks_per_sample();
        let tps_out = self.output_rate.ticks_per_sample();
        let stream_end = origin + self.received * tps_in;
        let lookahead = self.kernel.as_ref().map_or(0, |k| k.half_width);

        let mut emitted = 0usize;
        loop {
            let rel = self.next_tick - origin;
            let idx = rel.div_euclid(tps_in);
            let ready = if flush {
                self.next_tick < stream_end
            } else {
                idx + lookahead < self.received
            };
            if !ready {
                break;
            }

            let frame = self.interpolate(idx, rel.rem_euclid(tps_in));
            out.push(TickedFrame::new(self.next_tick, frame));
            self.next_tick += tps_out;
            emitted += 1;
        }

        if emitted > 0 {
            trace!("Resampler emitted {} frames up to tick {}", emitted, self.next_tick);
        }

        let keep_from = (self.next_tick - origin).div_euclid(tps_in) - self.retain + 1;
        while self.history_start < keep_from && !self.history.is_empty() {
            self.history.pop_front();
            self.history_start += 1;
        }
    }
}
