//! Lead-in / lead-out gain envelope
//!
//! Attaches a fade gain to every working-rate frame of a chain, addressed by
//! tick against the passage's [`PassageTiming`]:
//!
//! | tick range                         | state   | gain |
//! |------------------------------------|---------|------|
//! | `t < start`                        | Silent  | 0 |
//! | `start ≤ t < lead_in_end`          | LeadIn  | fade-in curve while on the ramp, then 1 |
//! | `lead_in_end ≤ t < lead_out_start` | Steady  | 1 |
//! | `lead_out_start ≤ t < end`         | LeadOut | 1, then fade-out curve on the ramp |
//! | `t ≥ end`                          | Faded   | 0 |
//!
//! The fade-in ramp starts at `start_tick`; the fade-out ramp ends at
//! `end_tick`. Gains are computed from integer tick offsets, so a ramp lands
//! on the same samples regardless of working rate.
//!
//! **Quick ramps:** if the RMS of the first `rms_window` of the lead-in
//! reaches `quick_ramp_up_threshold`, the fade-in is shortened to
//! `quick_ramp_up_duration`; likewise for the last `rms_window` before
//! `end_tick`. Frames whose gain depends on a pending decision are held back
//! until the analysis window is complete, so a decision never changes gains
//! that were already emitted.

use crate::audio::types::{FadedFrame, TickedFrame};
use std::collections::VecDeque;
use tickmix_common::params::PipelineParams;
use tickmix_common::timing::{ticks_to_ms, PassageTiming, SampleRate, Tick};
use tickmix_common::FadeCurve;
use tracing::{debug, trace};

/// Envelope state of the most recently emitted frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeState {
    Silent,
    LeadIn,
    Steady,
    LeadOut,
    Faded,
}

/// RMS measurement over a tick window, deciding one ramp length
struct QuickRampWindow {
    window_start: Tick,
    window_end: Tick,
    /// Earliest tick whose gain depends on the decision
    hold_from: Tick,
    threshold: f64,
    nominal: Tick,
    quick: Tick,
    sum_sq: f64,
    frames: u64,
}

impl QuickRampWindow {
    fn accumulate(&mut self, frame: &TickedFrame) {
        if frame.tick >= self.window_start && frame.tick < self.window_end {
            self.sum_sq += frame.frame.mean_square();
            self.frames += 1;
        }
    }

    fn rms(&self) -> f64 {
        if self.frames == 0 {
            0.0
        } else {
            (self.sum_sq / self.frames as f64).sqrt()
        }
    }

    fn decide(&self) -> Tick {
        if self.rms() >= self.threshold {
            self.nominal.min(self.quick)
        } else {
            self.nominal
        }
    }
}

/// Per-chain fade processor
pub struct FadeProcessor {
    timing: PassageTiming,
    tps: Tick,
    fade_in_curve: FadeCurve,
    fade_out_curve: FadeCurve,

    effective_fade_in: Option<Tick>,
    effective_fade_out: Option<Tick>,
    ramp_up: Option<QuickRampWindow>,
    ramp_down: Option<QuickRampWindow>,

    pending: VecDeque<TickedFrame>,
    state: FadeState,
}

impl FadeProcessor {
    /// `timing` must already be validated and aligned to `rate`.
    pub fn new(timing: PassageTiming, rate: SampleRate, params: &PipelineParams) -> Self {
        let window = params.rms_window_ticks();

        let up_quick = params.quick_ramp_up_ticks();
        let ramp_up = (up_quick < timing.fade_in_duration_ticks).then(|| {
            let window_end = (timing.start_tick + window).min(timing.lead_in_end_tick);
            QuickRampWindow {
                window_start: timing.start_tick,
                window_end,
                hold_from: timing.start_tick,
                threshold: params.quick_ramp_up_threshold,
                nominal: timing.fade_in_duration_ticks,
                quick: up_quick,
                sum_sq: 0.0,
                frames: 0,
            }
        });

        let down_quick = params.quick_ramp_down_ticks();
        let ramp_down = (down_quick < timing.fade_out_duration_ticks).then(|| {
            let window_start = (timing.end_tick - window).max(timing.lead_out_start_tick);
            let ramp_start = timing.end_tick - timing.fade_out_duration_ticks;
            QuickRampWindow {
                window_start,
                window_end: timing.end_tick,
                hold_from: window_start.min(ramp_start),
                threshold: params.quick_ramp_down_threshold,
                nominal: timing.fade_out_duration_ticks,
                quick: down_quick,
                sum_sq: 0.0,
                frames: 0,
            }
        });

        debug!(
            "FadeProcessor: start={} end={} fade_in={}ms fade_out={}ms quick_up={} quick_down={}",
            timing.start_tick,
            timing.end_tick,
            ticks_to_ms(timing.fade_in_duration_ticks),
            ticks_to_ms(timing.fade_out_duration_ticks),
            ramp_up.is_some(),
            ramp_down.is_some()
        );

        Self {
            timing,
            tps: rate.ticks_per_sample(),
            fade_in_curve: params.fade_in_curve,
            fade_out_curve: params.fade_out_curve,
            effective_fade_in: ramp_up.is_none().then_some(timing.fade_in_duration_ticks),
            effective_fade_out: ramp_down.is_none().then_some(timing.fade_out_duration_ticks),
            ramp_up,
            ramp_down,
            pending: VecDeque::new(),
            state: FadeState::Silent,
        }
    }

    /// State of the most recently emitted frame
    pub fn state(&self) -> FadeState {
        self.state
    }

    /// Effective fade-in length, once decided
    pub fn effective_fade_in(&self) -> Option<Tick> {
        self.effective_fade_in
    }

    /// Effective fade-out length, once decided
    pub fn effective_fade_out(&self) -> Option<Tick> {
        self.effective_fade_out
    }

    /// Frames held back awaiting a quick-ramp decision
    pub fn held_frames(&self) -> usize {
        self.pending.len()
    }

    /// Envelope region of `tick`
    pub fn state_at(&self, tick: Tick) -> FadeState {
        let t = &self.timing;
        if tick < t.start_tick {
            FadeState::Silent
        } else if tick >= t.end_tick {
            FadeState::Faded
        } else if tick < t.lead_in_end_tick {
            FadeState::LeadIn
        } else if tick < t.lead_out_start_tick {
            FadeState::Steady
        } else {
            FadeState::LeadOut
        }
    }

    /// Accept one frame and append every frame whose gain is now known to `out`
    pub fn process(&mut self, frame: TickedFrame, out: &mut Vec<FadedFrame>) {
        let tps = self.tps;

        if let Some(window) = self.ramp_up.as_mut() {
            window.accumulate(&frame);
            if frame.tick + tps >= window.window_end {
                let decided = window.decide();
                debug!(
                    "Quick ramp up: rms={:.4} threshold={:.2} -> fade_in {}ms",
                    window.rms(),
                    window.threshold,
                    ticks_to_ms(decided)
                );
                self.effective_fade_in = Some(decided);
                self.ramp_up = None;
            }
        }

        if let Some(window) = self.ramp_down.as_mut() {
            window.accumulate(&frame);
            if frame.tick + tps >= window.window_end {
                let decided = window.decide();
                debug!(
                    "Quick ramp down: rms={:.4} threshold={:.2} -> fade_out {}ms",
                    window.rms(),
                    window.threshold,
                    ticks_to_ms(decided)
                );
                self.effective_fade_out = Some(decided);
                self.ramp_down = None;
            }
        }

        self.pending.push_back(frame);
        self.release(out);
    }

    /// End of stream: decide with whatever was measured and emit everything held
    pub fn flush(&mut self, out: &mut Vec<FadedFrame>) {
        if let Some(window) = self.ramp_up.take() {
            self.effective_fade_in = Some(window.decide());
        }
        if let Some(window) = self.ramp_down.take() {
            self.effective_fade_out = Some(window.decide());
        }
        self.release(out);
    }

    fn is_held(&self, tick: Tick) -> bool {
        let held_in = self.effective_fade_in.is_none()
            && tick >= self.timing.start_tick
            && tick < self.timing.start_tick + self.timing.fade_in_duration_ticks;
        let held_out = match (&self.ramp_down, self.effective_fade_out) {
            (Some(window), None) => tick >= window.hold_from && tick < self.timing.end_tick,
            _ => false,
        };
        held_in || held_out
    }

    fn release(&mut self, out: &mut Vec<FadedFrame>) {
        while let Some(front) = self.pending.front() {
            if self.is_held(front.tick) {
                trace!("Holding frame at tick {} for quick-ramp analysis", front.tick);
                break;
            }
            let gain = self.gain_at(front.tick);
            let next_state = self.state_at(front.tick);
            if next_state != self.state {
                debug!("Fade state {:?} -> {:?} at tick {}", self.state, next_state, front.tick);
                self.state = next_state;
            }
            out.push(FadedFrame {
                tick: front.tick,
                frame: front.frame,
                gain: gain as f32,
            });
            self.pending.pop_front();
        }
    }

    /// Gain at `tick` using the decided ramp lengths
    fn gain_at(&self, tick: Tick) -> f64 {
        let t = &self.timing;
        if tick < t.start_tick || tick >= t.end_tick {
            return 0.0;
        }

        let mut gain = 1.0;

        let fade_in = self.effective_fade_in.unwrap_or(t.fade_in_duration_ticks);
        if fade_in > 0 && tick < t.start_tick + fade_in {
            let progress = (tick - t.start_tick) as f64 / fade_in as f64;
            gain *= self.fade_in_curve.fade_in_gain(progress);
        }

        let fade_out = self.effective_fade_out.unwrap_or(t.fade_out_duration_ticks);
        let ramp_start = t.end_tick - fade_out;
        if fade_out > 0 && tick >= ramp_start {
            let progress = (tick - ramp_start) as f64 / fade_out as f64;
            gain *= self.fade_out_curve.fade_out_gain(progress);
        }

        gain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::types::AudioFrame;
    use tickmix_common::timing::{ms_to_ticks, samples_to_ticks, TICK_RATE};

    const RATE: SampleRate = SampleRate::Hz44100;

    fn no_quick_ramps() -> PipelineParams {
        PipelineParams {
            quick_ramp_up_threshold: 1.0,
            quick_ramp_down_threshold: 1.0,
            ..Default::default()
        }
    }

    fn feed(fader: &mut FadeProcessor, timing: &PassageTiming, amplitude: f32) -> Vec<FadedFrame> {
        let mut out = Vec::new();
        let first = timing.start_tick / RATE.ticks_per_sample();
        let last = timing.end_tick / RATE.ticks_per_sample();
        for n in first..last {
            let frame = TickedFrame::new(samples_to_ticks(n, RATE), AudioFrame::from_mono(amplitude));
            fader.process(frame, &mut out);
        }
        fader.flush(&mut out);
        out
    }

    #[test]
    fn test_envelope_states_and_gains() {
        let timing = PassageTiming::with_fades(0, TICK_RATE, ms_to_ticks(100), ms_to_ticks(200));
        let mut fader = FadeProcessor::new(timing, RATE, &no_quick_ramps());
        assert_eq!(fader.state(), FadeState::Silent);

        let out = feed(&mut fader, &timing, 0.5);
        assert_eq!(out.len(), 44100);
        assert_eq!(fader.held_frames(), 0);

        // Ramp starts at zero and is linear in ticks
        assert_eq!(out[0].gain, 0.0);
        assert!((out[2205].gain - 0.5).abs() < 1e-6); // 50 ms into a 100 ms ramp
        // Steady region is unity
        assert_eq!(out[4410].gain, 1.0);
        assert_eq!(out[20000].gain, 1.0);
        // Fade-out begins at end - 200 ms with gain 1
        let ramp_start = 44100 - 8820;
        assert_eq!(out[ramp_start - 1].gain, 1.0);
        assert_eq!(out[ramp_start].gain, 1.0);
        assert!(out[44099].gain > 0.0 && out[44099].gain < 0.001);
        assert_eq!(fader.state(), FadeState::LeadOut);
    }

    #[test]
    fn test_state_at_boundaries() {
        let timing = PassageTiming {
            start_tick: 1000 * 640,
            end_tick: 5000 * 640,
            lead_in_end_tick: 2000 * 640,
            lead_out_start_tick: 4000 * 640,
            fade_in_duration_ticks: 500 * 640,
            fade_out_duration_ticks: 500 * 640,
        };
        let fader = FadeProcessor::new(timing, RATE, &no_quick_ramps());
        assert_eq!(fader.state_at(999 * 640), FadeState::Silent);
        assert_eq!(fader.state_at(1000 * 640), FadeState::LeadIn);
        assert_eq!(fader.state_at(2000 * 640), FadeState::Steady);
        assert_eq!(fader.state_at(4000 * 640), FadeState::LeadOut);
        assert_eq!(fader.state_at(5000 * 640), FadeState::Faded);
        assert_eq!(fader.gain_at(999 * 640), 0.0);
        assert_eq!(fader.gain_at(5000 * 640), 0.0);
        // Lead-in after the ramp ends is unity
        assert_eq!(fader.gain_at(1700 * 640), 1.0);
    }

    #[test]
    fn test_zero_duration_fades_pass_through() {
        let timing = PassageTiming::unfaded(0, ms_to_ticks(50));
        let mut fader = FadeProcessor::new(timing, RATE, &PipelineParams::default());
        let out = feed(&mut fader, &timing, 0.9);
        assert!(out.iter().all(|f| f.gain == 1.0));
    }

    #[test]
    fn test_quick_ramp_up_shortens_loud_lead_in() {
        let params = PipelineParams {
            quick_ramp_up_duration_ms: 100,
            ..Default::default()
        };
        let timing = PassageTiming::with_fades(0, 3 * TICK_RATE, TICK_RATE, 0);
        let mut fader = FadeProcessor::new(timing, RATE, &params);

        // Loud from the first sample: RMS 0.9 >= 0.75
        let out = feed(&mut fader, &timing, 0.9);
        assert_eq!(fader.effective_fade_in(), Some(ms_to_ticks(100)));
        assert!((out[2205].gain - 0.5).abs() < 1e-6);
        assert_eq!(out[4410].gain, 1.0);
    }

    #[test]
    fn test_quiet_lead_in_keeps_nominal_ramp() {
        let params = PipelineParams {
            quick_ramp_up_duration_ms: 100,
            ..Default::default()
        };
        let timing = PassageTiming::with_fades(0, 3 * TICK_RATE, TICK_RATE, 0);
        let mut fader = FadeProcessor::new(timing, RATE, &params);
        let out = feed(&mut fader, &timing, 0.2);
        assert_eq!(fader.effective_fade_in(), Some(TICK_RATE));
        assert!((out[22050].gain - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_frames_held_until_window_completes() {
        let params = PipelineParams {
            quick_ramp_up_duration_ms: 100,
            ..Default::default()
        };
        let timing = PassageTiming::with_fades(0, 3 * TICK_RATE, TICK_RATE, 0);
        let mut fader = FadeProcessor::new(timing, RATE, &params);

        let mut out = Vec::new();
        // 100 ms window = 4410 frames
        for n in 0..4409 {
            let frame = TickedFrame::new(samples_to_ticks(n, RATE), AudioFrame::from_mono(0.9));
            fader.process(frame, &mut out);
        }
        assert!(out.is_empty());
        assert_eq!(fader.held_frames(), 4409);

        let frame = TickedFrame::new(samples_to_ticks(4409, RATE), AudioFrame::from_mono(0.9));
        fader.process(frame, &mut out);
        assert_eq!(out.len(), 4410);
        assert_eq!(fader.held_frames(), 0);
    }

    #[test]
    fn test_quick_ramp_down_shortens_loud_ending() {
        let params = PipelineParams {
            quick_ramp_down_duration_ms: 250,
            ..Default::default()
        };
        let timing = PassageTiming::with_fades(0, 2 * TICK_RATE, 0, TICK_RATE);
        let mut fader = FadeProcessor::new(timing, RATE, &params);
        let out = feed(&mut fader, &timing, 0.8);

        assert_eq!(fader.effective_fade_out(), Some(ms_to_ticks(250)));
        // Nominal ramp would start at 1 s; shortened ramp starts at 1.75 s
        assert_eq!(out[44100].gain, 1.0);
        assert_eq!(out[77174].gain, 1.0);
        assert_eq!(out[77175].gain, 1.0);
        assert!(out[77176].gain < 1.0);
    }

    #[test]
    fn test_flush_decides_on_truncated_stream() {
        let params = PipelineParams {
            quick_ramp_up_duration_ms: 100,
            ..Default::default()
        };
        let timing = PassageTiming::with_fades(0, 3 * TICK_RATE, TICK_RATE, 0);
        let mut fader = FadeProcessor::new(timing, RATE, &params);
        let mut out = Vec::new();
        for n in 0..100 {
            let frame = TickedFrame::new(samples_to_ticks(n, RATE), AudioFrame::from_mono(0.9));
            fader.process(frame, &mut out);
        }
        assert!(out.is_empty());
        fader.flush(&mut out);
        assert_eq!(out.len(), 100);
        assert_eq!(fader.effective_fade_in(), Some(ms_to_ticks(100)));
    }
}
