//! Tick-synchronized mixer
//!
//! Sums the gain-adjusted frames of every chain on the mix bus into one
//! [`OutputFrame`] per output step.
//!
//! **Output path rules:**
//! - [`Mixer::next_output_frame`] never blocks and never allocates: it pops
//!   at most a bounded number of frames per chain and works on a slot vector
//!   preallocated to the admission limit.
//! - Chains join and leave through a bounded lock-free command queue drained
//!   at the start of each step; removed slots go back to the control side
//!   through a retire queue so their buffers are freed there. A slot that
//!   finds the retire queue full waits in a preallocated overflow list and
//!   is handed back on a later step.
//! - An empty buffer makes that chain contribute exact silence for the step
//!   and bumps its underrun counter. Frames that show up after their tick
//!   has passed are dropped until the chain is back in step.
//!
//! **Pause:** a paused mixer emits silence at a held position without
//! popping from any chain, so every chain resumes exactly where it stopped.
//! Resuming can ramp the mixed output back in with a [`FadeCurve`],
//! independently of each passage's own fades.
//!
//! **Timeline:** each slot maps mix positions to chain ticks with a fixed
//! offset (`mix_start - start_tick`), so two chains scheduled to overlap are
//! summed sample by sample and a crossfade is simply a LeadOut and a LeadIn
//! landing on the same mix positions.

use crate::audio::output::FrameSource;
use crate::audio::types::{FadedFrame, OutputFormat, OutputFrame};
use crate::error::Result;
use crate::playback::chain::ChainShared;
use crate::playback::ring_buffer::{BufferEmpty, FrameConsumer};
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tickmix_common::params::PipelineParams;
use tickmix_common::FadeCurve;
use tickmix_common::timing::{align_up, ticks_to_ms, PassageTiming, SampleRate, Tick, TICK_RATE};
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Capacity of the control → mixer command queue
const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Commands applied per output step
const MAX_COMMANDS_PER_STEP: usize = 16;

/// Late frames a single slot may drop in one step
const MAX_DISCARD_PER_STEP: usize = 8;

/// Underrun warnings are logged at most once per this many ticks of output
const UNDERRUN_WARN_INTERVAL: Tick = TICK_RATE;

/// One chain's place on the mix bus
pub struct MixSlot {
    id: Uuid,
    consumer: FrameConsumer,
    shared: Arc<ChainShared>,
    /// Mix position of the chain's `start_tick`; resolved when the slot is added
    requested_start: Option<Tick>,
    mix_start: Tick,
    start_tick: Tick,
    end_tick: Tick,
    /// Frame popped ahead of its tick
    stash: Option<FadedFrame>,
}

impl MixSlot {
    /// `mix_start` of `None` starts the chain at the mixer's current position
    pub fn new(
        id: Uuid,
        consumer: FrameConsumer,
        shared: Arc<ChainShared>,
        timing: &PassageTiming,
        mix_start: Option<Tick>,
    ) -> Self {
        Self {
            id,
            consumer,
            shared,
            requested_start: mix_start,
            mix_start: 0,
            start_tick: timing.start_tick,
            end_tick: timing.end_tick,
            stash: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn shared(&self) -> &Arc<ChainShared> {
        &self.shared
    }

    /// Mix position at which this chain's first frame plays
    pub fn mix_start(&self) -> Tick {
        self.mix_start
    }

    /// Drop whatever is still buffered, returning the count
    pub fn clear(&mut self) -> usize {
        self.stash.take().map_or(0, |_| 1) + self.consumer.clear()
    }

    fn chain_tick(&self, position: Tick) -> Tick {
        position - self.mix_start + self.start_tick
    }

    /// Frame for chain tick `tick`, or `None` for silence
    ///
    /// The bool is true when the silence is an underrun.
    fn frame_at(&mut self, tick: Tick) -> (Option<FadedFrame>, bool) {
        if let Some(frame) = self.stash {
            if frame.tick > tick {
                return (None, false);
            }
            self.stash = None;
            if frame.tick == tick {
                return (Some(frame), false);
            }
            self.shared.frames_discarded.fetch_add(1, Ordering::Relaxed);
        }

        for _ in 0..MAX_DISCARD_PER_STEP {
            match self.consumer.pop() {
                Ok(frame) if frame.tick == tick => return (Some(frame), false),
                Ok(frame) if frame.tick > tick => {
                    self.stash = Some(frame);
                    return (None, false);
                }
                Ok(_) => {
                    self.shared.frames_discarded.fetch_add(1, Ordering::Relaxed);
                }
                Err(BufferEmpty { producer_finished }) => return (None, !producer_finished),
            }
        }
        (None, true)
    }

    /// Empty and still expecting frames
    fn is_starved(&self) -> bool {
        self.stash.is_none() && self.consumer.is_starved()
    }
}

/// Control → mixer messages
pub enum BusCommand {
    Add(MixSlot),
    Remove(Uuid),
    SetWorkingRate(SampleRate),
    SetVolume(f32),
    /// Hold the position and emit silence
    Pause,
    /// Continue from the held position, ramping the output in over
    /// `fade_ticks` (0 resumes at full level)
    Resume { fade_ticks: Tick, curve: FadeCurve },
}

/// Transport state of the mixer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MixerState {
    Playing,
    Paused,
}

/// Mixer-level fade-in after a resume
#[derive(Debug, Clone, Copy)]
struct ResumeRamp {
    fade_ticks: Tick,
    curve: FadeCurve,
    elapsed: Tick,
}

impl ResumeRamp {
    fn gain(&self) -> f64 {
        self.curve
            .fade_in_gain(self.elapsed as f64 / self.fade_ticks as f64)
    }
}

/// Mixer counters readable from any thread
#[derive(Debug, Default)]
pub struct MixerShared {
    position: AtomicI64,
    frames_mixed: AtomicU64,
    underruns: AtomicU64,
    clipped_samples: AtomicU64,
    active_chains: AtomicUsize,
    paused: AtomicBool,
    paused_frames: AtomicU64,
}

impl MixerShared {
    pub fn position(&self) -> Tick {
        self.position.load(Ordering::Acquire)
    }

    pub fn state(&self) -> MixerState {
        if self.paused.load(Ordering::Acquire) {
            MixerState::Paused
        } else {
            MixerState::Playing
        }
    }

    pub fn stats(&self) -> MixerStats {
        MixerStats {
            position_tick: self.position(),
            position_ms: ticks_to_ms(self.position()),
            frames_mixed: self.frames_mixed.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            clipped_samples: self.clipped_samples.load(Ordering::Relaxed),
            active_chains: self.active_chains.load(Ordering::Relaxed),
            state: self.state(),
            paused_frames: self.paused_frames.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of mixer counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixerStats {
    pub position_tick: Tick,
    pub position_ms: i64,
    pub frames_mixed: u64,
    pub underruns: u64,
    pub clipped_samples: u64,
    pub active_chains: usize,
    pub state: MixerState,
    /// Silent frames emitted while paused
    pub paused_frames: u64,
}

/// Control-side handle to a [`Mixer`]
pub struct MixerControl {
    commands: HeapProd<BusCommand>,
    retired: HeapCons<MixSlot>,
    shared: Arc<MixerShared>,
}

impl MixerControl {
    /// Queue a command; hands it back if the queue is full
    pub fn send(&mut self, command: BusCommand) -> std::result::Result<(), BusCommand> {
        self.commands.try_push(command)
    }

    /// Next slot the mixer has let go of
    pub fn take_retired(&mut self) -> Option<MixSlot> {
        self.retired.try_pop()
    }

    pub fn shared(&self) -> &Arc<MixerShared> {
        &self.shared
    }
}

/// The mix bus and its output step
pub struct Mixer {
    slots: Vec<MixSlot>,
    commands: HeapCons<BusCommand>,
    retired: HeapProd<MixSlot>,
    /// Slots waiting for room in the retire queue
    retire_backlog: Vec<MixSlot>,
    shared: Arc<MixerShared>,
    state: MixerState,
    resume: Option<ResumeRamp>,
    rate: SampleRate,
    format: OutputFormat,
    master_volume: f32,
    position: Tick,
    last_gain_sum: f64,
    last_underrun_warn: Option<Tick>,
}

impl Mixer {
    pub fn new(params: &PipelineParams) -> Result<(Mixer, MixerControl)> {
        params.validate()?;
        let rate = params.working_rate()?;
        let format = OutputFormat::from_params(params)?;

        let (command_tx, command_rx) = HeapRb::<BusCommand>::new(COMMAND_QUEUE_CAPACITY).split();
        // Every slot ever added can sit in the retire queue at once
        let retire_capacity = params.parallelism * 2 + COMMAND_QUEUE_CAPACITY;
        let (retire_tx, retire_rx) = HeapRb::<MixSlot>::new(retire_capacity).split();
        let shared = Arc::new(MixerShared::default());

        debug!(
            "Mixer: {} {}ch {}-bit, volume {:.2}, up to {} chains",
            rate,
            format.channels,
            format.bits.bits(),
            params.master_volume,
            params.parallelism
        );

        let mixer = Mixer {
            slots: Vec::with_capacity(params.parallelism),
            commands: command_rx,
            retired: retire_tx,
            retire_backlog: Vec::with_capacity(params.parallelism + MAX_COMMANDS_PER_STEP),
            shared: Arc::clone(&shared),
            state: MixerState::Playing,
            resume: None,
            rate,
            format,
            master_volume: params.master_volume,
            position: 0,
            last_gain_sum: 0.0,
            last_underrun_warn: None,
        };
        let control = MixerControl {
            commands: command_tx,
            retired: retire_rx,
            shared,
        };
        Ok((mixer, control))
    }

    /// Mix position of the next frame to be emitted
    pub fn position(&self) -> Tick {
        self.position
    }

    pub fn working_rate(&self) -> SampleRate {
        self.rate
    }

    pub fn active_chains(&self) -> usize {
        self.slots.len()
    }

    pub fn state(&self) -> MixerState {
        self.state
    }

    /// Whether a resume ramp is still rising
    pub fn is_resume_fading(&self) -> bool {
        self.resume.is_some()
    }

    /// Retired slots not yet handed to the control side
    pub fn retire_backlog(&self) -> usize {
        self.retire_backlog.len()
    }

    /// Sum of the gains applied in the last step (diagnostics)
    pub fn last_gain_sum(&self) -> f64 {
        self.last_gain_sum
    }

    pub fn stats(&self) -> MixerStats {
        self.shared.stats()
    }

    fn apply_commands(&mut self) {
        for _ in 0..MAX_COMMANDS_PER_STEP {
            let Some(command) = self.commands.try_pop() else {
                break;
            };
            match command {
                BusCommand::Add(mut slot) => {
                    let start = slot.requested_start.unwrap_or(self.position);
                    if start < self.position {
                        debug!(
                            "Chain {} added {}ms late, starting at current position",
                            slot.id,
                            ticks_to_ms(self.position - start)
                        );
                    }
                    slot.mix_start = start.max(self.position);
                    debug!("Mix bus: add {} at position {}", slot.id, slot.mix_start);
                    self.slots.push(slot);
                }
                BusCommand::Remove(id) => {
                    if let Some(index) = self.slots.iter().position(|s| s.id == id) {
                        debug!("Mix bus: remove {}", id);
                        let slot = self.slots.swap_remove(index);
                        self.retire(slot);
                    }
                }
                BusCommand::SetWorkingRate(rate) => {
                    let old = self.position;
                    self.rate = rate;
                    self.position = align_up(self.position, rate);
                    self.shared.position.store(self.position, Ordering::Release);
                    debug!(
                        "Mixer working rate -> {} (position {} -> {})",
                        rate, old, self.position
                    );
                }
                BusCommand::SetVolume(volume) => {
                    self.master_volume = volume.clamp(0.0, 1.0);
                }
                BusCommand::Pause => {
                    if self.state == MixerState::Playing {
                        debug!("Mixer paused at position {}", self.position);
                        self.state = MixerState::Paused;
                        self.resume = None;
                        self.shared.paused.store(true, Ordering::Release);
                    }
                }
                BusCommand::Resume { fade_ticks, curve } => {
                    if self.state == MixerState::Paused {
                        debug!(
                            "Mixer resumed at position {} ({} fade over {}ms)",
                            self.position,
                            curve,
                            ticks_to_ms(fade_ticks)
                        );
                        self.state = MixerState::Playing;
                        self.resume = (fade_ticks > 0).then_some(ResumeRamp {
                            fade_ticks,
                            curve,
                            elapsed: 0,
                        });
                        self.shared.paused.store(false, Ordering::Release);
                    }
                }
            }
        }
        self.shared
            .active_chains
            .store(self.slots.len(), Ordering::Relaxed);
    }

    fn retire(&mut self, slot: MixSlot) {
        if let Err(slot) = self.retired.try_push(slot) {
            self.retire_backlog.push(slot);
        }
    }

    fn drain_retire_backlog(&mut self) {
        while let Some(slot) = self.retire_backlog.pop() {
            if let Err(slot) = self.retired.try_push(slot) {
                self.retire_backlog.push(slot);
                break;
            }
        }
    }

    fn note_underrun(&mut self, id: Uuid) {
        self.shared.underruns.fetch_add(1, Ordering::Relaxed);
        let due = match self.last_underrun_warn {
            Some(last) => self.position - last >= UNDERRUN_WARN_INTERVAL,
            None => true,
        };
        if due {
            warn!(
                "Buffer underrun: chain {} at position {}ms (total {})",
                id,
                ticks_to_ms(self.position),
                self.shared.underruns.load(Ordering::Relaxed)
            );
            self.last_underrun_warn = Some(self.position);
        }
    }

    /// Produce one frame at the current position and advance
    ///
    /// While paused the frame is silent and carries the held position, which
    /// does not advance.
    pub fn mix_step(&mut self) -> OutputFrame {
        self.drain_retire_backlog();
        self.apply_commands();

        if self.state == MixerState::Paused {
            self.last_gain_sum = 0.0;
            self.shared.paused_frames.fetch_add(1, Ordering::Relaxed);
            return OutputFrame::silence(self.position, self.format.channels);
        }

        let position = self.position;
        let tps = self.rate.ticks_per_sample();
        let mut left = 0.0f64;
        let mut right = 0.0f64;
        let mut gain_sum = 0.0f64;

        let mut index = 0;
        while index < self.slots.len() {
            let slot = &mut self.slots[index];
            if position < slot.mix_start {
                index += 1;
                continue;
            }

            let tick = slot.chain_tick(position);
            let (frame, underrun) = slot.frame_at(tick);
            if let Some(frame) = frame {
                let gain = frame.gain as f64;
                left += frame.frame.left as f64 * gain;
                right += frame.frame.right as f64 * gain;
                gain_sum += gain;
            } else if underrun {
                slot.shared.underruns.fetch_add(1, Ordering::Relaxed);
                let id = slot.id;
                self.note_underrun(id);
            }

            if tick + tps >= self.slots[index].end_tick {
                let slot = self.slots.swap_remove(index);
                trace!("Mix bus: chain {} reached end_tick", slot.id);
                self.retire(slot);
            } else {
                index += 1;
            }
        }

        let mut volume = self.master_volume as f64;
        if let Some(ramp) = self.resume.as_mut() {
            volume *= ramp.gain();
            ramp.elapsed += tps;
            if ramp.elapsed >= ramp.fade_ticks {
                self.resume = None;
            }
        }
        left *= volume;
        right *= volume;

        let mut out = OutputFrame::silence(position, self.format.channels);
        let mut clipped = 0;
        if self.format.channels == 1 {
            let (sample, clip) = self.format.quantize((left + right) * 0.5);
            out.samples[0] = sample;
            clipped += clip as u64;
        } else {
            let (l, clip_l) = self.format.quantize(left);
            let (r, clip_r) = self.format.quantize(right);
            out.samples = [l, r];
            clipped += clip_l as u64 + clip_r as u64;
        }
        if clipped > 0 {
            self.shared
                .clipped_samples
                .fetch_add(clipped, Ordering::Relaxed);
        }

        self.last_gain_sum = gain_sum;
        self.position += tps;
        self.shared.position.store(self.position, Ordering::Release);
        self.shared.frames_mixed.fetch_add(1, Ordering::Relaxed);
        self.shared
            .active_chains
            .store(self.slots.len(), Ordering::Relaxed);
        out
    }
}

impl FrameSource for Mixer {
    fn next_output_frame(&mut self) -> OutputFrame {
        self.mix_step()
    }

    fn output_format(&self) -> OutputFormat {
        self.format
    }

    fn sample_rate(&self) -> SampleRate {
        self.rate
    }

    fn is_starved(&mut self) -> bool {
        self.apply_commands();
        if self.state == MixerState::Paused {
            return false;
        }
        let position = self.position;
        self.slots
            .iter()
            .any(|slot| position >= slot.mix_start && slot.is_starved())
    }

    fn is_idle(&mut self) -> bool {
        self.apply_commands();
        self.slots.is_empty()
    }
}
