//! Pipeline control surface
//!
//! [`Pipeline`] is the scheduler-facing side of the playback pipeline: it
//! admits passages, builds and spawns their chains, and talks to the
//! [`Mixer`] only through the mixer's command and retire queues. The mixer
//! itself is handed to whatever drives output (a sink or the CLI).
//!
//! Working-rate changes are only accepted at a chain boundary, i.e. when no
//! chain is active; a scheduler retries after the current passages finish.

use crate::audio::decoder::Decoder;
use crate::audio::resampler::Resampler;
use crate::error::{Error, Result};
use crate::playback::chain::{ChainOutcome, ChainShared, StreamChain};
use crate::playback::fader::FadeProcessor;
use crate::playback::mixer::{BusCommand, MixSlot, Mixer, MixerControl, MixerState, MixerStats};
use crate::playback::ring_buffer::ChainRingBuffer;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tickmix_common::params::PipelineParams;
use tickmix_common::timing::{align_up, PassageTiming, SampleRate, Tick};
use tickmix_common::FadeCurve;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Control-side record of a running chain
struct ActiveChain {
    shared: Arc<ChainShared>,
    handle: Option<JoinHandle<ChainOutcome>>,
}

impl ActiveChain {
    fn join(&mut self, id: Uuid) -> Option<ChainOutcome> {
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(outcome) => {
                debug!("Chain worker {} joined successfully", id);
                Some(outcome)
            }
            Err(e) => {
                error!("Chain worker {} join failed: {:?}", id, e);
                None
            }
        }
    }
}

/// A chain that has left the mix bus
#[derive(Debug)]
pub struct RetiredChain {
    pub id: Uuid,
    /// `None` if the worker panicked
    pub outcome: Option<ChainOutcome>,
    pub underruns: u64,
    pub frames_discarded: u64,
}

/// Scheduler-facing handle to the playback pipeline
pub struct Pipeline {
    params: PipelineParams,
    working_rate: SampleRate,
    control: MixerControl,
    chains: HashMap<Uuid, ActiveChain>,
}

impl Pipeline {
    /// Validate `params` and build the pipeline and its mixer
    pub fn new(params: PipelineParams) -> Result<(Pipeline, Mixer)> {
        let (mixer, control) = Mixer::new(&params)?;
        let working_rate = params.working_rate()?;
        info!(
            "Pipeline ready: working rate {}, parallelism {}, ring buffer {}ms",
            working_rate, params.parallelism, params.ring_buffer_ms
        );
        let pipeline = Pipeline {
            chains: HashMap::with_capacity(params.parallelism),
            params,
            working_rate,
            control,
        };
        Ok((pipeline, mixer))
    }

    pub fn params(&self) -> &PipelineParams {
        &self.params
    }

    pub fn working_rate(&self) -> SampleRate {
        self.working_rate
    }

    /// Chains started and not yet retired
    pub fn active_chains(&self) -> usize {
        self.chains.len()
    }

    pub fn is_active(&self, id: Uuid) -> bool {
        self.chains.contains_key(&id)
    }

    /// Mixer position, readable while the mixer runs on another thread
    pub fn current_position_tick(&self) -> Tick {
        self.control.shared().position()
    }

    pub fn stats(&self) -> MixerStats {
        self.control.shared().stats()
    }

    /// Start a chain for passage `id`
    ///
    /// `mix_start` is the mix position at which `timing.start_tick` plays;
    /// `None` (or a position already passed) starts it at the current
    /// position. It is rounded up to the working-rate grid.
    pub fn start_passage(
        &mut self,
        id: Uuid,
        decoder: Box<dyn Decoder>,
        timing: PassageTiming,
        mix_start: Option<Tick>,
    ) -> Result<()> {
        self.collect_retired();

        if let Err(e) = timing.check_alignment(self.working_rate) {
            error!("Rejecting passage {}: {}", id, e);
            return Err(e.into());
        }
        if self.chains.contains_key(&id) {
            return Err(Error::DuplicateChain(id));
        }
        if self.chains.len() >= self.params.parallelism {
            warn!(
                "Admission refused for {}: {} chains active",
                id,
                self.chains.len()
            );
            return Err(Error::TooManyChains {
                limit: self.params.parallelism,
            });
        }

        let rate = self.working_rate;
        let mix_start = mix_start.map(|t| align_up(t, rate));
        let capacity = self.params.ring_buffer_frames(rate);
        let (producer, consumer) = ChainRingBuffer::new(capacity);
        let resampler =
            Resampler::new(decoder.sample_rate(), rate, &self.params, timing.start_tick)?;
        let fader = FadeProcessor::new(timing, rate, &self.params);
        let shared = Arc::new(ChainShared::default());

        let chain = StreamChain::new(
            id,
            timing,
            decoder,
            resampler,
            fader,
            producer,
            Arc::clone(&shared),
            Duration::from_millis(self.params.worker_backoff_ms),
        );
        let handle = chain.spawn()?;

        let slot = MixSlot::new(id, consumer, Arc::clone(&shared), &timing, mix_start);
        if self.control.send(BusCommand::Add(slot)).is_err() {
            warn!("Mixer command queue full, abandoning passage {}", id);
            shared.request_stop();
            let mut abandoned = ActiveChain {
                shared,
                handle: Some(handle),
            };
            abandoned.join(id);
            return Err(Error::BufferFull);
        }

        info!(
            "Started passage {} ({} -> {}) at mix position {:?}",
            id, timing.start_tick, timing.end_tick, mix_start
        );
        self.chains.insert(
            id,
            ActiveChain {
                shared,
                handle: Some(handle),
            },
        );
        Ok(())
    }

    /// Cancel passage `id`
    ///
    /// The chain leaves the mix bus before the next pulled frame; its worker
    /// is stopped and joined here.
    pub fn stop_passage(&mut self, id: Uuid) -> Result<RetiredChain> {
        let mut chain = self.chains.remove(&id).ok_or(Error::ChainNotFound(id))?;
        chain.shared.request_stop();
        // Keep retrying: the mixer drains this queue every step
        let mut command = BusCommand::Remove(id);
        let mut attempts = 0;
        while let Err(back) = self.control.send(command) {
            command = back;
            attempts += 1;
            if attempts > 1000 {
                warn!("Mixer not draining commands; chain {} left on bus", id);
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        let outcome = chain.join(id);
        info!("Stopped passage {}", id);
        Ok(RetiredChain {
            id,
            outcome,
            underruns: chain.shared.underruns(),
            frames_discarded: chain
                .shared
                .frames_discarded
                .load(std::sync::atomic::Ordering::Relaxed),
        })
    }

    /// Release the chains the mixer has finished with
    pub fn collect_retired(&mut self) -> Vec<RetiredChain> {
        let mut retired = Vec::new();
        while let Some(mut slot) = self.control.take_retired() {
            let id = slot.id();
            let dropped = slot.clear();
            if dropped > 0 {
                debug!("Chain {}: {} buffered frames dropped", id, dropped);
            }
            let shared = Arc::clone(slot.shared());
            drop(slot);

            // Stopped chains were already joined by stop_passage
            let Some(mut chain) = self.chains.remove(&id) else {
                continue;
            };
            chain.shared.request_stop();
            let outcome = chain.join(id);
            if let Some(ChainOutcome::Failed(e)) = &outcome {
                warn!("Retired failed chain {}: {}", id, e);
            }
            retired.push(RetiredChain {
                id,
                outcome,
                underruns: shared.underruns(),
                frames_discarded: shared
                    .frames_discarded
                    .load(std::sync::atomic::Ordering::Relaxed),
            });
        }
        retired
    }

    /// Change the working sample rate between passages
    ///
    /// Fails with [`Error::RateReconfiguration`] while any chain is active.
    /// The mixer position moves to the next boundary of the new rate.
    pub fn reconfigure_working_rate(&mut self, rate: SampleRate) -> Result<()> {
        self.collect_retired();
        if rate == self.working_rate {
            return Ok(());
        }
        if !self.chains.is_empty() {
            return Err(Error::RateReconfiguration {
                requested: rate,
                active_chains: self.chains.len(),
            });
        }
        self.control
            .send(BusCommand::SetWorkingRate(rate))
            .map_err(|_| Error::BufferFull)?;
        info!("Working rate {} -> {}", self.working_rate, rate);
        self.working_rate = rate;
        self.params.working_sample_rate = rate.hz();
        Ok(())
    }

    pub fn set_master_volume(&mut self, volume: f32) -> Result<()> {
        let mut candidate = self.params.clone();
        candidate.master_volume = volume;
        candidate.validate()?;
        self.control
            .send(BusCommand::SetVolume(volume))
            .map_err(|_| Error::BufferFull)?;
        self.params.master_volume = volume;
        Ok(())
    }

    /// Hold the mix position; chains keep their buffers full but nothing is
    /// consumed until [`Pipeline::resume`]
    pub fn pause(&mut self) -> Result<()> {
        self.control
            .send(BusCommand::Pause)
            .map_err(|_| Error::BufferFull)?;
        info!("Playback paused at tick {}", self.current_position_tick());
        Ok(())
    }

    /// Continue from the held position, fading the output in over `fade_ticks`
    pub fn resume(&mut self, fade_ticks: Tick, curve: FadeCurve) -> Result<()> {
        self.control
            .send(BusCommand::Resume {
                fade_ticks: fade_ticks.max(0),
                curve,
            })
            .map_err(|_| Error::BufferFull)?;
        info!(
            "Playback resuming at tick {} ({} fade-in)",
            self.current_position_tick(),
            curve
        );
        Ok(())
    }

    /// Transport state as last applied by the mixer
    pub fn state(&self) -> MixerState {
        self.control.shared().state()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.chains.is_empty() {
            return;
        }
        debug!("Shutting down {} chain workers", self.chains.len());
        for chain in self.chains.values() {
            chain.shared.request_stop();
        }
        for (id, chain) in self.chains.iter_mut() {
            chain.join(*id);
        }
    }
}
