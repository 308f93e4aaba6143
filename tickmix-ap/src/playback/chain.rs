//! Per-passage worker: decode, resample, fade, buffer
//!
//! A [`StreamChain`] owns every stage that runs off the output path for one
//! passage. It is moved onto its own thread by [`StreamChain::spawn`] and
//! pushes [`FadedFrame`]s into its ring buffer until the passage's `end_tick`
//! is reached, the decoder runs dry, or the control side sets the stop flag.
//!
//! A decode failure ends the chain early. The producer is always marked
//! finished on exit, so the mixer sees the buffer drain and then exact
//! silence for the rest of the window rather than an underrun.

use crate::audio::decoder::Decoder;
use crate::audio::resampler::Resampler;
use crate::audio::types::{FadedFrame, TickedFrame};
use crate::error::{Error, Result};
use crate::playback::fader::FadeProcessor;
use crate::playback::ring_buffer::{BufferFull, FrameProducer};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tickmix_common::timing::{ticks_to_seconds, PassageTiming};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// State shared between a chain's worker, the mixer slot and the control side
#[derive(Debug, Default)]
pub struct ChainShared {
    /// Set by the control side to cancel the worker
    pub stop: AtomicBool,
    /// Set by the worker when its decoder failed
    pub failed: AtomicBool,
    /// Frames pushed into the ring buffer
    pub frames_produced: AtomicU64,
    /// Output steps this chain had nothing to contribute (mixer side)
    pub underruns: AtomicU64,
    /// Frames the mixer dropped because they arrived after their tick
    pub frames_discarded: AtomicU64,
}

impl ChainShared {
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }
}

/// How a worker ended
#[derive(Debug)]
pub enum ChainOutcome {
    /// Reached `end_tick` or the end of the source
    Completed { frames: u64 },
    /// Stop flag observed before completion
    Cancelled,
    /// Decoder or timing failure; remaining window plays as silence
    Failed(Error),
}

impl ChainOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ChainOutcome::Completed { .. })
    }
}

/// Decoder → Resampler → FadeProcessor → ring buffer for one passage
pub struct StreamChain {
    id: Uuid,
    timing: PassageTiming,
    decoder: Box<dyn Decoder>,
    resampler: Resampler,
    fader: FadeProcessor,
    producer: FrameProducer,
    shared: Arc<ChainShared>,
    backoff: Duration,
}

impl StreamChain {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: Uuid,
        timing: PassageTiming,
        decoder: Box<dyn Decoder>,
        resampler: Resampler,
        fader: FadeProcessor,
        producer: FrameProducer,
        shared: Arc<ChainShared>,
        backoff: Duration,
    ) -> Self {
        Self {
            id,
            timing,
            decoder,
            resampler,
            fader,
            producer,
            shared,
            backoff,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Move the chain onto a named worker thread
    pub fn spawn(self) -> Result<JoinHandle<ChainOutcome>> {
        let name = format!("chain-{}", self.id);
        let handle = thread::Builder::new().name(name).spawn(move || self.run())?;
        Ok(handle)
    }

    /// Worker body; runs to completion on the calling thread
    pub fn run(mut self) -> ChainOutcome {
        debug!(
            "Chain {} started: {} -> {} ({:.3}s), native {} -> working {}",
            self.id,
            self.timing.start_tick,
            self.timing.end_tick,
            ticks_to_seconds(self.timing.duration_ticks()),
            self.decoder.sample_rate(),
            self.resampler.output_rate()
        );

        let outcome = self.produce();
        self.producer.mark_finished();

        match &outcome {
            ChainOutcome::Completed { frames } => {
                info!("Chain {} completed: {} frames", self.id, frames);
            }
            ChainOutcome::Cancelled => {
                debug!("Chain {} cancelled", self.id);
            }
            ChainOutcome::Failed(e) => {
                self.shared.failed.store(true, Ordering::Release);
                warn!(
                    "Chain {} failed, remaining window plays silence: {}",
                    self.id, e
                );
            }
        }
        outcome
    }

    fn produce(&mut self) -> ChainOutcome {
        let mut resampled: Vec<TickedFrame> = Vec::with_capacity(16);
        let mut faded: Vec<FadedFrame> = Vec::with_capacity(16);

        loop {
            if self.shared.stop_requested() {
                return ChainOutcome::Cancelled;
            }

            let input = match self.decoder.next_frame() {
                Ok(input) => input,
                Err(e) => {
                    // Everything already decoded still plays
                    self.fader.flush(&mut faded);
                    if !self.push_all(&mut faded) {
                        return ChainOutcome::Cancelled;
                    }
                    return ChainOutcome::Failed(Error::Decode(e));
                }
            };

            let source_ended = match input {
                Some(frame) => {
                    if let Err(e) = self.resampler.process(frame, &mut resampled) {
                        return ChainOutcome::Failed(e);
                    }
                    false
                }
                None => {
                    self.resampler.finish(&mut resampled);
                    true
                }
            };

            let mut reached_end = false;
            for frame in resampled.drain(..) {
                if frame.tick >= self.timing.end_tick {
                    reached_end = true;
                    break;
                }
                if frame.tick < self.timing.start_tick {
                    continue;
                }
                self.fader.process(frame, &mut faded);
            }

            if reached_end || source_ended {
                self.fader.flush(&mut faded);
            }
            if !self.push_all(&mut faded) {
                return ChainOutcome::Cancelled;
            }

            if reached_end || source_ended {
                if source_ended && !reached_end {
                    debug!(
                        "Chain {}: source ended at tick {} before end_tick {}",
                        self.id,
                        self.resampler.next_output_tick(),
                        self.timing.end_tick
                    );
                }
                return ChainOutcome::Completed {
                    frames: self.shared.frames_produced.load(Ordering::Relaxed),
                };
            }
        }
    }

    /// Push every frame in `frames`, backing off while the buffer is full
    ///
    /// Returns false if the stop flag was raised while waiting for room.
    fn push_all(&mut self, frames: &mut Vec<FadedFrame>) -> bool {
        for frame in frames.drain(..) {
            let mut pending = frame;
            loop {
                match self.producer.push(pending) {
                    Ok(()) => {
                        self.shared.frames_produced.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                    Err(BufferFull(back)) => {
                        if self.shared.stop_requested() {
                            return false;
                        }
                        pending = back;
                        thread::sleep(self.backoff);
                    }
                }
            }
        }
        true
    }
}
