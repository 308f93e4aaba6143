//! Output boundary
//!
//! The mixer is exposed as a pull-style [`FrameSource`]; sinks drive it at
//! their own cadence. Offline sinks ([`WavFileSink`], [`NullSink`]) render
//! as fast as the chains can fill their buffers, waiting briefly whenever
//! an audible chain is starved so a render does not record underruns that
//! real-time playback would not have had. [`CpalSink`] (feature
//! `cpal-output`) plays on the default audio device.

use crate::audio::types::{OutputFormat, OutputFrame};
use crate::error::{Error, Result};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tickmix_common::timing::SampleRate;
use tracing::{debug, info, warn};

/// Poll interval while waiting for a starved source
const STARVED_POLL: Duration = Duration::from_millis(1);

/// Default limit on how long an offline sink waits for a starved source
pub const DEFAULT_STARVE_TIMEOUT: Duration = Duration::from_secs(2);

/// Pull contract implemented by the mixer
pub trait FrameSource: Send {
    /// Next frame; never blocks, silence when nothing is playing
    fn next_output_frame(&mut self) -> OutputFrame;

    fn output_format(&self) -> OutputFormat;

    fn sample_rate(&self) -> SampleRate;

    /// An audible input has no frame ready for the next step
    fn is_starved(&mut self) -> bool {
        false
    }

    /// Nothing scheduled or playing
    fn is_idle(&mut self) -> bool {
        false
    }
}

/// Consumer of mixed frames
pub trait OutputSink {
    fn write_frame(&mut self, frame: &OutputFrame) -> Result<()>;

    /// How long [`render`](OutputSink::render) waits on a starved source
    fn starve_timeout(&self) -> Duration {
        DEFAULT_STARVE_TIMEOUT
    }

    /// Pull exactly `frames` frames from `source`
    fn render(&mut self, source: &mut dyn FrameSource, frames: u64) -> Result<u64> {
        for _ in 0..frames {
            wait_while_starved(source, self.starve_timeout());
            let frame = source.next_output_frame();
            self.write_frame(&frame)?;
        }
        Ok(frames)
    }

    /// Pull until the source goes idle or `limit` frames were written
    fn render_until_idle(&mut self, source: &mut dyn FrameSource, limit: u64) -> Result<u64> {
        let mut written = 0;
        while written < limit && !source.is_idle() {
            wait_while_starved(source, self.starve_timeout());
            let frame = source.next_output_frame();
            self.write_frame(&frame)?;
            written += 1;
        }
        Ok(written)
    }
}

fn wait_while_starved(source: &mut dyn FrameSource, timeout: Duration) {
    if !source.is_starved() {
        return;
    }
    let started = Instant::now();
    while source.is_starved() {
        if started.elapsed() >= timeout {
            warn!(
                "Source still starved after {}ms, mixing anyway",
                timeout.as_millis()
            );
            return;
        }
        thread::sleep(STARVED_POLL);
    }
}

/// Writes signed integer PCM to a WAV file
pub struct WavFileSink {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    path: PathBuf,
    frames_written: u64,
    starve_timeout: Duration,
}

impl WavFileSink {
    pub fn create(path: &Path, format: OutputFormat, rate: SampleRate) -> Result<Self> {
        let spec = hound::WavSpec {
            channels: format.channels,
            sample_rate: rate.hz(),
            bits_per_sample: format.bits.bits(),
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec).map_err(|e| {
            Error::AudioOutput(format!("Failed to create {}: {}", path.display(), e))
        })?;

        info!(
            "Writing {} ({}, {}ch, {}-bit)",
            path.display(),
            rate,
            format.channels,
            format.bits.bits()
        );

        Ok(Self {
            writer: Some(writer),
            path: path.to_path_buf(),
            frames_written: 0,
            starve_timeout: DEFAULT_STARVE_TIMEOUT,
        })
    }

    pub fn with_starve_timeout(mut self, timeout: Duration) -> Self {
        self.starve_timeout = timeout;
        self
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Flush and close the file
    pub fn finalize(mut self) -> Result<u64> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().map_err(|e| {
                Error::AudioOutput(format!("Failed to finalize {}: {}", self.path.display(), e))
            })?;
        }
        debug!(
            "Finalized {} after {} frames",
            self.path.display(),
            self.frames_written
        );
        Ok(self.frames_written)
    }
}

impl OutputSink for WavFileSink {
    fn write_frame(&mut self, frame: &OutputFrame) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::AudioOutput("WAV sink already finalized".to_string()))?;
        for &sample in frame.as_slice() {
            writer
                .write_sample(sample)
                .map_err(|e| Error::AudioOutput(format!("WAV write failed: {}", e)))?;
        }
        self.frames_written += 1;
        Ok(())
    }

    fn starve_timeout(&self) -> Duration {
        self.starve_timeout
    }
}

/// Discards frames, counting them and the non-silent ones
#[derive(Debug, Default)]
pub struct NullSink {
    pub frames: u64,
    pub non_silent: u64,
    /// Peak absolute sample value seen
    pub peak: i32,
}

impl OutputSink for NullSink {
    fn write_frame(&mut self, frame: &OutputFrame) -> Result<()> {
        self.frames += 1;
        if !frame.is_silent() {
            self.non_silent += 1;
        }
        for &sample in frame.as_slice() {
            self.peak = self.peak.max(sample.saturating_abs());
        }
        Ok(())
    }
}

#[cfg(feature = "cpal-output")]
pub use self::device::CpalSink;

#[cfg(feature = "cpal-output")]
mod device {
    use super::FrameSource;
    use crate::error::{Error, Result};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleFormat, Stream, StreamConfig};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;
    use tracing::{error, info};

    /// Real-time playback on the default output device
    ///
    /// The device is opened at the source's working rate and channel count;
    /// the source is moved into the audio callback and pulled once per
    /// device frame.
    pub struct CpalSink {
        stream: Option<Stream>,
        error_flag: Arc<AtomicBool>,
        error_count: Arc<AtomicU32>,
    }

    impl CpalSink {
        pub fn start<S: FrameSource + 'static>(mut source: S) -> Result<Self> {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))?;
            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

            let sample_format = device
                .default_output_config()
                .map_err(|e| Error::AudioOutput(format!("No output config: {}", e)))?
                .sample_format();

            let format = source.output_format();
            let config = StreamConfig {
                channels: format.channels,
                sample_rate: cpal::SampleRate(source.sample_rate().hz()),
                buffer_size: cpal::BufferSize::Default,
            };
            let channels = format.channels as usize;
            let full_scale = format.bits.max_value() as f32;
            let shift = format.bits.bits() - 16;

            let error_flag = Arc::new(AtomicBool::new(false));
            let error_count = Arc::new(AtomicU32::new(0));
            let err_flag = Arc::clone(&error_flag);
            let err_count = Arc::clone(&error_count);
            let on_error = move |err: cpal::StreamError| {
                error!("Audio stream error: {}", err);
                err_flag.store(true, Ordering::SeqCst);
                err_count.fetch_add(1, Ordering::SeqCst);
            };

            let stream = match sample_format {
                SampleFormat::F32 => device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        for out in data.chunks_mut(channels) {
                            let frame = source.next_output_frame();
                            for (dst, &src) in out.iter_mut().zip(frame.as_slice()) {
                                *dst = src as f32 / full_scale;
                            }
                        }
                    },
                    on_error,
                    None,
                ),
                SampleFormat::I16 => device.build_output_stream(
                    &config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        for out in data.chunks_mut(channels) {
                            let frame = source.next_output_frame();
                            for (dst, &src) in out.iter_mut().zip(frame.as_slice()) {
                                *dst = (src >> shift) as i16;
                            }
                        }
                    },
                    on_error,
                    None,
                ),
                other => {
                    return Err(Error::AudioOutput(format!(
                        "Unsupported sample format: {:?}",
                        other
                    )))
                }
            }
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))?;

            stream
                .play()
                .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;
            info!("Playing on {} at {} Hz", name, config.sample_rate.0);

            Ok(Self {
                stream: Some(stream),
                error_flag,
                error_count,
            })
        }

        pub fn has_error(&self) -> bool {
            self.error_flag.load(Ordering::SeqCst)
        }

        pub fn error_count(&self) -> u32 {
            self.error_count.load(Ordering::SeqCst)
        }

        pub fn stop(&mut self) -> Result<()> {
            if let Some(stream) = self.stream.take() {
                stream
                    .pause()
                    .map_err(|e| Error::AudioOutput(format!("Failed to pause stream: {}", e)))?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::types::SampleBits;
    use tickmix_common::timing::Tick;

    /// Ramp source that is starved for its first few polls
    struct Ramp {
        tick: Tick,
        starved_polls: u32,
        remaining: u64,
    }

    impl FrameSource for Ramp {
        fn next_output_frame(&mut self) -> OutputFrame {
            let n = (self.tick / 640) as i32;
            let frame = OutputFrame {
                tick: self.tick,
                channels: 2,
                samples: [n, -n],
            };
            self.tick += 640;
            self.remaining = self.remaining.saturating_sub(1);
            frame
        }

        fn output_format(&self) -> OutputFormat {
            OutputFormat::default()
        }

        fn sample_rate(&self) -> SampleRate {
            SampleRate::Hz44100
        }

        fn is_starved(&mut self) -> bool {
            if self.starved_polls > 0 {
                self.starved_polls -= 1;
                true
            } else {
                false
            }
        }

        fn is_idle(&mut self) -> bool {
            self.remaining == 0
        }
    }

    #[test]
    fn test_null_sink_counts() {
        let mut source = Ramp {
            tick: 0,
            starved_polls: 3,
            remaining: 100,
        };
        let mut sink = NullSink::default();
        assert_eq!(sink.render(&mut source, 10).unwrap(), 10);
        assert_eq!(sink.frames, 10);
        assert_eq!(sink.non_silent, 9);
        assert_eq!(sink.peak, 9);
    }

    #[test]
    fn test_render_until_idle_stops() {
        let mut source = Ramp {
            tick: 0,
            starved_polls: 0,
            remaining: 25,
        };
        let mut sink = NullSink::default();
        assert_eq!(sink.render_until_idle(&mut source, 1000).unwrap(), 25);
    }

    #[test]
    fn test_wav_sink_writes_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let format = OutputFormat {
            channels: 2,
            bits: SampleBits::Bits24,
        };
        let mut sink = WavFileSink::create(&path, format, SampleRate::Hz48000).unwrap();
        let mut source = Ramp {
            tick: 0,
            starved_polls: 0,
            remaining: 100,
        };
        sink.render(&mut source, 50).unwrap();
        assert_eq!(sink.finalize().unwrap(), 50);

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 48000);
        assert_eq!(spec.bits_per_sample, 24);
        assert_eq!(reader.duration(), 50);
        let samples: Vec<i32> = reader.samples::<i32>().map(|s| s.unwrap()).collect();
        assert_eq!(&samples[..4], &[0, 0, 1, -1]);
    }
}
