//! Audio decoder using symphonia
//!
//! Streams any container/codec symphonia is built with (MP3, FLAC, AAC,
//! Vorbis, WAV) as tick-tagged stereo frames. Decoding always starts at the
//! beginning of the file; chains skip ahead by discarding frames before their
//! start tick rather than seeking in the compressed stream.

use crate::audio::decoder::{DecodeError, DecodeErrorKind, Decoder};
use crate::audio::types::{AudioFrame, TickedFrame};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder as CodecDecoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tickmix_common::timing::{samples_to_ticks, SampleRate, Tick};
use tracing::{debug, trace};

/// Streaming symphonia-backed [`Decoder`]
pub struct SymphoniaDecoder {
    format: Box<dyn FormatReader>,
    codec: Box<dyn CodecDecoder>,
    track_id: u32,
    rate: SampleRate,
    channels: u16,
    /// Frame count declared by the container
    n_frames: Option<u64>,
    /// Interleaved samples of the current packet
    pending: Vec<f32>,
    pending_channels: usize,
    cursor: usize,
    sample_buf: Option<SampleBuffer<f32>>,
    frames_emitted: i64,
    finished: bool,
}

impl SymphoniaDecoder {
    /// Open a file, using its extension as a probe hint
    pub fn open(path: &Path) -> Result<Self, DecodeError> {
        debug!("Opening {} for streaming decode", path.display());

        let file = File::open(path).map_err(|e| {
            DecodeError::new(
                DecodeErrorKind::Io,
                0,
                format!("Failed to open file {}: {}", path.display(), e),
            )
        })?;

        let extension = path.extension().and_then(|ext| ext.to_str());
        Self::from_source(Box::new(file), extension)
    }

    /// Probe an arbitrary media source
    pub fn from_source(
        source: Box<dyn MediaSource>,
        extension: Option<&str>,
    ) -> Result<Self, DecodeError> {
        let mss = MediaSourceStream::new(source, Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| map_error(e, 0))?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DecodeError::new(DecodeErrorKind::Unsupported, 0, "No audio track found"))?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let hz = codec_params
            .sample_rate
            .ok_or_else(|| DecodeError::new(DecodeErrorKind::Unsupported, 0, "Sample rate not found"))?;
        let rate = SampleRate::from_hz(hz).map_err(|e| {
            DecodeError::new(DecodeErrorKind::Unsupported, 0, e.to_string())
        })?;

        let channels = codec_params.channels.map(|c| c.count() as u16).unwrap_or(2);
        let n_frames = codec_params.n_frames;

        let codec = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| map_error(e, 0))?;

        debug!(
            "Audio format: sample_rate={}, channels={}, frames={:?}",
            rate, channels, n_frames
        );

        Ok(Self {
            format,
            codec,
            track_id,
            rate,
            channels,
            n_frames,
            pending: Vec::new(),
            pending_channels: channels.max(1) as usize,
            cursor: 0,
            sample_buf: None,
            frames_emitted: 0,
            finished: false,
        })
    }

    fn position(&self) -> Tick {
        samples_to_ticks(self.frames_emitted, self.rate)
    }

    /// Decode the next packet of our track into `pending`
    ///
    /// Returns false at end of stream.
    fn refill(&mut self) -> Result<bool, DecodeError> {
        let position = self.position();
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    debug!("Reached end of stream after {} frames", self.frames_emitted);
                    return Ok(false);
                }
                Err(e) => return Err(map_error(e, position)),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = self
                .codec
                .decode(&packet)
                .map_err(|e| map_error(e, position))?;

            let spec = *decoded.spec();
            // SampleBuffer capacity is counted in samples, not frames
            let needed_frames = decoded.capacity();
            let needed_samples = needed_frames * spec.channels.count();
            let reuse = matches!(&self.sample_buf, Some(buf) if buf.capacity() >= needed_samples);
            if !reuse {
                self.sample_buf = Some(SampleBuffer::new(needed_frames as u64, spec));
            }

            if let Some(buf) = self.sample_buf.as_mut() {
                buf.copy_interleaved_ref(decoded);
                self.pending.clear();
                self.pending.extend_from_slice(buf.samples());
            }
            self.pending_channels = spec.channels.count().max(1);
            self.cursor = 0;

            trace!("Decoded packet: {} samples", self.pending.len());

            if !self.pending.is_empty() {
                return Ok(true);
            }
        }
    }
}

impl Decoder for SymphoniaDecoder {
    fn sample_rate(&self) -> SampleRate {
        self.rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn next_frame(&mut self) -> Result<Option<TickedFrame>, DecodeError> {
        if self.finished {
            return Ok(None);
        }

        if self.cursor + self.pending_channels > self.pending.len() {
            match self.refill() {
                Ok(true) => {}
                Ok(false) => {
                    self.finished = true;
                    return Ok(None);
                }
                Err(e) => {
                    self.finished = true;
                    return Err(e);
                }
            }
        }

        let end = self.cursor + self.pending_channels;
        let frame = AudioFrame::from_channels(&self.pending[self.cursor..end]);
        self.cursor = end;

        let tick = self.position();
        self.frames_emitted += 1;
        Ok(Some(TickedFrame::new(tick, frame)))
    }

    fn duration_ticks(&self) -> Option<Tick> {
        self.n_frames.map(|n| samples_to_ticks(n as i64, self.rate))
    }
}

fn map_error(err: SymphoniaError, position: Tick) -> DecodeError {
    let kind = match &err {
        SymphoniaError::IoError(_) => DecodeErrorKind::Io,
        SymphoniaError::DecodeError(_) => DecodeErrorKind::Corrupt,
        _ => DecodeErrorKind::Unsupported,
    };
    DecodeError::new(kind, position, err.to_string())
}
