//! PCM16 helpers: format conversion, byte packing and base64 media payloads.

use base64::Engine;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use super::backend::AudioFrame;
use crate::error::{SessionError, SessionResult};

/// Input frames per resampler call (~21ms at 48kHz)
const RESAMPLER_CHUNK: usize = 1024;

/// Downmix to mono when the target layout is mono
pub fn downmix(frame: AudioFrame, target_channels: u16) -> AudioFrame {
    if frame.channels <= 1 || target_channels != 1 {
        return frame;
    }

    let channels = frame.channels as usize;
    let mono: Vec<i16> = frame
        .samples
        .chunks_exact(channels)
        .map(|chunk| {
            let sum: i32 = chunk.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect();

    AudioFrame {
        samples: mono,
        channels: 1,
        ..frame
    }
}

/// Sample-rate converter for a continuous interleaved PCM16 stream.
///
/// Blocks of any size go in; input is buffered until a full resampler chunk
/// is available, so the interpolation phase carries across block edges.
/// `flush` drains the tail and pads or trims so that the total output is
/// exactly `round(input * target / source)` frames.
pub struct StreamResampler {
    inner: FastFixedIn<f32>,
    source_rate: u32,
    target_rate: u32,
    channels: usize,
    pending: Vec<Vec<f32>>,
    frames_in: u64,
    frames_out: u64,
    delay_left: usize,
}

impl StreamResampler {
    pub fn new(source_rate: u32, target_rate: u32, channels: u16) -> SessionResult<Self> {
        if source_rate == 0 || target_rate == 0 {
            return Err(SessionError::AudioDevice(format!(
                "invalid resampling {}Hz -> {}Hz",
                source_rate, target_rate
            )));
        }

        let channels = channels.max(1) as usize;
        let inner = FastFixedIn::new(
            target_rate as f64 / source_rate as f64,
            1.0,
            PolynomialDegree::Septic,
            RESAMPLER_CHUNK,
            channels,
        )
        .map_err(|e| SessionError::AudioDevice(format!("resampler setup failed: {}", e)))?;
        let delay_left = inner.output_delay();

        Ok(Self {
            inner,
            source_rate,
            target_rate,
            channels,
            pending: vec![Vec::new(); channels],
            frames_in: 0,
            frames_out: 0,
            delay_left,
        })
    }

    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels as u16
    }

    /// Feed interleaved samples; returns whatever output is ready
    pub fn push(&mut self, samples: &[i16]) -> SessionResult<Vec<i16>> {
        for frame in samples.chunks_exact(self.channels) {
            for (ch, &sample) in frame.iter().enumerate() {
                self.pending[ch].push(sample as f32 / 32768.0);
            }
        }
        self.frames_in += (samples.len() / self.channels) as u64;

        let mut out = Vec::new();
        loop {
            let needed = self.inner.input_frames_next();
            if self.pending[0].len() < needed {
                break;
            }

            let chunk: Vec<&[f32]> = self.pending.iter().map(|c| &c[..needed]).collect();
            let resampled = self
                .inner
                .process(&chunk, None)
                .map_err(|e| SessionError::AudioDevice(format!("resampler error: {}", e)))?;
            for channel in &mut self.pending {
                channel.drain(..needed);
            }
            self.emit(resampled, u64::MAX, &mut out);
        }

        Ok(out)
    }

    /// Drain buffered input and the filter delay, then reset for a new stream
    pub fn flush(&mut self) -> SessionResult<Vec<i16>> {
        let expected = (self.frames_in * self.target_rate as u64 + self.source_rate as u64 / 2)
            / self.source_rate as u64;
        let mut out = Vec::new();

        if !self.pending[0].is_empty() {
            let chunk: Vec<&[f32]> = self.pending.iter().map(|c| c.as_slice()).collect();
            let resampled = self
                .inner
                .process_partial(Some(chunk.as_slice()), None)
                .map_err(|e| SessionError::AudioDevice(format!("resampler error: {}", e)))?;
            self.emit(resampled, expected, &mut out);
        }

        // Push the delayed tail out with silence
        let mut rounds = 0;
        while self.frames_out < expected && rounds < 4 {
            let resampled = self
                .inner
                .process_partial(None::<&[Vec<f32>]>, None)
                .map_err(|e| SessionError::AudioDevice(format!("resampler error: {}", e)))?;
            self.emit(resampled, expected, &mut out);
            rounds += 1;
        }
        if self.frames_out < expected {
            let missing = (expected - self.frames_out) as usize;
            out.resize(out.len() + missing * self.channels, 0);
        }

        self.inner.reset();
        for channel in &mut self.pending {
            channel.clear();
        }
        self.frames_in = 0;
        self.frames_out = 0;
        self.delay_left = self.inner.output_delay();

        Ok(out)
    }

    /// Interleave resampler output, skipping the filter delay and stopping at `limit` frames
    fn emit(&mut self, resampled: Vec<Vec<f32>>, limit: u64, out: &mut Vec<i16>) {
        let len = resampled.first().map_or(0, Vec::len);
        for i in 0..len {
            if self.delay_left > 0 {
                self.delay_left -= 1;
                continue;
            }
            if self.frames_out >= limit {
                break;
            }
            for channel in &resampled {
                let v = (channel[i] * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32);
                out.push(v as i16);
            }
            self.frames_out += 1;
        }
    }
}

/// Pack samples as 16-bit little-endian bytes
pub fn samples_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Unpack 16-bit little-endian bytes; an odd byte count is malformed
pub fn le_bytes_to_samples(bytes: &[u8]) -> SessionResult<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(SessionError::DecodeError(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect())
}

/// Base64-encode PCM16 samples for the wire
pub fn encode_pcm_base64(samples: &[i16]) -> String {
    base64::engine::general_purpose::STANDARD.encode(samples_to_le_bytes(samples))
}

/// Decode a base64 PCM16 payload
pub fn decode_pcm_base64(data: &str) -> SessionResult<Vec<i16>> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| SessionError::DecodeError(format!("invalid base64: {}", e)))?;
    le_bytes_to_samples(&bytes)
}

/// Media type tag for raw PCM16 at the given rate
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Extract `rate=N` from a media type such as `audio/pcm;rate=24000`
pub fn parse_mime_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .map(str::trim)
        .find_map(|param| param.strip_prefix("rate="))
        .and_then(|rate| rate.trim().parse().ok())
}
