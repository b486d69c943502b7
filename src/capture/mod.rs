//! Audio capture pipeline
//!
//! Turns the raw microphone stream (any block size, rate or layout) into
//! fixed-size 16 kHz mono PCM16 frames, base64-encodes them and hands them to
//! the transport queue. The pipeline never waits on the transport: when the
//! queue is full, frames wait in a bounded local backlog and are released in
//! order as soon as the queue has room. A full backlog sheds its oldest frame.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audio::pcm::{downmix, encode_pcm_base64, pcm_mime_type, StreamResampler};
use crate::audio::AudioFrame;
use crate::error::SessionResult;
use crate::live::OutboundFrame;

/// Capture pipeline configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Outbound sample rate (agent input rate)
    pub sample_rate: u32,
    /// Outbound channel count
    pub channels: u16,
    /// Samples per outbound frame (~256ms at 16kHz)
    pub frame_samples: usize,
    /// Frames held locally while the transport queue is full
    pub backlog_frames: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            frame_samples: 4096,
            backlog_frames: 64,
        }
    }
}

/// Counters reported when the pipeline stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames_produced: u64,
    pub frames_dropped: u64,
}

/// Slices converted audio into fixed-size, sequenced frames
pub struct FrameAssembler {
    config: CaptureConfig,
    resampler: Option<StreamResampler>,
    window: Vec<i16>,
    next_sequence: u64,
    samples_emitted: u64,
}

impl FrameAssembler {
    pub fn new(config: CaptureConfig) -> Self {
        let window = Vec::with_capacity(config.frame_samples);
        Self {
            config,
            resampler: None,
            window,
            next_sequence: 0,
            samples_emitted: 0,
        }
    }

    /// Feed one raw block; returns every frame it completed
    pub fn push(&mut self, block: AudioFrame) -> SessionResult<Vec<AudioFrame>> {
        let block = downmix(block, self.config.channels);
        let mut frames = Vec::new();

        if block.sample_rate == self.config.sample_rate {
            // Back at the target rate: whatever the resampler still holds comes first
            if let Some(mut resampler) = self.resampler.take() {
                let tail = resampler.flush()?;
                self.slice(&tail, &mut frames);
            }
            self.slice(&block.samples, &mut frames);
            return Ok(frames);
        }

        let stale = self.resampler.as_ref().is_some_and(|r| {
            r.source_rate() != block.sample_rate || r.channels() != block.channels.max(1)
        });
        if stale {
            if let Some(mut resampler) = self.resampler.take() {
                let tail = resampler.flush()?;
                self.slice(&tail, &mut frames);
            }
        }

        if self.resampler.is_none() {
            debug!(
                "Resampling capture input {}Hz -> {}Hz",
                block.sample_rate, self.config.sample_rate
            );
            self.resampler = Some(StreamResampler::new(
                block.sample_rate,
                self.config.sample_rate,
                block.channels,
            )?);
        }
        let converted = match self.resampler.as_mut() {
            Some(resampler) => resampler.push(&block.samples)?,
            None => Vec::new(),
        };
        self.slice(&converted, &mut frames);

        Ok(frames)
    }

    /// Emit everything still buffered; the last frame may be short
    pub fn flush(&mut self) -> SessionResult<Vec<AudioFrame>> {
        let mut frames = Vec::new();
        if let Some(mut resampler) = self.resampler.take() {
            let tail = resampler.flush()?;
            self.slice(&tail, &mut frames);
        }
        if !self.window.is_empty() {
            frames.push(self.emit());
        }
        Ok(frames)
    }

    fn slice(&mut self, mut remaining: &[i16], frames: &mut Vec<AudioFrame>) {
        let frame_len = self.config.frame_samples.max(1) * self.config.channels.max(1) as usize;
        while !remaining.is_empty() {
            let take = (frame_len - self.window.len()).min(remaining.len());
            self.window.extend_from_slice(&remaining[..take]);
            remaining = &remaining[take..];

            if self.window.len() == frame_len {
                frames.push(self.emit());
            }
        }
    }

    fn emit(&mut self) -> AudioFrame {
        let samples = std::mem::replace(&mut self.window, Vec::with_capacity(self.config.frame_samples));
        let timestamp_ms = self.samples_emitted * 1000
            / (self.config.sample_rate as u64 * self.config.channels.max(1) as u64).max(1);
        self.samples_emitted += samples.len() as u64;

        let frame = AudioFrame {
            samples,
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
            sequence: self.next_sequence,
            timestamp_ms,
        };
        self.next_sequence += 1;
        frame
    }
}

/// Wrap a frame for the wire
pub fn encode_frame(frame: &AudioFrame) -> OutboundFrame {
    OutboundFrame {
        sequence: frame.sequence,
        mime_type: pcm_mime_type(frame.sample_rate),
        data: encode_pcm_base64(&frame.samples),
    }
}

/// Bounded FIFO in front of the transport queue
struct Backlog {
    frames: VecDeque<OutboundFrame>,
    capacity: usize,
    dropped: u64,
}

impl Backlog {
    fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    /// Hand a frame on without waiting; returns false once the queue is closed
    fn offer(&mut self, outbound: &mpsc::Sender<OutboundFrame>, frame: OutboundFrame) -> bool {
        if !self.drain(outbound) {
            return false;
        }

        if self.frames.is_empty() {
            match outbound.try_send(frame) {
                Ok(()) => return true,
                Err(mpsc::error::TrySendError::Closed(_)) => return false,
                Err(mpsc::error::TrySendError::Full(frame)) => self.frames.push_back(frame),
            }
        } else {
            self.frames.push_back(frame);
        }

        if self.frames.len() > self.capacity {
            if let Some(shed) = self.frames.pop_front() {
                self.dropped += 1;
                warn!("Transport stalled, dropping outbound frame {}", shed.sequence);
            }
        }
        true
    }

    fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Send the oldest backlogged frame through a reserved queue slot
    fn release(&mut self, permit: mpsc::Permit<'_, OutboundFrame>) {
        if let Some(frame) = self.frames.pop_front() {
            permit.send(frame);
        }
    }

    /// Move as many backlogged frames as fit into the queue
    fn drain(&mut self, outbound: &mpsc::Sender<OutboundFrame>) -> bool {
        while let Some(frame) = self.frames.pop_front() {
            match outbound.try_send(frame) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(frame)) => {
                    self.frames.push_front(frame);
                    break;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return false,
            }
        }
        true
    }
}

/// Running capture pipeline
pub struct CaptureHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<CaptureStats>>,
    produced: Arc<AtomicU64>,
}

impl CaptureHandle {
    pub fn frames_produced(&self) -> u64 {
        self.produced.load(Ordering::SeqCst)
    }

    /// Stop producing frames. Frames already queued for transport stay queued.
    pub async fn stop(mut self) -> CaptureStats {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        match self.task.take() {
            Some(task) => match task.await {
                Ok(stats) => stats,
                Err(e) => {
                    warn!("Capture task failed: {}", e);
                    CaptureStats {
                        frames_produced: self.frames_produced(),
                        frames_dropped: 0,
                    }
                }
            },
            None => CaptureStats::default(),
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

pub struct CapturePipeline;

impl CapturePipeline {
    /// Start consuming `input` and feeding `outbound`
    pub fn spawn(
        config: CaptureConfig,
        mut input: mpsc::Receiver<AudioFrame>,
        outbound: mpsc::Sender<OutboundFrame>,
    ) -> CaptureHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let produced = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&produced);

        let task = tokio::spawn(async move {
            info!(
                "Capture pipeline started ({}Hz, {} samples/frame)",
                config.sample_rate, config.frame_samples
            );

            let mut assembler = FrameAssembler::new(config.clone());
            let mut backlog = Backlog::new(config.backlog_frames);
            let mut input_ended = false;

            loop {
                tokio::select! {
                    biased;

                    _ = &mut stop_rx => {
                        debug!("Capture pipeline told to stop");
                        break;
                    }

                    permit = outbound.reserve(), if !backlog.is_empty() => {
                        match permit {
                            Ok(permit) => backlog.release(permit),
                            Err(_) => break,
                        }
                    }

                    block = input.recv(), if !input_ended => {
                        let Some(block) = block else {
                            input_ended = true;
                            let tail = match assembler.flush() {
                                Ok(tail) => tail,
                                Err(e) => {
                                    warn!("Failed to flush capture tail: {}", e);
                                    break;
                                }
                            };
                            let mut open = true;
                            for frame in tail {
                                counter.fetch_add(1, Ordering::SeqCst);
                                if !backlog.offer(&outbound, encode_frame(&frame)) {
                                    open = false;
                                    break;
                                }
                            }
                            if !open || backlog.is_empty() {
                                break;
                            }
                            continue;
                        };

                        let frames = match assembler.push(block) {
                            Ok(frames) => frames,
                            Err(e) => {
                                warn!("Capture conversion failed, pipeline exiting: {}", e);
                                break;
                            }
                        };
                        let mut open = true;
                        for frame in frames {
                            counter.fetch_add(1, Ordering::SeqCst);
                            if !backlog.offer(&outbound, encode_frame(&frame)) {
                                open = false;
                                break;
                            }
                        }
                        if !open {
                            warn!("Transport queue closed, capture pipeline exiting");
                            break;
                        }
                    }

                    else => break,
                }

                if input_ended && backlog.is_empty() {
                    break;
                }
            }

            let stats = CaptureStats {
                frames_produced: counter.load(Ordering::SeqCst),
                frames_dropped: backlog.dropped(),
            };
            info!(
                "Capture pipeline stopped ({} frames, {} dropped)",
                stats.frames_produced, stats.frames_dropped
            );
            stats
        });

        CaptureHandle {
            stop_tx: Some(stop_tx),
            task: Some(task),
            produced,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(samples: Vec<i16>) -> AudioFrame {
        AudioFrame {
            samples,
            sample_rate: 16000,
            channels: 1,
            sequence: 0,
            timestamp_ms: 0,
        }
    }

    fn small_config() -> CaptureConfig {
        CaptureConfig {
            frame_samples: 4,
            ..CaptureConfig::default()
        }
    }

    #[test]
    fn test_assembler_slices_fixed_frames() {
        let mut assembler = FrameAssembler::new(small_config());

        assert!(assembler.push(block(vec![1, 2, 3])).unwrap().is_empty());
        let frames = assembler.push(block(vec![4, 5, 6, 7, 8, 9])).unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].samples, vec![1, 2, 3, 4]);
        assert_eq!(frames[1].samples, vec![5, 6, 7, 8]);
        assert_eq!(frames[0].sequence, 0);
        assert_eq!(frames[1].sequence, 1);
        let tail = assembler.flush().unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].samples, vec![9]);
        assert!(assembler.flush().unwrap().is_empty());
    }

    #[test]
    fn test_assembler_converts_stereo_48k() {
        let mut assembler = FrameAssembler::new(small_config());
        let stereo = AudioFrame {
            samples: vec![10; 24],
            sample_rate: 48000,
            channels: 2,
            sequence: 0,
            timestamp_ms: 0,
        };

        // 12 mono samples at 48kHz are 4 at 16kHz, released once the stream ends
        let mut frames = assembler.push(stereo).unwrap();
        frames.extend(assembler.flush().unwrap());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sample_rate, 16000);
        assert_eq!(frames[0].channels, 1);
        assert_eq!(frames[0].samples.len(), 4);
    }

    #[test]
    fn test_assembler_keeps_every_sample_across_48k_blocks() {
        let mut assembler = FrameAssembler::new(CaptureConfig::default());
        let device_block = AudioFrame {
            samples: vec![500; 512],
            sample_rate: 48000,
            channels: 1,
            sequence: 0,
            timestamp_ms: 0,
        };

        // 3.2s of audio in 512-sample device callbacks
        let mut frames = Vec::new();
        for _ in 0..300 {
            frames.extend(assembler.push(device_block.clone()).unwrap());
        }
        frames.extend(assembler.flush().unwrap());

        let total: usize = frames.iter().map(|f| f.samples.len()).sum();
        assert_eq!(total, 51200);
        assert_eq!(frames.len(), 13);
        assert!(frames[..12].iter().all(|f| f.samples.len() == 4096));
        assert_eq!(
            frames.iter().map(|f| f.sequence).collect::<Vec<_>>(),
            (0..13).collect::<Vec<u64>>()
        );
    }

    #[test]
    fn test_assembler_flushes_resampler_on_rate_change() {
        let mut assembler = FrameAssembler::new(small_config());
        let fast = AudioFrame {
            samples: vec![0; 9],
            sample_rate: 48000,
            channels: 1,
            sequence: 0,
            timestamp_ms: 0,
        };

        assert!(assembler.push(fast).unwrap().is_empty());
        // 3 resampled samples plus 1 native sample make one frame
        let frames = assembler.push(block(vec![7])).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].samples[3], 7);
    }

    #[test]
    fn test_encode_frame_tags_media_type() {
        let frame = block(vec![1, -1]);
        let out = encode_frame(&frame);
        assert_eq!(out.mime_type, "audio/pcm;rate=16000");
        assert_eq!(out.data, "AQD//w==");
    }

    #[test]
    fn test_backlog_keeps_order_and_sheds_oldest() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut backlog = Backlog::new(2);
        let frame = |sequence| OutboundFrame {
            sequence,
            mime_type: String::new(),
            data: String::new(),
        };

        for seq in 0..5 {
            assert!(backlog.offer(&tx, frame(seq)));
        }

        // Queue holds 0; backlog held 1..4 capped at 2, so 1 and 2 were shed
        assert_eq!(backlog.dropped(), 2);
        assert_eq!(rx.try_recv().unwrap().sequence, 0);
        assert!(backlog.drain(&tx));
        assert_eq!(rx.try_recv().unwrap().sequence, 3);
        assert!(backlog.drain(&tx));
        assert_eq!(rx.try_recv().unwrap().sequence, 4);
        assert!(backlog.is_empty());
    }

    #[test]
    fn test_backlog_releases_through_reserved_slot() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut backlog = Backlog::new(4);
        let frame = |sequence| OutboundFrame {
            sequence,
            mime_type: String::new(),
            data: String::new(),
        };

        assert!(backlog.offer(&tx, frame(0)));
        assert!(backlog.offer(&tx, frame(1)));
        assert!(!backlog.is_empty());

        assert_eq!(rx.try_recv().unwrap().sequence, 0);
        backlog.release(tx.try_reserve().unwrap());
        assert_eq!(rx.try_recv().unwrap().sequence, 1);
        assert!(backlog.is_empty());
        assert_eq!(backlog.dropped(), 0);
    }
}
