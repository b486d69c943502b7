//! Live microphone capture using CPAL.
//!
//! `cpal::Stream` is not `Send`, so the stream lives on a dedicated thread
//! that is parked until the backend is stopped.

use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};
use crate::error::{SessionError, SessionResult};

pub struct MicrophoneBackend {
    config: AudioBackendConfig,
    capturing: Arc<AtomicBool>,
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl MicrophoneBackend {
    pub fn new(config: AudioBackendConfig) -> Self {
        Self {
            config,
            capturing: Arc::new(AtomicBool::new(false)),
            stop_tx: None,
            worker: None,
        }
    }
}

struct BlockSender {
    tx: mpsc::Sender<AudioFrame>,
    sample_rate: u32,
    channels: u16,
    sequence: AtomicU64,
    started: Instant,
}

impl BlockSender {
    fn push(&self, samples: Vec<i16>) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let frame = AudioFrame {
            samples,
            sample_rate: self.sample_rate,
            channels: self.channels,
            sequence,
            timestamp_ms: self.started.elapsed().as_millis() as u64,
        };
        // Never block the audio callback
        if self.tx.try_send(frame).is_err() {
            warn!("Microphone queue full or closed, dropping block {}", sequence);
        }
    }
}

fn open_stream(
    config: &AudioBackendConfig,
    tx: mpsc::Sender<AudioFrame>,
) -> SessionResult<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| SessionError::AudioDevice("No input device available".to_string()))?;

    info!(
        "Using input device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );

    let supported = device
        .default_input_config()
        .map_err(|e| SessionError::AudioDevice(e.to_string()))?;
    let sample_format = supported.sample_format();
    let stream_config: cpal::StreamConfig = supported.config();

    info!(
        "Input stream: {}Hz, {} channels, {:?} (pipeline target {}Hz)",
        stream_config.sample_rate.0,
        stream_config.channels,
        sample_format,
        config.target_sample_rate
    );

    let sender = Arc::new(BlockSender {
        tx,
        sample_rate: stream_config.sample_rate.0,
        channels: stream_config.channels,
        sequence: AtomicU64::new(0),
        started: Instant::now(),
    });

    let err_fn = |err| warn!("Audio stream error: {}", err);

    let stream = match sample_format {
        cpal::SampleFormat::I16 => {
            let sender = Arc::clone(&sender);
            device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| sender.push(data.to_vec()),
                err_fn,
                None,
            )
        }
        cpal::SampleFormat::F32 => {
            let sender = Arc::clone(&sender);
            device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let samples = data
                        .iter()
                        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                        .collect();
                    sender.push(samples)
                },
                err_fn,
                None,
            )
        }
        other => {
            return Err(SessionError::AudioDevice(format!(
                "Unsupported sample format {:?}",
                other
            )))
        }
    }
    .map_err(|e| SessionError::PermissionDenied(e.to_string()))?;

    stream
        .play()
        .map_err(|e| SessionError::PermissionDenied(e.to_string()))?;

    Ok(stream)
}

#[async_trait::async_trait]
impl AudioBackend for MicrophoneBackend {
    async fn start(&mut self) -> SessionResult<mpsc::Receiver<AudioFrame>> {
        if self.capturing.load(Ordering::SeqCst) {
            return Err(SessionError::AudioDevice("Already capturing".to_string()));
        }

        let (tx, rx) = mpsc::channel(self.config.queue_depth.max(1));
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let config = self.config.clone();

        let worker = thread::spawn(move || match open_stream(&config, tx) {
            Ok(stream) => {
                let _ = ready_tx.send(Ok(()));
                // Park until stop() or the backend is dropped
                let _ = stop_rx.recv();
                drop(stream);
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
            }
        });

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = worker.join();
                return Err(e);
            }
            Err(_) => {
                return Err(SessionError::AudioDevice(
                    "Capture thread exited before the stream opened".to_string(),
                ))
            }
        }

        self.stop_tx = Some(stop_tx);
        self.worker = Some(worker);
        self.capturing.store(true, Ordering::SeqCst);
        info!("Microphone capture started");

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.capturing.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            tokio::task::spawn_blocking(move || worker.join())
                .await?
                .map_err(|_| anyhow::anyhow!("Capture thread panicked"))?;
        }

        info!("Microphone capture stopped");
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }
}
