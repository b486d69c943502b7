use anyhow::{Context, Result};
use hound::WavReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};
use crate::error::{SessionError, SessionResult};

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
            anyhow::bail!(
                "Expected 16-bit integer PCM, got {}-bit {:?}",
                spec.bits_per_sample,
                spec.sample_format
            );
        }

        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }
}

/// Streams a WAV file in real-time sized blocks, standing in for a microphone
pub struct FileBackend {
    path: PathBuf,
    config: AudioBackendConfig,
    capturing: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>, config: AudioBackendConfig) -> Self {
        Self {
            path: path.into(),
            config,
            capturing: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }
}

fn open_error(path: &Path, err: anyhow::Error) -> SessionError {
    let denied = err.chain().any(|cause| {
        cause
            .downcast_ref::<std::io::Error>()
            .map(|io| io.kind() == std::io::ErrorKind::PermissionDenied)
            .unwrap_or(false)
            || matches!(
                cause.downcast_ref::<hound::Error>(),
                Some(hound::Error::IoError(io)) if io.kind() == std::io::ErrorKind::PermissionDenied
            )
    });

    if denied {
        SessionError::PermissionDenied(format!("{}: {}", path.display(), err))
    } else {
        SessionError::AudioDevice(format!("{}: {:#}", path.display(), err))
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileBackend {
    async fn start(&mut self) -> SessionResult<mpsc::Receiver<AudioFrame>> {
        if self.capturing.load(Ordering::SeqCst) {
            return Err(SessionError::AudioDevice("Already capturing".to_string()));
        }

        let audio = AudioFile::open(&self.path).map_err(|e| open_error(&self.path, e))?;

        let (tx, rx) = mpsc::channel(self.config.queue_depth.max(1));
        let capturing = Arc::clone(&self.capturing);
        capturing.store(true, Ordering::SeqCst);

        let block_ms = self.config.buffer_duration_ms.max(1);
        let block_len = ((audio.sample_rate as u64 * block_ms / 1000) as usize).max(1)
            * audio.channels.max(1) as usize;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(block_ms));
            for (sequence, chunk) in audio.samples.chunks(block_len).enumerate() {
                ticker.tick().await;
                if !capturing.load(Ordering::SeqCst) {
                    break;
                }

                let frame = AudioFrame {
                    samples: chunk.to_vec(),
                    sample_rate: audio.sample_rate,
                    channels: audio.channels,
                    sequence: sequence as u64,
                    timestamp_ms: sequence as u64 * block_ms,
                };

                // Real devices drop blocks when nobody drains them
                match tx.try_send(frame) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!("File backend queue full, dropping block {}", sequence);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
            debug!("File backend finished streaming {}", audio.path);
            capturing.store(false, Ordering::SeqCst);
        });

        self.task = Some(task);
        info!("File backend streaming {}", self.path.display());

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.capturing.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "WAV file"
    }
}
