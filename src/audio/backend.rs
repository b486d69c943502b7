use anyhow::Result;
use std::path::PathBuf;
use tokio::sync::mpsc;

use crate::error::SessionResult;

/// Audio sample data (16-bit PCM, interleaved)
///
/// Frames are immutable once produced; ownership moves from producer to
/// consumer (backend → capture pipeline → transport).
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Monotonic sequence number assigned by the producer
    pub sequence: u64,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Number of sample frames (samples per channel)
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Duration of the frame in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate as f64
    }
}

/// Configuration for audio backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Preferred device sample rate (backends may deliver another rate)
    pub target_sample_rate: u32,
    /// Preferred channel count (1 = mono, 2 = stereo)
    pub target_channels: u16,
    /// Buffer size in milliseconds (affects latency)
    pub buffer_duration_ms: u64,
    /// Depth of the backend → pipeline queue, in blocks
    pub queue_depth: usize,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000, // Agent input rate
            target_channels: 1,        // Mono
            buffer_duration_ms: 100,   // 100ms buffers
            queue_depth: 64,
        }
    }
}

/// Microphone access
///
/// `start` is the permission boundary: it either hands out a live stream of
/// raw blocks or fails with `PermissionDenied` / `AudioDevice`. Backends are
/// reusable; a stopped backend may be started again for the next session.
///
/// Implementations:
/// - cpal: default input device (`microphone` feature)
/// - File: stream a WAV file at real-time pace (testing/headless use)
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Request audio input and start producing blocks
    async fn start(&mut self) -> SessionResult<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing audio and release the device
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create audio backend based on platform and configuration
    pub fn create(
        source: AudioSource,
        config: AudioBackendConfig,
    ) -> Result<Box<dyn AudioBackend>> {
        match source {
            AudioSource::Microphone => {
                #[cfg(feature = "microphone")]
                {
                    use super::microphone::MicrophoneBackend;
                    Ok(Box::new(MicrophoneBackend::new(config)))
                }

                #[cfg(not(feature = "microphone"))]
                {
                    let _ = config;
                    anyhow::bail!("Microphone capture requires the `microphone` feature")
                }
            }

            AudioSource::File(path) => {
                use super::file::FileBackend;
                Ok(Box::new(FileBackend::new(path, config)))
            }
        }
    }
}

/// Audio source type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Default input device
    Microphone,
    /// WAV file played back as if it were a microphone
    File(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame {
            samples: vec![0; 32000],
            sample_rate: 16000,
            channels: 2,
            sequence: 0,
            timestamp_ms: 0,
        };

        assert_eq!(frame.frame_count(), 16000);
        assert!((frame.duration_secs() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_backend_config_default() {
        let config = AudioBackendConfig::default();
        assert_eq!(config.target_sample_rate, 16000);
        assert_eq!(config.target_channels, 1);
        assert_eq!(config.buffer_duration_ms, 100);
    }

    #[cfg(not(feature = "microphone"))]
    #[test]
    fn test_microphone_requires_feature() {
        let result = AudioBackendFactory::create(AudioSource::Microphone, AudioBackendConfig::default());
        assert!(result.is_err());
    }
}
