use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

use crate::audio::{AudioBackendConfig, AudioSource};
use crate::capture::CaptureConfig;
use crate::quota::DEFAULT_DAILY_LIMIT;
use crate::session::{ConversationConfig, SessionConfig};

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub agent: AgentConfig,
    pub audio: AudioConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct AgentConfig {
    pub nats_url: String,
    pub subject_prefix: String,
    pub model: String,
    pub voice: String,
    pub persona: String,
    pub filler_reply: String,
}

#[derive(Debug, Deserialize)]
pub struct AudioConfig {
    pub input_sample_rate: u32,
    pub input_channels: u16,
    pub frame_samples: usize,
    pub output_sample_rate: u32,
    pub outbound_queue: usize,
    pub capture_backlog: usize,
    /// Stream this WAV file instead of the microphone
    pub input_wav: Option<PathBuf>,
    /// Render agent audio into this WAV file
    pub output_wav: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct QuotaConfig {
    pub daily_limit: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_limit: DEFAULT_DAILY_LIMIT,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl Config {
    /// Load from a config file, with `LOQA_`-prefixed environment overrides
    /// (e.g. `LOQA_AGENT__NATS_URL`)
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("LOQA")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("Failed to read config {}", path))?;

        Ok(settings.try_deserialize()?)
    }

    /// Where captured audio comes from
    pub fn audio_source(&self) -> AudioSource {
        match &self.audio.input_wav {
            Some(path) => AudioSource::File(path.clone()),
            None => AudioSource::Microphone,
        }
    }

    /// Runtime parameters for the session controller
    pub fn to_session_config(&self) -> SessionConfig {
        let conversation = ConversationConfig {
            model: self.agent.model.clone(),
            system_instruction: self.agent.persona.clone(),
            voice: self.agent.voice.clone(),
            ..ConversationConfig::default()
        };

        SessionConfig {
            conversation,
            backend: AudioBackendConfig {
                target_sample_rate: self.audio.input_sample_rate,
                target_channels: self.audio.input_channels,
                ..AudioBackendConfig::default()
            },
            capture: CaptureConfig {
                sample_rate: self.audio.input_sample_rate,
                channels: self.audio.input_channels,
                frame_samples: self.audio.frame_samples,
                backlog_frames: self.audio.capture_backlog,
            },
            outbound_queue: self.audio.outbound_queue,
            output_sample_rate: self.audio.output_sample_rate,
            daily_limit: self.quota.daily_limit,
            filler_reply: self.agent.filler_reply.clone(),
            ..SessionConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[service]
name = "loqa-voice"

[service.http]
bind = "127.0.0.1"
port = 3010

[agent]
nats_url = "nats://localhost:4222"
subject_prefix = "loqa.agent"
model = "live-audio-dialog"
voice = "Puck"
persona = "Be brief."
filler_reply = "(spoken reply)"

[audio]
input_sample_rate = 16000
input_channels = 1
frame_samples = 2048
output_sample_rate = 24000
outbound_queue = 8
capture_backlog = 16
input_wav = "fixtures/hello.wav"

[storage]
path = "data"
"#;

    #[test]
    fn test_load_and_derive_session_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("voice.toml");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(SAMPLE.as_bytes())
            .unwrap();

        let cfg = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.service.http.port, 3010);
        assert_eq!(cfg.quota.daily_limit, DEFAULT_DAILY_LIMIT);
        assert_eq!(
            cfg.audio_source(),
            AudioSource::File(PathBuf::from("fixtures/hello.wav"))
        );

        let session = cfg.to_session_config();
        assert_eq!(session.conversation.system_instruction, "Be brief.");
        assert_eq!(session.conversation.voice, "Puck");
        assert_eq!(session.capture.frame_samples, 2048);
        assert_eq!(session.capture.backlog_frames, 16);
        assert_eq!(session.outbound_queue, 8);
        assert_eq!(session.output_sample_rate, 24000);
    }
}
