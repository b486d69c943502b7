use serde::{Deserialize, Serialize};

use crate::audio::AudioBackendConfig;
use crate::capture::CaptureConfig;
use crate::quota::DEFAULT_DAILY_LIMIT;

pub const DEFAULT_PERSONA: &str = "You are Loqa, a warm and concise voice companion. \
Keep spoken replies short and conversational, ask at most one question at a time, \
and never read out markup or lists.";
pub const DEFAULT_VOICE: &str = "Puck";
pub const DEFAULT_MODEL: &str = "live-audio-dialog";
pub const DEFAULT_FILLER_REPLY: &str = "(spoken reply)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseModality {
    Audio,
    Text,
}

/// Fixed conversation setup sent when a channel opens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationConfig {
    pub model: String,
    pub response_modality: ResponseModality,
    pub input_transcription: bool,
    pub output_transcription: bool,
    pub system_instruction: String,
    pub voice: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            response_modality: ResponseModality::Audio,
            input_transcription: true,
            output_transcription: true,
            system_instruction: DEFAULT_PERSONA.to_string(),
            voice: DEFAULT_VOICE.to_string(),
        }
    }
}

/// Runtime configuration for the session controller
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub conversation: ConversationConfig,

    /// Microphone request parameters
    pub backend: AudioBackendConfig,

    /// Outbound framing
    pub capture: CaptureConfig,

    /// Transport queue depth between capture and the channel, in frames
    pub outbound_queue: usize,

    /// Rate assumed for inbound audio whose media type carries none
    /// Default: 24000 Hz
    pub output_sample_rate: u32,

    /// Committed voice turns allowed per calendar day
    pub daily_limit: u32,

    /// Agent text committed when the reply produced no transcript
    pub filler_reply: String,

    /// How often finished playback items are reaped
    pub reap_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            conversation: ConversationConfig::default(),
            backend: AudioBackendConfig::default(),
            capture: CaptureConfig::default(),
            outbound_queue: 32,
            output_sample_rate: 24000,
            daily_limit: DEFAULT_DAILY_LIMIT,
            filler_reply: DEFAULT_FILLER_REPLY.to_string(),
            reap_interval_ms: 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_wire_shape() {
        let json = serde_json::to_value(ConversationConfig::default()).unwrap();
        assert_eq!(json["responseModality"], "AUDIO");
        assert_eq!(json["inputTranscription"], true);
        assert_eq!(json["outputTranscription"], true);
        assert_eq!(json["voice"], "Puck");
    }
}
