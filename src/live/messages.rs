use serde::{Deserialize, Serialize};

use super::channel::ChannelEvent;
use crate::session::ConversationConfig;

/// Session setup request sent when opening a channel
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenRequest {
    pub session_id: String,
    pub setup: ConversationConfig,
}

/// Microphone audio published to the agent
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub session_id: String,
    pub sequence: u64,
    pub media_chunks: Vec<MediaChunk>,
    pub timestamp: String, // RFC3339 timestamp
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub mime_type: String,
    pub data: String, // Base64-encoded PCM bytes
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseMessage {
    pub session_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextRequest {
    pub model: String,
    pub system_instruction: String,
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextReply {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub error: Option<ServerError>,
}

/// Anything the agent sends back on a session
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_content: Option<ServerContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ServerError>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default)]
    pub inline_data: Option<InlineData>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerError {
    pub message: String,
}

impl ServerMessage {
    /// Flatten into channel events: audio parts, input transcript, output
    /// transcript, interruption, turn completion, in that order
    pub fn into_events(self) -> Vec<ChannelEvent> {
        let mut events = Vec::new();

        if let Some(content) = self.server_content {
            if let Some(turn) = content.model_turn {
                for part in turn.parts {
                    if let Some(inline) = part.inline_data {
                        if inline.mime_type.starts_with("audio/") {
                            events.push(ChannelEvent::AudioDelta {
                                mime_type: inline.mime_type,
                                data: inline.data,
                            });
                        }
                    }
                }
            }

            if let Some(t) = content.input_transcription.filter(|t| !t.text.is_empty()) {
                events.push(ChannelEvent::InputTranscript(t.text));
            }
            if let Some(t) = content.output_transcription.filter(|t| !t.text.is_empty()) {
                events.push(ChannelEvent::OutputTranscript(t.text));
            }
            if content.interrupted {
                events.push(ChannelEvent::Interrupted);
            }
            if content.turn_complete {
                events.push(ChannelEvent::TurnComplete);
            }
        }

        if let Some(error) = self.error {
            events.push(ChannelEvent::Error(error.message));
        }

        events
    }
}
