use anyhow::Result;
use tokio::sync::mpsc;

use crate::error::SessionResult;
use crate::session::ConversationConfig;

/// One base64 PCM chunk on its way to the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    pub sequence: u64,
    /// e.g. `audio/pcm;rate=16000`
    pub mime_type: String,
    /// Base64-encoded PCM16 little-endian samples
    pub data: String,
}

/// Inbound events, delivered in the order the agent produced them
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A chunk of agent speech, still base64-encoded
    AudioDelta { mime_type: String, data: String },
    /// Transcription of what the user said
    InputTranscript(String),
    /// Transcription of what the agent said
    OutputTranscript(String),
    /// The user barged in; the agent's current reply is void
    Interrupted,
    /// The agent finished its reply
    TurnComplete,
    /// The channel failed; terminal for the session
    Error(String),
}

/// Outbound half of an open channel
#[async_trait::async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: OutboundFrame) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// An open bidirectional channel to the remote agent
pub struct AgentChannel {
    pub sink: Box<dyn FrameSink>,
    pub events: mpsc::Receiver<ChannelEvent>,
}

/// Opens channels to the remote agent
#[async_trait::async_trait]
pub trait AgentConnector: Send + Sync {
    /// Open a channel and wait until the agent reports it ready
    ///
    /// Fails with `SessionOpenFailed`.
    async fn open(&self, session_id: &str, config: &ConversationConfig) -> SessionResult<AgentChannel>;

    /// One text request, one agent reply; no audio involved
    async fn send_text(&self, config: &ConversationConfig, text: &str) -> SessionResult<String>;
}
