use anyhow::{Context, Result};
use async_nats::Client;
use futures::stream::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::channel::{AgentChannel, AgentConnector, ChannelEvent, FrameSink, OutboundFrame};
use super::messages::{
    CloseMessage, MediaChunk, OpenRequest, RealtimeInputMessage, ServerMessage, TextReply,
    TextRequest,
};
use crate::error::{SessionError, SessionResult};
use crate::session::ConversationConfig;

/// Remote agent reached over NATS
///
/// Subjects, relative to the configured prefix:
/// - `open` (request/reply): session setup, answered with `setupComplete`
/// - `<session>.input`: microphone media chunks
/// - `<session>.events`: server messages for the session
/// - `<session>.close`: end of session
/// - `text` (request/reply): single text turn
pub struct NatsConnector {
    client: Client,
    subject_prefix: String,
    event_buffer: usize,
}

impl NatsConnector {
    /// Connect to NATS server
    pub async fn connect(url: &str, subject_prefix: impl Into<String>) -> Result<Self> {
        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        Ok(Self {
            client,
            subject_prefix: subject_prefix.into(),
            event_buffer: 256,
        })
    }

    fn subject(&self, suffix: &str) -> String {
        format!("{}.{}", self.subject_prefix, suffix)
    }
}

#[async_trait::async_trait]
impl AgentConnector for NatsConnector {
    async fn open(&self, session_id: &str, config: &ConversationConfig) -> SessionResult<AgentChannel> {
        let open_failed = |e: String| SessionError::SessionOpenFailed(e);

        // Subscribe before setup so no early event is lost
        let events_subject = self.subject(&format!("{}.events", session_id));
        let mut subscriber = self
            .client
            .subscribe(events_subject.clone())
            .await
            .map_err(|e| open_failed(e.to_string()))?;

        let request = OpenRequest {
            session_id: session_id.to_string(),
            setup: config.clone(),
        };
        let payload = serde_json::to_vec(&request).map_err(|e| open_failed(e.to_string()))?;

        let reply = self
            .client
            .request(self.subject("open"), payload.into())
            .await
            .map_err(|e| open_failed(e.to_string()))?;

        let setup: ServerMessage =
            serde_json::from_slice(&reply.payload).map_err(|e| open_failed(e.to_string()))?;
        if let Some(error) = setup.error {
            return Err(open_failed(error.message));
        }
        if setup.setup_complete.is_none() {
            return Err(open_failed("agent did not confirm setup".to_string()));
        }

        info!("Agent session {} ready (events on {})", session_id, events_subject);

        let (event_tx, event_rx) = mpsc::channel(self.event_buffer);
        let forwarder = tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                match serde_json::from_slice::<ServerMessage>(&msg.payload) {
                    Ok(message) => {
                        for event in message.into_events() {
                            if event_tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Failed to parse server message: {}", e);
                    }
                }
            }

            let _ = event_tx
                .send(ChannelEvent::Error("agent event stream ended".to_string()))
                .await;
        });

        let sink = NatsFrameSink {
            client: self.client.clone(),
            session_id: session_id.to_string(),
            input_subject: self.subject(&format!("{}.input", session_id)),
            close_subject: self.subject(&format!("{}.close", session_id)),
            forwarder: Some(forwarder),
        };

        Ok(AgentChannel {
            sink: Box::new(sink),
            events: event_rx,
        })
    }

    async fn send_text(&self, config: &ConversationConfig, text: &str) -> SessionResult<String> {
        let request = TextRequest {
            model: config.model.clone(),
            system_instruction: config.system_instruction.clone(),
            text: text.to_string(),
        };
        let payload = serde_json::to_vec(&request)
            .map_err(|e| SessionError::ChannelError(e.to_string()))?;

        let reply = self
            .client
            .request(self.subject("text"), payload.into())
            .await
            .map_err(|e| SessionError::ChannelError(e.to_string()))?;

        let reply: TextReply = serde_json::from_slice(&reply.payload)
            .map_err(|e| SessionError::ChannelError(e.to_string()))?;

        match (reply.text, reply.error) {
            (_, Some(error)) => Err(SessionError::ChannelError(error.message)),
            (Some(text), None) => Ok(text),
            (None, None) => Err(SessionError::ChannelError("empty text reply".to_string())),
        }
    }
}

struct NatsFrameSink {
    client: Client,
    session_id: String,
    input_subject: String,
    close_subject: String,
    forwarder: Option<JoinHandle<()>>,
}

#[async_trait::async_trait]
impl FrameSink for NatsFrameSink {
    async fn send(&mut self, frame: OutboundFrame) -> Result<()> {
        let message = RealtimeInputMessage {
            session_id: self.session_id.clone(),
            sequence: frame.sequence,
            media_chunks: vec![MediaChunk {
                mime_type: frame.mime_type,
                data: frame.data,
            }],
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        let payload = serde_json::to_vec(&message)?;

        self.client
            .publish(self.input_subject.clone(), payload.into())
            .await
            .context("Failed to publish audio frame")?;

        debug!("Published frame {} to {}", frame.sequence, self.input_subject);

        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        info!("Closing agent session {}", self.session_id);

        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }

        let payload = serde_json::to_vec(&CloseMessage {
            session_id: self.session_id.clone(),
        })?;
        self.client
            .publish(self.close_subject.clone(), payload.into())
            .await
            .context("Failed to publish close message")?;
        self.client.flush().await.context("Failed to flush NATS")?;

        Ok(())
    }
}

impl Drop for NatsFrameSink {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}
