use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::state::{SessionState, SessionStatus};
use super::transport::TransportHandle;
use crate::audio::pcm::{decode_pcm_base64, parse_mime_rate};
use crate::audio::AudioBackend;
use crate::capture::{CaptureHandle, CapturePipeline};
use crate::error::{SessionError, SessionResult};
use crate::history::ChatHistory;
use crate::live::{AgentConnector, ChannelEvent};
use crate::playback::{DecodedAudio, PlaybackScheduler};
use crate::quota::QuotaTracker;
use crate::store::KeyValueStore;
use crate::transcript::{Message, PendingTurn, Role};

/// One live conversation attempt
struct Session {
    id: String,
    capture: Option<CaptureHandle>,
    transport: Option<TransportHandle>,
    events: mpsc::Receiver<ChannelEvent>,
    faults: mpsc::Receiver<String>,
    // Keeps `faults` open for the whole session
    _fault_tx: mpsc::Sender<String>,
    pending: PendingTurn,
}

/// Owns the voice session state machine and every component it drives
///
/// All methods take `&mut self`; callers serialize access (see
/// `SessionHandle`), so no two events ever mutate session state at once.
pub struct SessionController {
    config: SessionConfig,
    connector: Arc<dyn AgentConnector>,
    backend: Box<dyn AudioBackend>,
    quota: QuotaTracker,
    history: ChatHistory,
    scheduler: PlaybackScheduler,
    state: SessionState,
    status: watch::Sender<SessionStatus>,
    session: Option<Session>,
}

impl SessionController {
    /// Create a controller, loading chat history and quota state from `store`
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn AgentConnector>,
        backend: Box<dyn AudioBackend>,
        store: Arc<dyn KeyValueStore>,
        scheduler: PlaybackScheduler,
    ) -> Result<Self> {
        let quota = QuotaTracker::load(Arc::clone(&store), config.daily_limit)?;
        let history = ChatHistory::load(store)?;
        Ok(Self::with_parts(config, connector, backend, quota, history, scheduler))
    }

    /// Create a controller from already-loaded components
    pub fn with_parts(
        config: SessionConfig,
        connector: Arc<dyn AgentConnector>,
        backend: Box<dyn AudioBackend>,
        mut quota: QuotaTracker,
        history: ChatHistory,
        scheduler: PlaybackScheduler,
    ) -> Self {
        let (status, _) = watch::channel(SessionStatus::idle(quota.remaining()));

        info!(
            "Session controller ready (audio: {}, quota {}/{} left)",
            backend.name(),
            quota.remaining(),
            quota.limit()
        );

        Self {
            config,
            connector,
            backend,
            quota,
            history,
            scheduler,
            state: SessionState::Idle,
            status,
            session: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.id.as_str())
    }

    pub fn remaining_quota(&mut self) -> u32 {
        self.quota.remaining()
    }

    /// Watch state, quota and the last surfaced error
    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub fn history(&self) -> &[Message] {
        self.history.messages()
    }

    pub fn subscribe_history(&mut self) -> mpsc::UnboundedReceiver<Message> {
        self.history.subscribe()
    }

    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    pub fn pending_turn(&self) -> Option<&PendingTurn> {
        self.session.as_ref().map(|s| &s.pending)
    }

    pub(crate) fn connector(&self) -> Arc<dyn AgentConnector> {
        Arc::clone(&self.connector)
    }

    pub(crate) fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn publish(&mut self, last_error: Option<SessionError>) {
        let status = SessionStatus {
            state: self.state,
            session_id: self.session.as_ref().map(|s| s.id.clone()),
            remaining_quota: self.quota.remaining(),
            last_error,
        };
        self.status.send_replace(status);
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            info!("Session state: {} -> {}", self.state, state);
            self.state = state;
        }
        let last_error = self.status.borrow().last_error.clone();
        self.publish(last_error);
    }

    /// Record a surfaced error on the status and hand it back
    fn report(&mut self, error: SessionError) -> SessionError {
        warn!("{}", error);
        self.publish(Some(error.clone()));
        error
    }

    /// Open a voice session
    ///
    /// Checks the quota, acquires the microphone, opens the agent channel and
    /// only then starts streaming. Returns the new session id.
    pub async fn start(&mut self) -> SessionResult<String> {
        if self.state != SessionState::Idle {
            return Err(self.report(SessionError::InvalidState(self.state.to_string())));
        }

        if !self.quota.can_start() {
            let limit = self.quota.limit();
            return Err(self.report(SessionError::QuotaExceeded { limit }));
        }

        let input = match self.backend.start().await {
            Ok(input) => input,
            Err(e) => return Err(self.report(e)),
        };

        let session_id = format!("voice-{}", uuid::Uuid::new_v4());
        self.set_state(SessionState::Opening);
        info!("Opening agent session {} via {}", session_id, self.backend.name());

        let channel = match self
            .connector
            .open(&session_id, &self.config.conversation)
            .await
        {
            Ok(channel) => channel,
            Err(e) => {
                let error = match e {
                    SessionError::SessionOpenFailed(_) => e,
                    other => SessionError::SessionOpenFailed(other.to_string()),
                };
                self.set_state(SessionState::Errored);
                if let Err(stop_err) = self.backend.stop().await {
                    warn!("Failed to release audio input: {:#}", stop_err);
                }
                self.scheduler.cancel_all();
                self.set_state(SessionState::Idle);
                return Err(self.report(error));
            }
        };

        // Channel is ready: wire capture → queue → transport
        let (queue_tx, queue_rx) = mpsc::channel(self.config.outbound_queue.max(1));
        let (fault_tx, fault_rx) = mpsc::channel(4);
        let transport = TransportHandle::spawn(channel.sink, queue_rx, fault_tx.clone());
        let capture = CapturePipeline::spawn(self.config.capture.clone(), input, queue_tx);

        self.session = Some(Session {
            id: session_id.clone(),
            capture: Some(capture),
            transport: Some(transport),
            events: channel.events,
            faults: fault_rx,
            _fault_tx: fault_tx,
            pending: PendingTurn::new(),
        });
        self.set_state(SessionState::Active);
        self.publish(None);

        Ok(session_id)
    }

    /// Close the current session; a no-op while idle
    pub async fn stop(&mut self) -> SessionResult<()> {
        if self.state == SessionState::Idle {
            debug!("stop() while idle");
            return Ok(());
        }

        self.set_state(SessionState::Closing);
        self.teardown().await;
        self.set_state(SessionState::Idle);
        Ok(())
    }

    /// Cancel playback, stop capture, discard the open turn, close the channel
    async fn teardown(&mut self) {
        // Silence first: nothing scheduled survives the cancellation point
        self.scheduler.cancel_all();

        let Some(mut session) = self.session.take() else {
            if let Err(e) = self.backend.stop().await {
                warn!("Failed to release audio input: {:#}", e);
            }
            return;
        };

        if let Some(capture) = session.capture.take() {
            let stats = capture.stop().await;
            debug!(
                "Session {} captured {} frames ({} dropped)",
                session.id, stats.frames_produced, stats.frames_dropped
            );
        }

        if let Err(e) = self.backend.stop().await {
            warn!("Failed to release audio input: {:#}", e);
        }

        if !session.pending.user_text().is_empty() || !session.pending.agent_text().is_empty() {
            debug!("Discarding uncommitted turn");
        }
        session.pending.discard();

        if let Some(transport) = session.transport.take() {
            let sent = transport.shutdown().await;
            info!("Session {} closed ({} frames sent)", session.id, sent);
        }
    }

    /// Terminal failure: Errored, full teardown, back to Idle
    async fn fail(&mut self, error: SessionError) -> SessionError {
        error!("Session failed: {}", error);
        self.set_state(SessionState::Errored);
        self.teardown().await;
        self.set_state(SessionState::Idle);
        self.report(error)
    }

    /// Wait for the next inbound event of the current session
    ///
    /// Pending forever while no session is open. A closed event stream is
    /// reported as a channel error.
    pub async fn next_event(&mut self) -> ChannelEvent {
        let Some(session) = self.session.as_mut() else {
            return std::future::pending().await;
        };

        tokio::select! {
            event = session.events.recv() => {
                event.unwrap_or_else(|| ChannelEvent::Error("agent channel closed".to_string()))
            }
            Some(fault) = session.faults.recv() => ChannelEvent::Error(fault),
        }
    }

    /// Process one inbound channel event
    ///
    /// Events are only acted on while `Active`. A `DecodeError` drops the
    /// offending audio and keeps the session; a channel error tears it down.
    pub async fn handle_event(&mut self, event: ChannelEvent) -> SessionResult<()> {
        if self.state != SessionState::Active {
            debug!("Ignoring {:?} while {}", event, self.state);
            return Ok(());
        }

        match event {
            ChannelEvent::AudioDelta { mime_type, data } => {
                let sample_rate = parse_mime_rate(&mime_type).unwrap_or(self.config.output_sample_rate);
                match decode_pcm_base64(&data) {
                    Ok(samples) => {
                        self.scheduler.enqueue(DecodedAudio {
                            samples,
                            sample_rate,
                            channels: 1,
                        });
                    }
                    Err(e) => return Err(self.report(e)),
                }
            }

            ChannelEvent::InputTranscript(text) => {
                if let Some(session) = self.session.as_mut() {
                    session.pending.push_user(&text);
                }
            }

            ChannelEvent::OutputTranscript(text) => {
                if let Some(session) = self.session.as_mut() {
                    session.pending.push_agent(&text);
                }
            }

            ChannelEvent::Interrupted => {
                info!("Agent interrupted");
                self.scheduler.cancel_all();
                if let Some(session) = self.session.as_mut() {
                    session.pending.interrupt();
                }
            }

            ChannelEvent::TurnComplete => {
                let filler = self.config.filler_reply.clone();
                let pair = self
                    .session
                    .as_mut()
                    .and_then(|session| session.pending.commit(&filler));

                match pair {
                    Some(pair) => self.commit_voice_turn(pair)?,
                    None => debug!("Turn complete without user speech, nothing committed"),
                }
            }

            ChannelEvent::Error(message) => {
                return Err(self.fail(SessionError::ChannelError(message)).await);
            }
        }

        Ok(())
    }

    fn commit_voice_turn(&mut self, pair: [Message; 2]) -> SessionResult<()> {
        info!("Turn committed: {:?} / {:?}", pair[0].text, pair[1].text);

        let stored = self.history.append(pair);

        // Quota is consumed optimistically, even if persisting history failed
        if let Err(e) = self.quota.increment() {
            let error = SessionError::Storage(format!("{:#}", e));
            return Err(self.report(error));
        }
        if let Err(e) = stored {
            let error = SessionError::Storage(format!("{:#}", e));
            return Err(self.report(error));
        }

        let last_error = self.status.borrow().last_error.clone();
        self.publish(last_error);
        Ok(())
    }

    /// Record a finished text turn; no audio, no quota
    pub(crate) fn finish_text_turn(
        &mut self,
        text: &str,
        reply: SessionResult<String>,
    ) -> SessionResult<Message> {
        let reply = reply.map_err(|e| self.report(e))?;

        let user = Message::new(Role::User, text);
        let agent = Message::new(Role::Agent, reply);
        if let Err(e) = self.history.append([user, agent.clone()]) {
            return Err(self.report(SessionError::Storage(format!("{:#}", e))));
        }
        Ok(agent)
    }

    /// Text fallback: one request, one agent reply
    pub async fn send_text_turn(&mut self, text: &str) -> SessionResult<Message> {
        let reply = self
            .connector
            .send_text(&self.config.conversation, text)
            .await;
        self.finish_text_turn(text, reply)
    }

    /// Reap playback items that finished
    pub fn tick(&mut self) {
        self.scheduler.reap();
    }

    /// Stop any session and release outputs
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.stop().await {
            warn!("Failed to stop session during shutdown: {}", e);
        }
        self.scheduler.close();
    }
}
