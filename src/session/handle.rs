use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

use super::controller::SessionController;
use super::state::SessionStatus;
use crate::error::{SessionError, SessionResult};
use crate::transcript::Message;

enum Command {
    Start(oneshot::Sender<SessionResult<String>>),
    Stop(oneshot::Sender<SessionResult<()>>),
    SendText(String, oneshot::Sender<SessionResult<Message>>),
    History(oneshot::Sender<Vec<Message>>),
    SubscribeHistory(oneshot::Sender<mpsc::UnboundedReceiver<Message>>),
    Shutdown(oneshot::Sender<()>),
}

/// A text request that finished off the event loop
struct TextReply {
    text: String,
    reply: SessionResult<String>,
    respond: oneshot::Sender<SessionResult<Message>>,
}

/// Cloneable front end to a controller running on its own task
///
/// Control actions, inbound channel events and playback housekeeping are
/// all processed by that one task, one at a time, in arrival order.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    /// Move the controller onto a background task
    pub fn spawn(controller: SessionController) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(32);
        let status = controller.status();

        tokio::spawn(run(controller, commands_rx));

        Self {
            commands: commands_tx,
            status,
        }
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> SessionResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| SessionError::InvalidState("controller stopped".to_string()))?;
        rx.await
            .map_err(|_| SessionError::InvalidState("controller stopped".to_string()))
    }

    pub async fn start(&self) -> SessionResult<String> {
        self.call(Command::Start).await?
    }

    pub async fn stop(&self) -> SessionResult<()> {
        self.call(Command::Stop).await?
    }

    pub async fn send_text_turn(&self, text: impl Into<String>) -> SessionResult<Message> {
        let text = text.into();
        self.call(|tx| Command::SendText(text, tx)).await?
    }

    pub async fn history(&self) -> SessionResult<Vec<Message>> {
        self.call(Command::History).await
    }

    pub async fn subscribe_history(&self) -> SessionResult<mpsc::UnboundedReceiver<Message>> {
        self.call(Command::SubscribeHistory).await
    }

    /// Stop any session and end the controller task
    pub async fn shutdown(&self) -> SessionResult<()> {
        self.call(Command::Shutdown).await
    }

    /// Current snapshot
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Receiver that wakes on every status change
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }
}

async fn run(mut controller: SessionController, mut commands: mpsc::Receiver<Command>) {
    let (text_tx, mut text_rx) = mpsc::unbounded_channel::<TextReply>();
    let mut reap = tokio::time::interval(Duration::from_millis(
        controller.config().reap_interval_ms.max(1),
    ));
    reap.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!("Session controller task started");

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { break };
                match command {
                    Command::Start(respond) => {
                        let _ = respond.send(controller.start().await);
                    }
                    Command::Stop(respond) => {
                        let _ = respond.send(controller.stop().await);
                    }
                    Command::SendText(text, respond) => {
                        // The agent round trip runs off-loop; the commit comes back in order
                        let connector = controller.connector();
                        let conversation = controller.config().conversation.clone();
                        let text_tx = text_tx.clone();
                        tokio::spawn(async move {
                            let reply = connector.send_text(&conversation, &text).await;
                            let _ = text_tx.send(TextReply { text, reply, respond });
                        });
                    }
                    Command::History(respond) => {
                        let _ = respond.send(controller.history().to_vec());
                    }
                    Command::SubscribeHistory(respond) => {
                        let _ = respond.send(controller.subscribe_history());
                    }
                    Command::Shutdown(respond) => {
                        controller.shutdown().await;
                        let _ = respond.send(());
                        info!("Session controller task stopped");
                        return;
                    }
                }
            }

            Some(done) = text_rx.recv() => {
                let result = controller.finish_text_turn(&done.text, done.reply);
                let _ = done.respond.send(result);
            }

            event = controller.next_event() => {
                match controller.handle_event(event).await {
                    Err(e) if e.is_terminal() => info!("Session ended: {}", e),
                    Err(e) => debug!("Event surfaced error: {}", e),
                    Ok(()) => {}
                }
            }

            _ = reap.tick() => controller.tick(),
        }
    }

    controller.shutdown().await;
    info!("Session controller task stopped");
}
