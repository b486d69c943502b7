use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::store::KeyValueStore;
use crate::transcript::Message;

pub const CHAT_HISTORY_KEY: &str = "chat_history";

#[derive(Debug, Default, Serialize, Deserialize)]
struct ChatHistoryRecord {
    messages: Vec<Message>,
}

/// Append-only chat log persisted to the key-value store
///
/// Committed messages are also pushed to every registered consumer in
/// commit order.
pub struct ChatHistory {
    store: Arc<dyn KeyValueStore>,
    messages: Vec<Message>,
    consumers: Vec<mpsc::UnboundedSender<Message>>,
}

impl ChatHistory {
    /// Load the persisted history (empty when nothing was stored yet)
    pub fn load(store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let messages = match store.get(CHAT_HISTORY_KEY)? {
            Some(bytes) => {
                serde_json::from_slice::<ChatHistoryRecord>(&bytes)
                    .context("Failed to parse chat history")?
                    .messages
            }
            None => Vec::new(),
        };

        info!("Chat history loaded: {} messages", messages.len());

        Ok(Self {
            store,
            messages,
            consumers: Vec::new(),
        })
    }

    /// Register a consumer; it receives messages committed from now on
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.consumers.push(tx);
        rx
    }

    /// Append messages in order and persist the log
    pub fn append(&mut self, messages: impl IntoIterator<Item = Message>) -> Result<()> {
        let start = self.messages.len();
        self.messages.extend(messages);
        let added = &self.messages[start..];
        if added.is_empty() {
            return Ok(());
        }

        self.consumers
            .retain(|consumer| added.iter().all(|m| consumer.send(m.clone()).is_ok()));

        let record = ChatHistoryRecord {
            messages: self.messages.clone(),
        };
        let bytes = serde_json::to_vec(&record)?;
        self.store
            .set(CHAT_HISTORY_KEY, &bytes)
            .context("Failed to persist chat history")?;

        debug!("Committed {} messages (total {})", added.len(), self.messages.len());
        Ok(())
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
