//! Transcript aggregation for one open turn.
//!
//! Streamed transcription deltas are appended to a [`PendingTurn`]; the turn
//! either commits into a user/agent [`Message`] pair or is discarded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

/// A committed chat message; never mutated after creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// In-progress transcripts for the turn currently open
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingTurn {
    user_text: String,
    agent_text: String,
}

impl PendingTurn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, delta: &str) {
        self.user_text.push_str(delta);
    }

    pub fn push_agent(&mut self, delta: &str) {
        self.agent_text.push_str(delta);
    }

    pub fn user_text(&self) -> &str {
        &self.user_text
    }

    pub fn agent_text(&self) -> &str {
        &self.agent_text
    }

    /// Barge-in: the partial agent utterance is dropped, the user's speech stays
    pub fn interrupt(&mut self) {
        self.agent_text.clear();
    }

    /// Drop everything without committing
    pub fn discard(&mut self) {
        self.user_text.clear();
        self.agent_text.clear();
    }

    /// Close the turn.
    ///
    /// Returns the `[user, agent]` pair when the user said something, using
    /// `filler` for an agent reply that produced no transcript. A user
    /// transcript that is empty or only whitespace commits nothing. The turn
    /// is cleared either way.
    pub fn commit(&mut self, filler: &str) -> Option<[Message; 2]> {
        if self.user_text.trim().is_empty() {
            self.discard();
            return None;
        }

        let user_text = std::mem::take(&mut self.user_text);
        let agent_text = std::mem::take(&mut self.agent_text);
        let agent_text = if agent_text.trim().is_empty() {
            filler.to_string()
        } else {
            agent_text
        };

        Some([
            Message::new(Role::User, user_text.trim()),
            Message::new(Role::Agent, agent_text.trim()),
        ])
    }
}
