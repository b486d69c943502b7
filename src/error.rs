//! Error types for voice sessions.

use thiserror::Error;

/// Errors surfaced by the session controller and its components.
///
/// Every variant is recoverable from the caller's point of view: the
/// controller always tears the session down and returns to `Idle` before
/// reporting a terminal error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Microphone access denied: {0}")]
    PermissionDenied(String),

    #[error("Daily voice quota of {limit} turns reached")]
    QuotaExceeded { limit: u32 },

    #[error("Failed to open agent session: {0}")]
    SessionOpenFailed(String),

    #[error("Agent channel error: {0}")]
    ChannelError(String),

    #[error("Malformed inbound audio: {0}")]
    DecodeError(String),

    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Operation not valid in state {0}")]
    InvalidState(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

impl SessionError {
    /// Whether this error ends the session it was raised in.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionError::SessionOpenFailed(_) | SessionError::ChannelError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_exceeded_display() {
        let error = SessionError::QuotaExceeded { limit: 5 };
        assert_eq!(error.to_string(), "Daily voice quota of 5 turns reached");
    }

    #[test]
    fn test_terminal_errors() {
        assert!(SessionError::ChannelError("reset".into()).is_terminal());
        assert!(SessionError::SessionOpenFailed("refused".into()).is_terminal());
        assert!(!SessionError::DecodeError("odd length".into()).is_terminal());
        assert!(!SessionError::PermissionDenied("no".into()).is_terminal());
    }
}
