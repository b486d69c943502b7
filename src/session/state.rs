use serde::Serialize;
use std::fmt;

use crate::error::SessionError;

/// Lifecycle of a voice session
///
/// `Idle → Opening → Active → Closing → Idle`; `Errored` is entered from
/// `Opening` or `Active` on a terminal failure and left only through
/// teardown back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Opening,
    Active,
    Closing,
    Errored,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Opening => "opening",
            SessionState::Active => "active",
            SessionState::Closing => "closing",
            SessionState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Observable snapshot published on every change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub session_id: Option<String>,
    pub remaining_quota: u32,
    #[serde(serialize_with = "serialize_error")]
    pub last_error: Option<SessionError>,
}

fn serialize_error<S: serde::Serializer>(
    error: &Option<SessionError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

impl SessionStatus {
    pub fn idle(remaining_quota: u32) -> Self {
        Self {
            state: SessionState::Idle,
            session_id: None,
            remaining_quota,
            last_error: None,
        }
    }
}
