//! Voice session management
//!
//! This module provides the `SessionController` that owns:
//! - Microphone access and the capture pipeline
//! - The channel to the remote agent and its outbound transport
//! - Playback scheduling of agent audio
//! - Transcript aggregation, chat history and the daily quota
//!
//! `SessionHandle` runs a controller on one task so control actions and
//! inbound channel events are processed strictly in arrival order.

mod config;
mod controller;
mod handle;
mod state;
mod transport;

pub use config::{ConversationConfig, ResponseModality, SessionConfig};
pub use controller::SessionController;
pub use handle::SessionHandle;
pub use state::{SessionState, SessionStatus};
