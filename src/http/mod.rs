//! HTTP API server for external control
//!
//! This module provides a REST API over one voice session:
//! - POST /voice/start - Open a voice session
//! - POST /voice/stop - Close the current session
//! - GET /voice/status - State, session id, remaining quota, last error
//! - POST /chat/text - Send one text turn, returns the agent reply
//! - GET /chat/history - Committed chat messages
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
