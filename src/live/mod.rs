//! Bidirectional channel to the remote conversational agent.

pub mod channel;
pub mod client;
pub mod messages;

pub use channel::{AgentChannel, AgentConnector, ChannelEvent, FrameSink, OutboundFrame};
pub use client::NatsConnector;
pub use messages::{RealtimeInputMessage, ServerMessage};
