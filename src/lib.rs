pub mod audio;
pub mod capture;
pub mod config;
pub mod error;
pub mod history;
pub mod http;
pub mod live;
pub mod playback;
pub mod quota;
pub mod session;
pub mod store;
pub mod transcript;

pub use audio::{AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource};
pub use capture::{CaptureConfig, CapturePipeline};
pub use config::Config;
pub use error::{SessionError, SessionResult};
pub use history::ChatHistory;
pub use http::{create_router, AppState};
pub use live::{AgentChannel, AgentConnector, ChannelEvent, FrameSink, NatsConnector, OutboundFrame};
pub use playback::{PlaybackScheduler, WavOutput};
pub use quota::{QuotaState, QuotaTracker};
pub use session::{
    ConversationConfig, SessionConfig, SessionController, SessionHandle, SessionState,
    SessionStatus,
};
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use transcript::{Message, Role};
