//! Playback scheduling for inbound agent audio
//!
//! - `clock`: the monotonic time base start times are computed against
//! - `scheduler`: gap-free ordering and barge-in cancellation
//! - `output`: sinks that render (or record) scheduled items

mod clock;
mod output;
mod scheduler;

pub use clock::{ManualClock, PlaybackClock, SystemClock};
pub use output::{NullOutput, PlaybackOutput, WavOutput};
pub use scheduler::{DecodedAudio, PlaybackItem, PlaybackScheduler};
