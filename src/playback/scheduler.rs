use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::clock::PlaybackClock;
use super::output::PlaybackOutput;

/// A decoded PCM16 buffer ready for playback
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        (self.samples.len() / self.channels as usize) as f64 / self.sample_rate as f64
    }
}

/// A buffer pinned to a start time on the playback clock
#[derive(Debug, Clone)]
pub struct PlaybackItem {
    pub id: u64,
    pub audio: Arc<DecodedAudio>,
    pub start: f64,
    pub duration: f64,
}

impl PlaybackItem {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Gap-free sequential playback with total cancellation
///
/// Items are laid end to end: each starts at `max(next_start, now)` and
/// pushes `next_start` past its own end, so buffers enqueued in arrival
/// order never overlap. `cancel_all` silences everything and resets the
/// cursor so the next buffer starts at "now".
pub struct PlaybackScheduler {
    clock: Arc<dyn PlaybackClock>,
    output: Box<dyn PlaybackOutput>,
    next_start: f64,
    pending: VecDeque<PlaybackItem>,
    next_id: u64,
}

impl PlaybackScheduler {
    pub fn new(clock: Arc<dyn PlaybackClock>, output: Box<dyn PlaybackOutput>) -> Self {
        Self {
            clock,
            output,
            next_start: 0.0,
            pending: VecDeque::new(),
            next_id: 0,
        }
    }

    /// Register a buffer to play right after everything already scheduled
    pub fn enqueue(&mut self, audio: DecodedAudio) -> PlaybackItem {
        self.reap();

        let now = self.clock.now();
        if self.pending.is_empty() {
            self.next_start = now;
        }

        let start = self.next_start.max(now);
        let duration = audio.duration_secs();
        let item = PlaybackItem {
            id: self.next_id,
            audio: Arc::new(audio),
            start,
            duration,
        };
        self.next_id += 1;
        self.next_start = start + duration;

        if let Err(e) = self.output.schedule(&item) {
            warn!("Playback output rejected item {}: {}", item.id, e);
        }

        debug!(
            "Scheduled item {} at {:.3}s for {:.3}s ({} pending)",
            item.id,
            item.start,
            item.duration,
            self.pending.len() + 1
        );

        self.pending.push_back(item.clone());
        item
    }

    /// Silence everything immediately, including the item currently sounding
    pub fn cancel_all(&mut self) {
        // Items that already played out are finished, not cancelled
        self.reap();

        let dropped = self.pending.len();
        self.pending.clear();
        self.next_start = 0.0;

        if let Err(e) = self.output.halt() {
            warn!("Playback output failed to halt: {}", e);
        }

        if dropped > 0 {
            info!("Playback cancelled ({} items dropped)", dropped);
        }
    }

    /// Drop items that have played to completion; returns how many finished
    pub fn reap(&mut self) -> usize {
        let now = self.clock.now();
        let mut finished = 0;

        while let Some(front) = self.pending.front() {
            if front.end() > now {
                break;
            }
            let Some(item) = self.pending.pop_front() else {
                break;
            };
            if let Err(e) = self.output.finish(item.id) {
                warn!("Playback output failed to finish item {}: {}", item.id, e);
            }
            finished += 1;
        }

        finished
    }

    /// Whether some item is sounding at the current clock time
    pub fn is_playing(&self) -> bool {
        let now = self.clock.now();
        self.pending.iter().any(|item| item.start <= now && now < item.end())
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self) -> impl Iterator<Item = &PlaybackItem> {
        self.pending.iter()
    }

    pub fn next_start(&self) -> f64 {
        self.next_start
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    /// Cancel everything and release the output
    pub fn close(&mut self) {
        self.cancel_all();
        if let Err(e) = self.output.close() {
            warn!("Failed to close playback output: {}", e);
        }
    }
}
