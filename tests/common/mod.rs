// Shared fakes for integration tests
//
// A scripted microphone and a scripted agent, both driven from the test body.

#![allow(dead_code)]

use anyhow::Result;
use chrono::NaiveDate;
use loqa_voice::audio::{AudioBackend, AudioFrame};
use loqa_voice::history::ChatHistory;
use loqa_voice::live::{AgentChannel, AgentConnector, ChannelEvent, FrameSink, OutboundFrame};
use loqa_voice::playback::{ManualClock, NullOutput, PlaybackScheduler};
use loqa_voice::quota::QuotaTracker;
use loqa_voice::session::{ConversationConfig, SessionConfig, SessionController};
use loqa_voice::store::{KeyValueStore, MemoryStore};
use loqa_voice::{SessionError, SessionResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 17).unwrap()
}

// ============================================================================
// Microphone
// ============================================================================

#[derive(Default)]
pub struct MicProbe {
    input: Mutex<Option<mpsc::Sender<AudioFrame>>>,
    pub deny: AtomicBool,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
}

impl MicProbe {
    /// Push `samples` of 16kHz mono audio as one raw block
    pub async fn speak(&self, samples: usize) -> Result<()> {
        let tx = self
            .input
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("microphone is not capturing"))?;
        tx.send(AudioFrame {
            samples: vec![512; samples],
            sample_rate: 16000,
            channels: 1,
            sequence: 0,
            timestamp_ms: 0,
        })
        .await?;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.input.lock().unwrap().is_some()
    }
}

pub struct FakeMic {
    probe: Arc<MicProbe>,
}

#[async_trait::async_trait]
impl AudioBackend for FakeMic {
    async fn start(&mut self) -> SessionResult<mpsc::Receiver<AudioFrame>> {
        if self.probe.deny.load(Ordering::SeqCst) {
            return Err(SessionError::PermissionDenied(
                "microphone access refused".to_string(),
            ));
        }
        self.probe.starts.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(16);
        *self.probe.input.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.probe.stops.fetch_add(1, Ordering::SeqCst);
        self.probe.input.lock().unwrap().take();
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.probe.is_open()
    }

    fn name(&self) -> &str {
        "fake microphone"
    }
}

// ============================================================================
// Agent
// ============================================================================

#[derive(Default)]
pub struct AgentProbe {
    events: Mutex<Option<mpsc::Sender<ChannelEvent>>>,
    sent: Mutex<Vec<OutboundFrame>>,
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub fail_open: AtomicBool,
    pub fail_send: AtomicBool,
}

impl AgentProbe {
    pub async fn emit(&self, event: ChannelEvent) -> Result<()> {
        let tx = self
            .events
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no channel open"))?;
        tx.send(event).await?;
        Ok(())
    }

    /// Drop the agent's end of the event stream
    pub fn hang_up(&self) {
        self.events.lock().unwrap().take();
    }

    pub fn sent(&self) -> Vec<OutboundFrame> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closes.load(Ordering::SeqCst) > 0
    }

    pub async fn wait_for_frames(&self, count: usize) -> Result<Vec<OutboundFrame>> {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let sent = self.sent();
                if sent.len() >= count {
                    return sent;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .map_err(|_| anyhow::anyhow!("agent received fewer than {} frames", count))
    }
}

pub struct FakeAgent {
    probe: Arc<AgentProbe>,
}

struct FakeSink {
    probe: Arc<AgentProbe>,
}

#[async_trait::async_trait]
impl FrameSink for FakeSink {
    async fn send(&mut self, frame: OutboundFrame) -> Result<()> {
        if self.probe.fail_send.load(Ordering::SeqCst) {
            anyhow::bail!("connection reset");
        }
        self.probe.sent.lock().unwrap().push(frame);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait::async_trait]
impl AgentConnector for FakeAgent {
    async fn open(
        &self,
        _session_id: &str,
        _config: &ConversationConfig,
    ) -> SessionResult<AgentChannel> {
        self.probe.opens.fetch_add(1, Ordering::SeqCst);
        if self.probe.fail_open.load(Ordering::SeqCst) {
            return Err(SessionError::SessionOpenFailed(
                "agent unavailable".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(64);
        *self.probe.events.lock().unwrap() = Some(tx);
        Ok(AgentChannel {
            sink: Box::new(FakeSink {
                probe: Arc::clone(&self.probe),
            }),
            events: rx,
        })
    }

    async fn send_text(&self, _config: &ConversationConfig, text: &str) -> SessionResult<String> {
        Ok(format!("You said: {}", text))
    }
}

// ============================================================================
// Rig
// ============================================================================

pub struct Rig {
    pub controller: SessionController,
    pub mic: Arc<MicProbe>,
    pub agent: Arc<AgentProbe>,
    pub clock: ManualClock,
    pub store: Arc<MemoryStore>,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    pub fn with_store(store: Arc<MemoryStore>) -> Self {
        let mic = Arc::new(MicProbe::default());
        let agent = Arc::new(AgentProbe::default());
        let clock = ManualClock::new();

        let kv: Arc<dyn KeyValueStore> = store.clone();
        let quota = QuotaTracker::with_calendar(Arc::clone(&kv), 5, today).unwrap();
        let history = ChatHistory::load(kv).unwrap();
        let scheduler = PlaybackScheduler::new(Arc::new(clock.clone()), Box::new(NullOutput));

        let controller = SessionController::with_parts(
            SessionConfig::default(),
            Arc::new(FakeAgent {
                probe: Arc::clone(&agent),
            }),
            Box::new(FakeMic {
                probe: Arc::clone(&mic),
            }),
            quota,
            history,
            scheduler,
        );

        Self {
            controller,
            mic,
            agent,
            clock,
            store,
        }
    }
}
