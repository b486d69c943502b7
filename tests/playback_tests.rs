// Integration tests for playback scheduling and WAV rendering

use anyhow::Result;
use loqa_voice::playback::{
    DecodedAudio, ManualClock, PlaybackItem, PlaybackOutput, PlaybackScheduler, WavOutput,
};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const RATE: u32 = 8000;

fn tone(secs: f64, level: i16) -> DecodedAudio {
    DecodedAudio {
        samples: vec![level; (secs * RATE as f64) as usize],
        sample_rate: RATE,
        channels: 1,
    }
}

/// Records every call the scheduler makes
#[derive(Clone, Default)]
struct OutputLog {
    calls: Arc<Mutex<Vec<String>>>,
}

impl OutputLog {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl PlaybackOutput for OutputLog {
    fn schedule(&mut self, item: &PlaybackItem) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("schedule {} @{}", item.id, item.start));
        Ok(())
    }

    fn finish(&mut self, id: u64) -> Result<()> {
        self.calls.lock().unwrap().push(format!("finish {}", id));
        Ok(())
    }

    fn halt(&mut self) -> Result<()> {
        self.calls.lock().unwrap().push("halt".to_string());
        Ok(())
    }
}

#[test]
fn test_start_times_never_overlap_under_jittery_arrival() {
    let clock = ManualClock::new();
    let mut scheduler = PlaybackScheduler::new(Arc::new(clock.clone()), Box::new(OutputLog::default()));

    // Arrival gaps shorter and longer than the audio already queued
    let arrivals = [(0.0, 0.4), (0.1, 0.3), (0.2, 0.5), (2.0, 0.2), (2.05, 0.6), (2.3, 0.1)];

    let mut previous: Option<PlaybackItem> = None;
    for (at, secs) in arrivals {
        clock.set(at);
        let item = scheduler.enqueue(tone(secs, 1));

        assert!(item.start >= at);
        if let Some(prev) = &previous {
            assert!(item.start >= prev.start);
            assert!(item.start >= prev.end() - 1e-9);
        }
        previous = Some(item);
    }

    // The first run (0.0-1.2) has played out; 2.0-2.2 finished by 2.3
    let starts: Vec<f64> = scheduler.pending().map(|i| i.start).collect();
    assert_eq!(starts.len(), 2);
    assert!((starts[0] - 2.2).abs() < 1e-9);
    assert!((starts[1] - 2.8).abs() < 1e-9);
}

#[test]
fn test_interruption_mid_item_halts_immediately() {
    let clock = ManualClock::new();
    let log = OutputLog::default();
    let mut scheduler = PlaybackScheduler::new(Arc::new(clock.clone()), Box::new(log.clone()));

    let a = scheduler.enqueue(tone(2.0, 1));
    assert_eq!(a.start, 0.0);

    clock.set(0.5);
    assert!(scheduler.is_playing());
    scheduler.cancel_all();

    assert!(!scheduler.is_playing());
    assert_eq!(scheduler.pending_len(), 0);
    assert_eq!(scheduler.next_start(), 0.0);
    assert_eq!(log.calls(), vec!["schedule 0 @0".to_string(), "halt".to_string()]);

    // Nothing halted comes back as finished
    clock.set(3.0);
    assert_eq!(scheduler.reap(), 0);

    clock.set(3.5);
    let b = scheduler.enqueue(tone(1.0, 1));
    assert_eq!(b.start, 3.5);
}

#[test]
fn test_cancel_all_on_empty_scheduler_is_safe() {
    let clock = ManualClock::new();
    let mut scheduler = PlaybackScheduler::new(Arc::new(clock), Box::new(OutputLog::default()));

    scheduler.cancel_all();
    scheduler.cancel_all();

    assert_eq!(scheduler.pending_len(), 0);
    assert_eq!(scheduler.next_start(), 0.0);
}

#[test]
fn test_wav_output_renders_only_audio_that_played() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("agent.wav");

    let clock = ManualClock::new();
    let output = WavOutput::create(&path, RATE, 1)?;
    let mut scheduler = PlaybackScheduler::new(Arc::new(clock.clone()), Box::new(output));

    scheduler.enqueue(tone(0.5, 100)); // 0.0 - 0.5
    scheduler.enqueue(tone(0.25, 200)); // 0.5 - 0.75

    clock.set(1.0);
    assert_eq!(scheduler.reap(), 2);

    scheduler.enqueue(tone(0.5, 300)); // 1.0 - 1.5, after 0.25s of silence
    scheduler.enqueue(tone(1.0, 400)); // 1.5 - 2.5, cut off by barge-in

    clock.set(1.7);
    scheduler.cancel_all();
    scheduler.close();

    let reader = hound::WavReader::open(&path)?;
    assert_eq!(reader.spec().sample_rate, RATE);
    let samples: Vec<i16> = reader.into_samples::<i16>().collect::<Result<_, _>>()?;

    assert_eq!(samples.len(), 4000 + 2000 + 2000 + 4000);
    assert!(samples[..4000].iter().all(|&s| s == 100));
    assert!(samples[4000..6000].iter().all(|&s| s == 200));
    assert!(samples[6000..8000].iter().all(|&s| s == 0));
    assert!(samples[8000..].iter().all(|&s| s == 300));
    assert!(!samples.contains(&400));

    Ok(())
}
