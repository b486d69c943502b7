use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::scheduler::PlaybackItem;

/// Renders scheduled playback items
///
/// The scheduler calls `schedule` when an item is registered, `finish` when
/// it has played to the end and `halt` when everything must go silent at once.
pub trait PlaybackOutput: Send {
    fn schedule(&mut self, item: &PlaybackItem) -> Result<()>;

    fn finish(&mut self, id: u64) -> Result<()>;

    fn halt(&mut self) -> Result<()>;

    /// Flush and release the device or file
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Discards all audio
#[derive(Debug, Default)]
pub struct NullOutput;

impl PlaybackOutput for NullOutput {
    fn schedule(&mut self, item: &PlaybackItem) -> Result<()> {
        debug!("Discarding playback item {} ({:.2}s)", item.id, item.duration);
        Ok(())
    }

    fn finish(&mut self, _id: u64) -> Result<()> {
        Ok(())
    }

    fn halt(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writes agent audio that actually finished playing to a WAV file
///
/// Items land at their scheduled offset; gaps between items are written as
/// silence. Halted items never reach the file.
pub struct WavOutput {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    path: PathBuf,
    sample_rate: u32,
    channels: u16,
    pending: HashMap<u64, PlaybackItem>,
    /// Clock time at which the written audio ends
    cursor: Option<f64>,
    samples_written: u64,
}

impl WavOutput {
    pub fn create(path: impl AsRef<Path>, sample_rate: u32, channels: u16) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let writer = hound::WavWriter::create(&path, spec)
            .with_context(|| format!("Failed to create WAV file: {:?}", path))?;

        info!("Playback output: {:?} ({}Hz, {} channels)", path, sample_rate, channels);

        Ok(Self {
            writer: Some(writer),
            path,
            sample_rate,
            channels,
            pending: HashMap::new(),
            cursor: None,
            samples_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }
}

impl PlaybackOutput for WavOutput {
    fn schedule(&mut self, item: &PlaybackItem) -> Result<()> {
        if item.audio.sample_rate != self.sample_rate || item.audio.channels != self.channels {
            warn!(
                "Playback item {} is {}Hz/{}ch, output is {}Hz/{}ch; skipping",
                item.id, item.audio.sample_rate, item.audio.channels, self.sample_rate, self.channels
            );
            return Ok(());
        }
        self.pending.insert(item.id, item.clone());
        Ok(())
    }

    fn finish(&mut self, id: u64) -> Result<()> {
        let Some(item) = self.pending.remove(&id) else {
            return Ok(());
        };
        let Some(writer) = &mut self.writer else {
            return Ok(());
        };

        if let Some(cursor) = self.cursor {
            let gap = item.start - cursor;
            if gap > 0.0 {
                let silent = (gap * self.sample_rate as f64).round() as u64 * self.channels as u64;
                for _ in 0..silent {
                    writer.write_sample(0i16).context("Failed to write silence to WAV")?;
                }
                self.samples_written += silent;
            }
        }

        for &sample in &item.audio.samples {
            writer
                .write_sample(sample)
                .context("Failed to write sample to WAV")?;
        }
        self.samples_written += item.audio.samples.len() as u64;
        self.cursor = Some(item.end());

        Ok(())
    }

    fn halt(&mut self) -> Result<()> {
        if !self.pending.is_empty() {
            debug!("Dropping {} unplayed items from WAV output", self.pending.len());
        }
        self.pending.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.pending.clear();
        if let Some(writer) = self.writer.take() {
            writer.finalize().context("Failed to finalize WAV file")?;
            info!("Playback output closed: {:?} ({} samples)", self.path, self.samples_written);
        }
        Ok(())
    }
}

impl Drop for WavOutput {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                warn!("Failed to finalize WAV writer on drop: {}", e);
            }
        }
    }
}
