// Clock-driven playback backend

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

use super::backend::{PlaybackBackend, PlaybackStatus};
use super::file::AudioFile;

/// Playback backend that tracks position on the monotonic clock
///
/// Opens the file to validate it and learn its length, then advances the
/// play head in real time while playing.
pub struct ClockPlayer {
    length: Duration,
    /// Position at the last play/pause/seek
    anchor: Duration,
    /// When playback last (re)started, if playing
    resumed_at: Option<Instant>,
    status: PlaybackStatus,
}

impl ClockPlayer {
    pub fn new() -> Self {
        Self {
            length: Duration::ZERO,
            anchor: Duration::ZERO,
            resumed_at: None,
            status: PlaybackStatus::Idle,
        }
    }

    fn raw_position(&self) -> Duration {
        let position = match self.resumed_at {
            Some(started) => self.anchor + started.elapsed(),
            None => self.anchor,
        };
        position.min(self.length)
    }
}

impl Default for ClockPlayer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PlaybackBackend for ClockPlayer {
    async fn open(&mut self, path: &Path) -> Result<Duration> {
        let file = AudioFile::probe(path).context("Failed to prepare player")?;

        info!(
            "Clock player opened {} ({:.1}s)",
            path.display(),
            file.duration.as_secs_f64()
        );

        self.length = file.duration;
        self.anchor = Duration::ZERO;
        self.resumed_at = None;
        self.status = PlaybackStatus::Paused;

        Ok(file.duration)
    }

    async fn play(&mut self) -> Result<()> {
        match self.status() {
            PlaybackStatus::Playing => Ok(()),
            PlaybackStatus::Paused => {
                self.resumed_at = Some(Instant::now());
                self.status = PlaybackStatus::Playing;
                Ok(())
            }
            other => bail!("Player can't play in state {:?}", other),
        }
    }

    async fn pause(&mut self) -> Result<()> {
        if self.status() == PlaybackStatus::Playing {
            self.anchor = self.raw_position();
            self.resumed_at = None;
            self.status = PlaybackStatus::Paused;
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.anchor = self.raw_position();
        self.resumed_at = None;
        self.status = PlaybackStatus::Stopped;
        Ok(())
    }

    fn position(&self) -> Duration {
        self.raw_position()
    }

    fn set_position(&mut self, position: Duration) {
        self.anchor = position.min(self.length);
        if self.resumed_at.is_some() {
            self.resumed_at = Some(Instant::now());
        }
    }

    fn status(&self) -> PlaybackStatus {
        if self.status == PlaybackStatus::Playing && self.raw_position() >= self.length {
            return PlaybackStatus::Finished;
        }
        self.status
    }

    fn name(&self) -> &str {
        "clock-player"
    }
}
