use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::config::SessionConfig;
use super::sampler::{Report, ReportKind, ReportSender, Sampler};
use crate::audio::{BackendFactory, PlaybackBackend, PlaybackStatus};
use crate::error::{SessionError, SessionResult};
use crate::store::{RecordStore, StoredRecord};

type SharedPlayback = Arc<Mutex<Box<dyn PlaybackBackend>>>;

/// Lifecycle of a playback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
    Finished,
    Stopped,
}

impl PlaybackState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PlaybackState::Finished | PlaybackState::Stopped)
    }
}

/// Playback of one stored record
pub struct PlaybackSession {
    generation: u64,
    state: PlaybackState,
    record: StoredRecord,
    path: PathBuf,
    duration: Duration,
    factory: Arc<dyn BackendFactory>,
    config: SessionConfig,
    reports: ReportSender,
    backend: Option<SharedPlayback>,
    sampler: Option<Sampler>,
    /// Position when the backend was released
    final_position: Duration,
    /// Bumped on every seek; readings from an older epoch are stale
    epoch: u64,
}

impl std::fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("generation", &self.generation)
            .field("state", &self.state)
            .field("path", &self.path)
            .field("duration", &self.duration)
            .field("final_position", &self.final_position)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

impl PlaybackSession {
    pub(crate) fn new(
        generation: u64,
        record: StoredRecord,
        store: &RecordStore,
        factory: Arc<dyn BackendFactory>,
        config: SessionConfig,
        reports: ReportSender,
    ) -> SessionResult<Self> {
        let duration = record.duration().ok_or_else(|| SessionError::InvalidState {
            operation: "play a record",
            state: format!("\"{}\" has no duration", record.name),
        })?;
        let path = store.audio_path(&record.file_reference);

        Ok(Self {
            generation,
            state: PlaybackState::Idle,
            record,
            path,
            duration,
            factory,
            config,
            reports,
            backend: None,
            sampler: None,
            final_position: Duration::ZERO,
            epoch: 0,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn record(&self) -> &StoredRecord {
        &self.record
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Track length as stored with the record
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub async fn position(&self) -> Duration {
        match &self.backend {
            Some(backend) => backend.lock().await.position().min(self.duration),
            None => self.final_position,
        }
    }

    /// Open the record's audio and start playing from the beginning
    pub async fn start(&mut self) -> SessionResult<()> {
        if self.state != PlaybackState::Idle {
            return Err(SessionError::invalid_state("start playback", self.state));
        }

        let mut backend = self
            .factory
            .playback_backend()
            .map_err(SessionError::DeviceUnavailable)?;

        let length = backend
            .open(&self.path)
            .await
            .map_err(|cause| SessionError::FileMissing {
                path: self.path.clone(),
                cause,
            })?;

        let gap = if length > self.duration {
            length - self.duration
        } else {
            self.duration - length
        };
        if gap > Duration::from_secs(1) {
            debug!(
                "\"{}\" stored as {:.1}s but the file holds {:.1}s",
                self.record.name,
                self.duration.as_secs_f64(),
                length.as_secs_f64()
            );
        }

        if let Err(e) = backend.play().await {
            if let Err(stop_err) = backend.stop().await {
                warn!("Failed to stop {} after failed start: {}", backend.name(), stop_err);
            }
            return Err(SessionError::DeviceUnavailable(e));
        }

        info!(
            "Playback session {} started: \"{}\" ({})",
            self.generation,
            self.record.name,
            backend.name()
        );

        let backend: SharedPlayback = Arc::new(Mutex::new(backend));
        self.sampler = Some(self.spawn_sampler(Arc::clone(&backend)));
        self.backend = Some(backend);
        self.state = PlaybackState::Playing;

        Ok(())
    }

    pub async fn pause(&mut self) -> SessionResult<()> {
        if self.state != PlaybackState::Playing {
            return Err(SessionError::invalid_state("pause playback", self.state));
        }

        let backend = self.active_backend("pause playback")?;
        backend
            .lock()
            .await
            .pause()
            .await
            .map_err(SessionError::DeviceUnavailable)?;

        if let Some(sampler) = self.sampler.take() {
            sampler.stop();
        }
        self.state = PlaybackState::Paused;

        Ok(())
    }

    pub async fn resume(&mut self) -> SessionResult<()> {
        if self.state != PlaybackState::Paused {
            return Err(SessionError::invalid_state("resume playback", self.state));
        }

        let backend = self.active_backend("resume playback")?;
        backend
            .lock()
            .await
            .play()
            .await
            .map_err(SessionError::DeviceUnavailable)?;

        self.sampler = Some(self.spawn_sampler(backend));
        self.state = PlaybackState::Playing;

        Ok(())
    }

    /// Jump to `fraction` of the track; out-of-range fractions are clamped
    pub async fn seek(&mut self, fraction: f64) -> SessionResult<Duration> {
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        self.seek_to(self.duration.mul_f64(fraction), "seek").await
    }

    /// Move the play head by `delta_seconds`, clamped to the track
    pub async fn seek_relative(&mut self, delta_seconds: f64) -> SessionResult<Duration> {
        let current = self.position().await.as_secs_f64();
        let delta = if delta_seconds.is_finite() { delta_seconds } else { 0.0 };
        let target = (current + delta).clamp(0.0, self.duration.as_secs_f64());
        self.seek_to(Duration::from_secs_f64(target), "seek relative").await
    }

    /// Release the backend; calling it again is a no-op
    pub async fn stop(&mut self) -> SessionResult<()> {
        if self.state.is_terminal() {
            return Ok(());
        }

        self.halt().await;
        self.state = PlaybackState::Stopped;
        info!("Playback session {} stopped", self.generation);

        Ok(())
    }

    /// Handle the end of the track; true only the first time
    pub(crate) async fn finish(&mut self) -> bool {
        if self.state != PlaybackState::Playing {
            return false;
        }

        self.halt().await;
        self.final_position = self.duration;
        self.state = PlaybackState::Finished;
        info!("Playback session {} finished", self.generation);

        true
    }

    async fn seek_to(&mut self, target: Duration, operation: &'static str) -> SessionResult<Duration> {
        if !matches!(self.state, PlaybackState::Playing | PlaybackState::Paused) {
            return Err(SessionError::invalid_state(operation, self.state));
        }

        let backend = self.active_backend(operation)?;

        // Readings already in flight describe the old position
        self.epoch += 1;
        let restart = self.sampler.take().is_some();

        backend.lock().await.set_position(target);

        if restart {
            self.sampler = Some(self.spawn_sampler(Arc::clone(&backend)));
        }

        // Report the new position right away instead of waiting for the next tick
        if self
            .reports
            .send(Report {
                generation: self.generation,
                kind: ReportKind::Playback {
                    elapsed: target,
                    epoch: self.epoch,
                },
            })
            .is_err()
        {
            debug!("Report channel closed");
        }

        Ok(target)
    }

    async fn halt(&mut self) {
        if let Some(sampler) = self.sampler.take() {
            sampler.stop();
        }

        if let Some(backend) = self.backend.take() {
            let mut backend = backend.lock().await;
            self.final_position = backend.position().min(self.duration);
            if let Err(e) = backend.stop().await {
                warn!("Failed to stop {}: {:#}", backend.name(), e);
            }
        }
    }

    fn active_backend(&self, operation: &'static str) -> SessionResult<SharedPlayback> {
        self.backend
            .clone()
            .ok_or_else(|| SessionError::invalid_state(operation, self.state))
    }

    fn spawn_sampler(&self, backend: SharedPlayback) -> Sampler {
        let duration = self.duration;
        let epoch = self.epoch;
        Sampler::spawn(
            self.generation,
            self.config.progress_interval,
            self.reports.clone(),
            move || {
                let backend = Arc::clone(&backend);
                async move {
                    let backend = backend.lock().await;
                    match backend.status() {
                        PlaybackStatus::Finished => ReportKind::PlaybackFinished { epoch },
                        _ => ReportKind::Playback {
                            elapsed: backend.position().min(duration),
                            epoch,
                        },
                    }
                }
            },
        )
    }
}
