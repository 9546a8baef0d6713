use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::config::SessionConfig;
use super::sampler::{ReportKind, ReportSender, Sampler};
use crate::audio::{BackendFactory, CaptureBackend, CaptureStatus, PermissionGate};
use crate::error::{SessionError, SessionResult};
use crate::store::{RecordStore, StoredRecord};

type SharedCapture = Arc<Mutex<Box<dyn CaptureBackend>>>;

/// Lifecycle of a recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Recording,
    Paused,
    /// Capture halted; the audio is waiting to be committed or discarded
    Stopping,
    Committed,
    Discarded,
}

impl RecordingState {
    /// Capturing or paused
    pub fn is_active(self) -> bool {
        matches!(self, RecordingState::Recording | RecordingState::Paused)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RecordingState::Committed | RecordingState::Discarded)
    }
}

/// One in-flight recording
///
/// Captures into a fresh audio file of the record store and, on a committing
/// stop, saves it as a [`StoredRecord`].
pub struct RecordingSession {
    generation: u64,
    state: RecordingState,
    store: RecordStore,
    file_reference: String,
    name: Option<String>,
    factory: Arc<dyn BackendFactory>,
    permission: Arc<dyn PermissionGate>,
    config: SessionConfig,
    reports: ReportSender,
    backend: Option<SharedCapture>,
    sampler: Option<Sampler>,
    started_at: Option<DateTime<Utc>>,
    /// Recorded time measured when capture halted
    measured: Option<Duration>,
    /// Set once the capture backend has failed
    interrupted: Option<String>,
    level: f32,
}

impl RecordingSession {
    pub(crate) fn new(
        generation: u64,
        store: RecordStore,
        factory: Arc<dyn BackendFactory>,
        permission: Arc<dyn PermissionGate>,
        config: SessionConfig,
        reports: ReportSender,
    ) -> Self {
        let file_reference = store.new_file_reference();

        Self {
            generation,
            state: RecordingState::Idle,
            store,
            file_reference,
            name: None,
            factory,
            permission,
            config,
            reports,
            backend: None,
            sampler: None,
            started_at: None,
            measured: None,
            interrupted: None,
            level: 0.0,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn file_reference(&self) -> &str {
        &self.file_reference
    }

    pub fn target_path(&self) -> PathBuf {
        self.store.audio_path(&self.file_reference)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Label used when the recording is committed
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Last observed input level (0.0–1.0)
    pub fn level(&self) -> f32 {
        self.level
    }

    pub(crate) fn observe_level(&mut self, level: f32) {
        self.level = level;
    }

    /// Recorded time so far, excluding pauses
    pub async fn elapsed(&self) -> Duration {
        match &self.backend {
            Some(backend) => backend.lock().await.current_time(),
            None => self.measured.unwrap_or(Duration::ZERO),
        }
    }

    /// Begin capturing into the target file
    pub async fn start(&mut self) -> SessionResult<()> {
        if self.state != RecordingState::Idle {
            return Err(SessionError::invalid_state("start recording", self.state));
        }

        if !self.permission.request_microphone_access().await {
            warn!("Failed to get access to microphone");
            return Err(SessionError::PermissionDenied);
        }

        let mut backend = self
            .factory
            .capture_backend()
            .map_err(SessionError::DeviceUnavailable)?;

        let path = self.target_path();

        if let Err(e) = backend.open(&path, &self.config.capture).await {
            self.discard_audio();
            return Err(SessionError::DeviceUnavailable(e));
        }

        if let Err(e) = backend.record().await {
            if let Err(stop_err) = backend.stop().await {
                warn!("Failed to stop {} after failed start: {}", backend.name(), stop_err);
            }
            self.discard_audio();
            return Err(SessionError::DeviceUnavailable(e));
        }

        info!(
            "Recording session {} started: {} ({})",
            self.generation,
            path.display(),
            backend.name()
        );

        let backend: SharedCapture = Arc::new(Mutex::new(backend));
        self.sampler = Some(self.spawn_sampler(Arc::clone(&backend)));
        self.backend = Some(backend);
        self.started_at = Some(Utc::now());
        self.state = RecordingState::Recording;

        Ok(())
    }

    pub async fn pause(&mut self) -> SessionResult<()> {
        if self.state != RecordingState::Recording {
            return Err(SessionError::invalid_state("pause recording", self.state));
        }

        let backend = self.active_backend("pause recording")?;
        backend
            .lock()
            .await
            .pause()
            .await
            .map_err(SessionError::DeviceUnavailable)?;

        self.state = RecordingState::Paused;
        info!("Recording session {} paused", self.generation);

        Ok(())
    }

    pub async fn resume(&mut self) -> SessionResult<()> {
        if self.state != RecordingState::Paused {
            return Err(SessionError::invalid_state("resume recording", self.state));
        }

        let backend = self.active_backend("resume recording")?;
        backend
            .lock()
            .await
            .record()
            .await
            .map_err(SessionError::DeviceUnavailable)?;

        self.state = RecordingState::Recording;
        info!("Recording session {} resumed", self.generation);

        Ok(())
    }

    /// Halt capture and either save or drop the audio
    ///
    /// With `commit` and a non-empty name the recording is appended to the
    /// store and returned. Otherwise the audio file is removed and `None`
    /// returned. If saving fails the session stays in `Stopping` with its
    /// audio kept, and `stop` may be called again.
    pub async fn stop(&mut self, commit: bool) -> SessionResult<Option<StoredRecord>> {
        match self.state {
            RecordingState::Idle => {
                self.discard_audio();
                self.state = RecordingState::Discarded;
                return Ok(None);
            }
            RecordingState::Recording | RecordingState::Paused => self.halt().await?,
            // Halting never completed: the capture failed or its teardown was cut short
            RecordingState::Stopping if self.interrupted.is_some() || self.measured.is_none() => {
                let reason = self
                    .interrupted
                    .clone()
                    .unwrap_or_else(|| "capture stopped before it was measured".to_string());
                self.discard_audio();
                self.state = RecordingState::Discarded;
                warn!("Recording session {} discarded: {}", self.generation, reason);
                return Err(SessionError::SessionInterrupted(reason));
            }
            RecordingState::Stopping => {}
            RecordingState::Committed | RecordingState::Discarded => {
                return Err(SessionError::invalid_state("stop recording", self.state));
            }
        }

        let name = self
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        let name = match (commit, name) {
            (true, Some(name)) => name,
            _ => {
                self.discard_audio();
                self.state = RecordingState::Discarded;
                info!("Recording session {} discarded", self.generation);
                return Ok(None);
            }
        };

        let duration = self.measured.unwrap_or(Duration::ZERO);
        let record = StoredRecord::new(
            name,
            self.file_reference.clone(),
            self.started_at.unwrap_or_else(Utc::now),
        )
        .with_duration(duration);

        if let Err(e) = self.store.append(record.clone()) {
            error!("Failed to save record: {}", e);
            return Err(e);
        }

        self.state = RecordingState::Committed;
        info!(
            "Recording session {} committed \"{}\" ({:.1}s)",
            self.generation,
            record.name,
            duration.as_secs_f64()
        );

        Ok(Some(record))
    }

    /// Drop the recording whatever its state; used when a session is superseded
    pub(crate) async fn discard(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        if self.state.is_active() {
            if let Err(e) = self.halt().await {
                warn!("Recording session {} ended with: {}", self.generation, e);
            }
        }
        self.discard_audio();
        self.state = RecordingState::Discarded;
        info!("Recording session {} discarded", self.generation);
    }

    /// Tear down after a capture failure reported by the sampler
    pub(crate) async fn abort(&mut self, reason: &str) {
        error!("Recording session {} interrupted: {}", self.generation, reason);
        // Recorded before any await so a cancelled teardown is never committed
        self.interrupted = Some(reason.to_string());
        self.discard().await;
    }

    /// Stop sampling, stop the backend and release it
    async fn halt(&mut self) -> SessionResult<()> {
        self.state = RecordingState::Stopping;

        if let Some(sampler) = self.sampler.take() {
            sampler.stop();
        }

        let backend = match self.backend.take() {
            Some(backend) => backend,
            None => return Ok(()),
        };

        let mut backend = backend.lock().await;
        let failure = match backend.status() {
            CaptureStatus::Failed(reason) => Some(reason),
            _ => None,
        };
        let stopped = backend.stop().await;
        self.measured = Some(backend.current_time());
        drop(backend);

        let reason = match (failure, stopped) {
            (Some(reason), _) => reason,
            (None, Err(e)) => format!("{:#}", e),
            (None, Ok(())) => return Ok(()),
        };

        self.discard_audio();
        self.state = RecordingState::Discarded;
        Err(SessionError::SessionInterrupted(reason))
    }

    fn active_backend(&self, operation: &'static str) -> SessionResult<SharedCapture> {
        self.backend
            .clone()
            .ok_or_else(|| SessionError::invalid_state(operation, self.state))
    }

    fn spawn_sampler(&self, backend: SharedCapture) -> Sampler {
        Sampler::spawn(
            self.generation,
            self.config.progress_interval,
            self.reports.clone(),
            move || {
                let backend = Arc::clone(&backend);
                async move {
                    let backend = backend.lock().await;
                    match backend.status() {
                        CaptureStatus::Failed(reason) => ReportKind::RecordingFailed(reason),
                        _ => ReportKind::Recording {
                            elapsed: backend.current_time(),
                            power_db: backend.average_power(),
                        },
                    }
                }
            },
        )
    }

    fn discard_audio(&self) {
        if let Err(e) = self.store.discard_audio(&self.file_reference) {
            warn!("{:#}", e);
        }
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        if self.state.is_active() || self.state == RecordingState::Stopping {
            warn!(
                "Recording session {} dropped in state {:?}; {} left on disk",
                self.generation, self.state, self.file_reference
            );
        }
    }
}
