// Shared fakes for session tests
//
// The fake backends keep their state in a control block the test holds on to,
// so a test can move the capture clock, inject failures or end playback.

#![allow(dead_code)]

use anyhow::{bail, Result};
use audio_notes::{
    BackendFactory, CaptureBackend, CaptureSettings, CaptureStatus, PermissionGate,
    PlaybackBackend, PlaybackStatus, RecordStore, SessionConfig, SessionCoordinator, SessionEvent,
    StaticPermission, StoredRecord,
};
use chrono::{Duration as ChronoDuration, Utc};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const TICK: Duration = Duration::from_millis(10);

#[derive(Debug)]
pub struct CaptureState {
    pub elapsed: Duration,
    pub power_db: f32,
    pub status: CaptureStatus,
    pub opened: Option<PathBuf>,
    pub fail_open: bool,
    /// Make `stop` hang until the caller gives up
    pub hold_stop: bool,
    pub stops: usize,
}

/// Test handle on the fake capture hardware
pub struct CaptureControl(Mutex<CaptureState>);

impl CaptureControl {
    fn new() -> Arc<Self> {
        Arc::new(Self(Mutex::new(CaptureState {
            elapsed: Duration::ZERO,
            power_db: -160.0,
            status: CaptureStatus::Idle,
            opened: None,
            fail_open: false,
            hold_stop: false,
            stops: 0,
        })))
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, CaptureState> {
        self.0.lock().unwrap()
    }

    /// Move the capture clock; only recorded time counts
    pub fn advance(&self, by: Duration) {
        let mut state = self.state();
        if state.status == CaptureStatus::Recording {
            state.elapsed += by;
        }
    }

    pub fn set_power(&self, power_db: f32) {
        self.state().power_db = power_db;
    }

    pub fn fail(&self, reason: &str) {
        self.state().status = CaptureStatus::Failed(reason.to_string());
    }
}

pub struct FakeCapture {
    control: Arc<CaptureControl>,
}

#[async_trait::async_trait]
impl CaptureBackend for FakeCapture {
    async fn open(&mut self, path: &Path, _settings: &CaptureSettings) -> Result<()> {
        let mut state = self.control.state();
        if state.fail_open {
            bail!("no input device");
        }
        std::fs::write(path, b"RIFF")?;
        state.opened = Some(path.to_path_buf());
        state.elapsed = Duration::ZERO;
        state.status = CaptureStatus::Idle;
        Ok(())
    }

    async fn record(&mut self) -> Result<()> {
        self.control.state().status = CaptureStatus::Recording;
        Ok(())
    }

    async fn pause(&mut self) -> Result<()> {
        self.control.state().status = CaptureStatus::Paused;
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let hold = self.control.state().hold_stop;
        if hold {
            std::future::pending::<()>().await;
        }

        let mut state = self.control.state();
        if !matches!(state.status, CaptureStatus::Failed(_)) {
            state.status = CaptureStatus::Stopped;
        }
        state.stops += 1;
        Ok(())
    }

    fn current_time(&self) -> Duration {
        self.control.state().elapsed
    }

    fn average_power(&self) -> f32 {
        self.control.state().power_db
    }

    fn status(&self) -> CaptureStatus {
        self.control.state().status.clone()
    }

    fn name(&self) -> &str {
        "fake-capture"
    }
}

#[derive(Debug)]
pub struct PlayerState {
    pub position: Duration,
    pub length: Duration,
    pub status: PlaybackStatus,
    pub opened: Option<PathBuf>,
    pub fail_play: bool,
    pub stops: usize,
}

/// Test handle on the fake playback hardware
pub struct PlaybackControl(Mutex<PlayerState>);

impl PlaybackControl {
    fn new() -> Arc<Self> {
        Arc::new(Self(Mutex::new(PlayerState {
            position: Duration::ZERO,
            length: Duration::ZERO,
            status: PlaybackStatus::Idle,
            opened: None,
            fail_play: false,
            stops: 0,
        })))
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, PlayerState> {
        self.0.lock().unwrap()
    }

    /// Play head reaches the end of the track
    pub fn finish(&self) {
        let mut state = self.state();
        state.position = state.length;
        state.status = PlaybackStatus::Finished;
    }
}

pub struct FakePlayback {
    control: Arc<PlaybackControl>,
}

#[async_trait::async_trait]
impl PlaybackBackend for FakePlayback {
    async fn open(&mut self, path: &Path) -> Result<Duration> {
        if !path.exists() {
            bail!("{} does not exist", path.display());
        }
        let mut state = self.control.state();
        state.opened = Some(path.to_path_buf());
        state.position = Duration::ZERO;
        state.length = Duration::from_secs(60);
        state.status = PlaybackStatus::Paused;
        Ok(state.length)
    }

    async fn play(&mut self) -> Result<()> {
        let mut state = self.control.state();
        if state.fail_play {
            bail!("output device busy");
        }
        state.status = PlaybackStatus::Playing;
        Ok(())
    }

    async fn pause(&mut self) -> Result<()> {
        self.control.state().status = PlaybackStatus::Paused;
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let mut state = self.control.state();
        state.status = PlaybackStatus::Stopped;
        state.stops += 1;
        Ok(())
    }

    fn position(&self) -> Duration {
        self.control.state().position
    }

    fn set_position(&mut self, position: Duration) {
        self.control.state().position = position;
    }

    fn status(&self) -> PlaybackStatus {
        self.control.state().status
    }

    fn name(&self) -> &str {
        "fake-playback"
    }
}

pub struct FakeFactory {
    pub capture: Arc<CaptureControl>,
    pub playback: Arc<PlaybackControl>,
}

impl BackendFactory for FakeFactory {
    fn capture_backend(&self) -> Result<Box<dyn CaptureBackend>> {
        Ok(Box::new(FakeCapture {
            control: Arc::clone(&self.capture),
        }))
    }

    fn playback_backend(&self) -> Result<Box<dyn PlaybackBackend>> {
        Ok(Box::new(FakePlayback {
            control: Arc::clone(&self.playback),
        }))
    }
}

/// A coordinator over fake hardware and a store in a temp dir
pub struct Harness {
    pub dir: TempDir,
    pub store: RecordStore,
    pub capture: Arc<CaptureControl>,
    pub playback: Arc<PlaybackControl>,
    pub coordinator: SessionCoordinator,
}

pub fn harness() -> Result<Harness> {
    harness_with_permission(StaticPermission(true))
}

pub fn harness_with_permission(permission: impl PermissionGate + 'static) -> Result<Harness> {
    let dir = TempDir::new()?;
    let store = RecordStore::open(dir.path(), "records")?;
    let capture = CaptureControl::new();
    let playback = PlaybackControl::new();

    let factory = Arc::new(FakeFactory {
        capture: Arc::clone(&capture),
        playback: Arc::clone(&playback),
    });
    let config = SessionConfig {
        progress_interval: TICK,
        ..SessionConfig::default()
    };
    let coordinator = SessionCoordinator::new(store.clone(), factory, Arc::new(permission), config);

    Ok(Harness {
        dir,
        store,
        capture,
        playback,
        coordinator,
    })
}

/// Store a record with a backing file, as a finished recording would
pub fn seed_record(store: &RecordStore, name: &str, seconds: f64) -> Result<StoredRecord> {
    let file_reference = store.new_file_reference();
    std::fs::write(store.audio_path(&file_reference), b"RIFF")?;

    // Older records first so list order is predictable
    let created_at = Utc::now() - ChronoDuration::seconds(60);
    let record = StoredRecord::new(name, file_reference, created_at)
        .with_duration(Duration::from_secs_f64(seconds));
    store.append(record.clone())?;

    Ok(record)
}

/// Next event from the coordinator, failing the test after a second
pub async fn next_event(coordinator: &mut SessionCoordinator) -> Result<SessionEvent> {
    match tokio::time::timeout(Duration::from_secs(1), coordinator.next_event()).await {
        Ok(Some(event)) => Ok(event),
        Ok(None) => bail!("event channel closed"),
        Err(_) => bail!("no event within a second"),
    }
}
