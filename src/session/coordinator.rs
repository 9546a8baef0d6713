use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::config::SessionConfig;
use super::events::{
    normalized_level, position_fraction, CompletionEvent, ErrorEvent, ProgressEvent, SessionEvent,
};
use super::intent::{Intent, IntentOutcome};
use super::playback::{PlaybackSession, PlaybackState};
use super::recording::{RecordingSession, RecordingState};
use super::sampler::{Report, ReportKind, ReportSender};
use crate::audio::{BackendFactory, PermissionGate};
use crate::error::{SessionError, SessionResult};
use crate::store::{RecordStore, StoredRecord};

/// Capacity of the event fan-out; slow subscribers miss old progress events
const EVENT_CAPACITY: usize = 64;

/// The one session allowed to hold the audio backend
pub enum ActiveSession {
    Recording(RecordingSession),
    Playback(PlaybackSession),
}

impl ActiveSession {
    pub fn generation(&self) -> u64 {
        match self {
            ActiveSession::Recording(session) => session.generation(),
            ActiveSession::Playback(session) => session.generation(),
        }
    }
}

/// Owner of the active session
///
/// Guarantees that at most one recording or playback exists at a time:
/// requesting one tears the other down first. Progress from background
/// samplers is applied and fanned out on the caller's task through
/// [`SessionCoordinator::next_event`].
pub struct SessionCoordinator {
    store: RecordStore,
    factory: Arc<dyn BackendFactory>,
    permission: Arc<dyn PermissionGate>,
    config: SessionConfig,
    active: Option<ActiveSession>,
    last_generation: u64,
    reports_tx: ReportSender,
    reports_rx: mpsc::UnboundedReceiver<Report>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionCoordinator {
    pub fn new(
        store: RecordStore,
        factory: Arc<dyn BackendFactory>,
        permission: Arc<dyn PermissionGate>,
        config: SessionConfig,
    ) -> Self {
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            store,
            factory,
            permission,
            config,
            active: None,
            last_generation: 0,
            reports_tx,
            reports_rx,
            events,
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Records offered for playback, newest first
    pub fn records(&self) -> Vec<StoredRecord> {
        self.store.playable()
    }

    /// Receive progress, completion and error events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn active(&self) -> Option<&ActiveSession> {
        self.active.as_ref()
    }

    pub fn recording(&mut self) -> Option<&mut RecordingSession> {
        match self.active.as_mut() {
            Some(ActiveSession::Recording(session)) => Some(session),
            _ => None,
        }
    }

    pub fn playback(&mut self) -> Option<&mut PlaybackSession> {
        match self.active.as_mut() {
            Some(ActiveSession::Playback(session)) => Some(session),
            _ => None,
        }
    }

    /// Get the recording session, creating one if none is in flight
    ///
    /// Any playback is stopped first. An unfinished recording is returned as
    /// is rather than replaced.
    pub async fn request_recording(&mut self) -> SessionResult<&mut RecordingSession> {
        let in_flight = matches!(
            &self.active,
            Some(ActiveSession::Recording(session)) if !session.state().is_terminal()
        );

        if !in_flight {
            self.release_active().await;

            let session = RecordingSession::new(
                self.next_generation(),
                self.store.clone(),
                Arc::clone(&self.factory),
                Arc::clone(&self.permission),
                self.config.clone(),
                self.reports_tx.clone(),
            );
            info!("New recording session {}", session.generation());
            self.active = Some(ActiveSession::Recording(session));
        }

        self.require_recording("request recording")
    }

    /// Request a recording, name it and start capturing
    pub async fn start_recording(&mut self, name: Option<String>) -> SessionResult<()> {
        let session = self.request_recording().await?;
        if let Some(name) = name {
            session.set_name(name);
        }

        if session.state() != RecordingState::Idle {
            return Err(SessionError::invalid_state("start recording", session.state()));
        }

        if let Err(e) = session.start().await {
            self.release_active().await;
            return Err(e);
        }

        Ok(())
    }

    pub async fn pause_recording(&mut self) -> SessionResult<()> {
        self.require_recording("pause recording")?.pause().await
    }

    pub async fn resume_recording(&mut self) -> SessionResult<()> {
        self.require_recording("resume recording")?.resume().await
    }

    /// Stop the recording, committing it to the store when asked
    ///
    /// A failed save keeps the session so the stop can be retried.
    pub async fn stop_recording(&mut self, commit: bool) -> SessionResult<Option<StoredRecord>> {
        let result = self.require_recording("stop recording")?.stop(commit).await;

        match &result {
            Err(SessionError::Persistence(_)) => {}
            _ => self.active = None,
        }

        result
    }

    /// Play `record`, superseding whatever session is active
    ///
    /// A recording in progress is discarded, never saved. Requesting the
    /// record that is already playing keeps it going; if it is paused it
    /// resumes.
    pub async fn request_playback(&mut self, record: &StoredRecord) -> SessionResult<&mut PlaybackSession> {
        let same_record = matches!(
            &self.active,
            Some(ActiveSession::Playback(session))
                if session.record().file_reference == record.file_reference
                    && !session.state().is_terminal()
        );

        if same_record {
            let session = self.require_playback("request playback")?;
            match session.state() {
                PlaybackState::Paused => session.resume().await?,
                PlaybackState::Idle => session.start().await?,
                _ => {}
            }
            return self.require_playback("request playback");
        }

        self.release_active().await;

        let mut session = PlaybackSession::new(
            self.next_generation(),
            record.clone(),
            &self.store,
            Arc::clone(&self.factory),
            self.config.clone(),
            self.reports_tx.clone(),
        )?;
        session.start().await?;
        self.active = Some(ActiveSession::Playback(session));

        self.require_playback("request playback")
    }

    /// Play the record at `index` of [`records`](Self::records)
    pub async fn play(&mut self, index: usize) -> SessionResult<&mut PlaybackSession> {
        let record = self.playable_at(index)?;
        self.request_playback(&record).await
    }

    pub async fn pause_playback(&mut self) -> SessionResult<()> {
        self.require_playback("pause playback")?.pause().await
    }

    pub async fn resume_playback(&mut self) -> SessionResult<()> {
        self.require_playback("resume playback")?.resume().await
    }

    pub async fn seek(&mut self, fraction: f64) -> SessionResult<()> {
        self.require_playback("seek")?.seek(fraction).await.map(|_| ())
    }

    pub async fn skip_forward(&mut self) -> SessionResult<()> {
        let step = self.config.skip.as_secs_f64();
        self.require_playback("skip forward")?.seek_relative(step).await.map(|_| ())
    }

    pub async fn skip_backward(&mut self) -> SessionResult<()> {
        let step = self.config.skip.as_secs_f64();
        self.require_playback("skip backward")?.seek_relative(-step).await.map(|_| ())
    }

    pub async fn stop_playback(&mut self) -> SessionResult<()> {
        if let Some(session) = self.playback() {
            session.stop().await?;
            self.active = None;
        }
        Ok(())
    }

    /// Delete the record at `index` of [`records`](Self::records)
    ///
    /// Playback of that record is stopped first.
    pub async fn delete(&mut self, index: usize) -> SessionResult<StoredRecord> {
        let record = self.playable_at(index)?;

        let playing_it = matches!(
            &self.active,
            Some(ActiveSession::Playback(session))
                if session.record().file_reference == record.file_reference
        );
        if playing_it {
            self.release_active().await;
        }

        let store_index = self
            .store
            .list()
            .iter()
            .position(|r| r.file_reference == record.file_reference)
            .ok_or_else(|| SessionError::InvalidState {
                operation: "delete a record",
                state: format!("\"{}\" is no longer stored", record.name),
            })?;

        self.store.delete(store_index)
    }

    /// Apply a user intent, broadcasting any failure as an error event
    pub async fn handle(&mut self, intent: Intent) -> SessionResult<IntentOutcome> {
        debug!("Handling {:?}", intent);

        let result = match intent {
            Intent::StartRecording { name } => self.start_recording(name).await.map(|_| IntentOutcome::Done),
            Intent::RenameRecording(name) => self
                .require_recording("rename recording")
                .map(|session| session.set_name(name))
                .map(|_| IntentOutcome::Done),
            Intent::PauseRecording => self.pause_recording().await.map(|_| IntentOutcome::Done),
            Intent::ResumeRecording => self.resume_recording().await.map(|_| IntentOutcome::Done),
            Intent::StopRecording { commit } => self.stop_recording(commit).await.map(IntentOutcome::Saved),
            Intent::Play { index } => self.play(index).await.map(|_| IntentOutcome::Done),
            Intent::PausePlayback => self.pause_playback().await.map(|_| IntentOutcome::Done),
            Intent::ResumePlayback => self.resume_playback().await.map(|_| IntentOutcome::Done),
            Intent::Seek { fraction } => self.seek(fraction).await.map(|_| IntentOutcome::Done),
            Intent::SkipForward => self.skip_forward().await.map(|_| IntentOutcome::Done),
            Intent::SkipBackward => self.skip_backward().await.map(|_| IntentOutcome::Done),
            Intent::StopPlayback => self.stop_playback().await.map(|_| IntentOutcome::Done),
            Intent::Delete { index } => self.delete(index).await.map(IntentOutcome::Deleted),
        };

        if let Err(e) = &result {
            warn!("{}", e);
            self.publish(SessionEvent::Error(ErrorEvent::from(e)));
        }

        result
    }

    /// Wait for the next event of the active session
    ///
    /// Reports from sessions that have since ended are dropped. Completion and
    /// interruption are applied to the session before the event is returned
    /// and broadcast. Cancel safe while waiting. A call cancelled while
    /// applying may leave a teardown half done: an interrupted recording then
    /// stays `Stopping` and is discarded by the next stop, and a finished
    /// playback is released by the next request or shutdown.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            // The coordinator holds a sender, so this only ends at shutdown
            let report = self.reports_rx.recv().await?;
            if let Some(event) = self.apply(report).await {
                self.publish(event.clone());
                return Some(event);
            }
        }
    }

    /// Apply every report already queued without waiting
    pub async fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(report) = self.reports_rx.try_recv() {
            if let Some(event) = self.apply(report).await {
                self.publish(event.clone());
                events.push(event);
            }
        }
        events
    }

    /// Release the active session: a recording is discarded, playback stopped
    pub async fn shutdown(mut self) {
        self.release_active().await;
        info!("Session coordinator shut down");
    }

    async fn apply(&mut self, report: Report) -> Option<SessionEvent> {
        let current = self.active.as_ref().map(ActiveSession::generation);
        if current != Some(report.generation) {
            debug!("Dropping stale report from session {}", report.generation);
            return None;
        }

        let mut release = false;

        let event = match (self.active.as_mut(), report.kind) {
            (Some(ActiveSession::Recording(session)), ReportKind::Recording { elapsed, power_db }) => {
                if session.state() != RecordingState::Recording {
                    return None;
                }
                let level = normalized_level(power_db);
                session.observe_level(level);
                Some(SessionEvent::Progress(ProgressEvent::Recording { elapsed, level }))
            }
            (Some(ActiveSession::Recording(session)), ReportKind::RecordingFailed(reason)) => {
                if !session.state().is_active() {
                    return None;
                }
                session.abort(&reason).await;
                release = true;
                Some(SessionEvent::Error(ErrorEvent::from(
                    &SessionError::SessionInterrupted(reason),
                )))
            }
            (Some(ActiveSession::Playback(session)), ReportKind::Playback { elapsed, epoch }) => {
                if !matches!(session.state(), PlaybackState::Playing | PlaybackState::Paused) {
                    return None;
                }
                if epoch != session.epoch() {
                    debug!("Dropping reading taken before a seek");
                    return None;
                }
                let duration = session.duration();
                let elapsed = elapsed.min(duration);
                Some(SessionEvent::Progress(ProgressEvent::Playback {
                    elapsed,
                    position: position_fraction(elapsed, duration),
                    remaining: duration - elapsed,
                }))
            }
            (Some(ActiveSession::Playback(session)), ReportKind::PlaybackFinished { epoch }) => {
                if epoch != session.epoch() || !session.finish().await {
                    return None;
                }
                release = true;
                Some(SessionEvent::Completed(CompletionEvent {
                    record: session.record().clone(),
                }))
            }
            (_, kind) => {
                debug!("Ignoring mismatched report {:?}", kind);
                None
            }
        };

        if release {
            self.active = None;
        }

        event
    }

    async fn release_active(&mut self) {
        match self.active.take() {
            Some(ActiveSession::Recording(mut session)) => session.discard().await,
            Some(ActiveSession::Playback(mut session)) => {
                if let Err(e) = session.stop().await {
                    warn!("Failed to stop playback session {}: {}", session.generation(), e);
                }
            }
            None => {}
        }
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine; next_event callers still get the event
        let _ = self.events.send(event);
    }

    fn next_generation(&mut self) -> u64 {
        self.last_generation += 1;
        self.last_generation
    }

    fn playable_at(&self, index: usize) -> SessionResult<StoredRecord> {
        let records = self.records();
        let count = records.len();
        records.into_iter().nth(index).ok_or_else(|| SessionError::InvalidState {
            operation: "select a record",
            state: format!("index {} is out of range for {} records", index, count),
        })
    }

    fn require_recording(&mut self, operation: &'static str) -> SessionResult<&mut RecordingSession> {
        self.recording().ok_or_else(|| SessionError::InvalidState {
            operation,
            state: "no recording is active".to_string(),
        })
    }

    fn require_playback(&mut self, operation: &'static str) -> SessionResult<&mut PlaybackSession> {
        self.playback().ok_or_else(|| SessionError::InvalidState {
            operation,
            state: "no playback is active".to_string(),
        })
    }
}
