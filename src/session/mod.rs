//! Recording and playback sessions
//!
//! This module provides:
//! - `RecordingSession`: capture of one new note into the record store
//! - `PlaybackSession`: playback of one stored note
//! - `SessionCoordinator`: keeps at most one of them active and turns
//!   background progress samples into `SessionEvent`s

mod config;
mod coordinator;
mod events;
mod intent;
mod playback;
mod recording;
mod sampler;

pub use config::SessionConfig;
pub use coordinator::{ActiveSession, SessionCoordinator};
pub use events::{
    normalized_level, position_fraction, CompletionEvent, ErrorEvent, ProgressEvent, SessionEvent,
};
pub use intent::{Intent, IntentOutcome};
pub use playback::{PlaybackSession, PlaybackState};
pub use recording::{RecordingSession, RecordingState};
