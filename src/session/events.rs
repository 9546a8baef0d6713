use std::time::Duration;

use crate::error::{ErrorKind, SessionError};
use crate::store::StoredRecord;

/// Lowest input power shown as a non-zero level, in dBFS
const LEVEL_FLOOR_DB: f32 = -50.0;

/// Map input power in dBFS onto a 0.0–1.0 level
///
/// Linear in decibels between -50 dB and 0 dB, clamped outside.
pub fn normalized_level(power_db: f32) -> f32 {
    if power_db.is_nan() {
        return 0.0;
    }
    ((power_db - LEVEL_FLOOR_DB) / -LEVEL_FLOOR_DB).clamp(0.0, 1.0)
}

/// Fraction of `duration` covered by `elapsed`, clamped to 0.0–1.0
pub fn position_fraction(elapsed: Duration, duration: Duration) -> f64 {
    if duration.is_zero() {
        return 0.0;
    }
    (elapsed.as_secs_f64() / duration.as_secs_f64()).clamp(0.0, 1.0)
}

/// Periodic progress of the active session
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Recording {
        elapsed: Duration,
        /// Normalized input level
        level: f32,
    },
    Playback {
        elapsed: Duration,
        /// Fraction of the track played
        position: f64,
        remaining: Duration,
    },
}

/// A playback reached the end of its track
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionEvent {
    pub record: StoredRecord,
}

/// A failure the user should be told about
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEvent {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&SessionError> for ErrorEvent {
    fn from(err: &SessionError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Progress(ProgressEvent),
    Completed(CompletionEvent),
    Error(ErrorEvent),
}
