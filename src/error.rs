//! Error taxonomy shared by the record store and the sessions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced to the presentation layer.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Microphone access was not granted")]
    PermissionDenied,

    #[error("Audio device unavailable: {0:#}")]
    DeviceUnavailable(anyhow::Error),

    #[error("Audio file missing or unreadable: {}: {cause:#}", path.display())]
    FileMissing { path: PathBuf, cause: anyhow::Error },

    #[error("Failed to persist records: {0:#}")]
    Persistence(anyhow::Error),

    #[error("Invalid state: can't {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("Session interrupted: {0}")]
    SessionInterrupted(String),
}

impl SessionError {
    pub fn invalid_state(operation: &'static str, state: impl std::fmt::Debug) -> Self {
        SessionError::InvalidState {
            operation,
            state: format!("{:?}", state),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::PermissionDenied => ErrorKind::PermissionDenied,
            SessionError::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            SessionError::FileMissing { .. } => ErrorKind::FileMissing,
            SessionError::Persistence(_) => ErrorKind::Persistence,
            SessionError::InvalidState { .. } => ErrorKind::InvalidState,
            SessionError::SessionInterrupted(_) => ErrorKind::SessionInterrupted,
        }
    }
}

/// Error category carried by error events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    PermissionDenied,
    DeviceUnavailable,
    FileMissing,
    Persistence,
    InvalidState,
    SessionInterrupted,
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;
