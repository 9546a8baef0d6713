pub mod audio;
pub mod config;
pub mod error;
pub mod session;
pub mod store;

pub use audio::{
    AudioBackendFactory, AudioFile, AudioFrame, AudioInput, AudioSource, BackendFactory,
    CaptureBackend, CaptureSettings, CaptureStatus, PermissionGate, PlaybackBackend,
    PlaybackStatus, StaticPermission,
};
pub use config::Config;
pub use error::{ErrorKind, SessionError, SessionResult};
pub use session::{
    Intent, IntentOutcome, PlaybackSession, PlaybackState, ProgressEvent, RecordingSession,
    RecordingState, SessionConfig, SessionCoordinator, SessionEvent,
};
pub use store::{format_clock, RecordStore, StoredRecord};
