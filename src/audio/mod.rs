pub mod backend;
#[cfg(feature = "device")]
pub mod device;
pub mod file;
pub mod permission;
pub mod player;
pub mod recorder;
pub mod signal;

pub use backend::{
    AudioBackendFactory, AudioFrame, AudioInput, AudioSource, BackendFactory, CaptureBackend,
    CaptureSettings, CaptureStatus, PlaybackBackend, PlaybackStatus,
};
#[cfg(feature = "device")]
pub use device::{DeviceInput, DevicePlayer};
pub use file::AudioFile;
pub use permission::{PermissionGate, StaticPermission};
pub use player::ClockPlayer;
pub use recorder::{average_power_db, WavRecorder, SILENCE_DB};
pub use signal::{Signal, SignalInput};
