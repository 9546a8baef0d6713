use anyhow::Result;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;

use super::player::ClockPlayer;
use super::recorder::WavRecorder;
use super::signal::{Signal, SignalInput};

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Duration covered by this frame
    pub fn duration(&self) -> Duration {
        let per_second = self.sample_rate as f64 * self.channels.max(1) as f64;
        if per_second <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / per_second)
    }
}

/// Capture format shared by inputs and recorders
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count (1 = mono, 2 = stereo)
    pub channels: u16,
    /// Buffer size in milliseconds (affects latency)
    pub buffer_duration_ms: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            sample_rate: 44100, // voice notes, CD rate
            channels: 1,        // Mono
            buffer_duration_ms: 100,
        }
    }
}

/// Audio input trait
///
/// A source of PCM frames, such as a microphone stream or a synthetic signal.
#[async_trait::async_trait]
pub trait AudioInput: Send + Sync {
    /// Start producing audio
    ///
    /// Returns a channel receiver that will receive audio frames. The channel
    /// closes when the input stops or fails.
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop producing audio
    async fn stop(&mut self) -> Result<()>;

    /// Check if input is currently producing frames
    fn is_capturing(&self) -> bool;

    /// Get input name for logging
    fn name(&self) -> &str;
}

/// Observed state of a capture backend
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureStatus {
    Idle,
    Recording,
    Paused,
    Stopped,
    /// Capture broke down while active
    Failed(String),
}

/// Capture backend trait
///
/// Owns the hardware side of one recording: opens the target file, captures
/// into it and exposes metering.
#[async_trait::async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Prepare capture into `path`
    async fn open(&mut self, path: &Path, settings: &CaptureSettings) -> Result<()>;

    /// Start or resume capturing
    async fn record(&mut self) -> Result<()>;

    /// Pause capturing; recorded time stops advancing
    async fn pause(&mut self) -> Result<()>;

    /// Stop capturing and finalize the file
    async fn stop(&mut self) -> Result<()>;

    /// Cumulative recorded time, excluding paused periods
    fn current_time(&self) -> Duration;

    /// Average input power of the most recent buffer in dBFS
    fn average_power(&self) -> f32;

    fn status(&self) -> CaptureStatus;

    fn name(&self) -> &str;
}

/// Observed state of a playback backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Idle,
    Playing,
    Paused,
    /// Reached the end of the track
    Finished,
    Stopped,
}

/// Playback backend trait
#[async_trait::async_trait]
pub trait PlaybackBackend: Send + Sync {
    /// Open the audio file, returning its length
    async fn open(&mut self, path: &Path) -> Result<Duration>;

    async fn play(&mut self) -> Result<()>;

    async fn pause(&mut self) -> Result<()>;

    async fn stop(&mut self) -> Result<()>;

    fn position(&self) -> Duration;

    fn set_position(&mut self, position: Duration);

    fn status(&self) -> PlaybackStatus;

    fn name(&self) -> &str;
}

/// Creates fresh backends for each session
pub trait BackendFactory: Send + Sync {
    fn capture_backend(&self) -> Result<Box<dyn CaptureBackend>>;

    fn playback_backend(&self) -> Result<Box<dyn PlaybackBackend>>;
}

/// Audio source type
#[derive(Debug, Clone, PartialEq)]
pub enum AudioSource {
    /// Digital silence
    Silence,
    /// Sine tone at the given frequency in Hz
    Tone(f32),
    /// Default system input and output devices
    Device,
}

impl Default for AudioSource {
    fn default() -> Self {
        if cfg!(feature = "device") {
            AudioSource::Device
        } else {
            AudioSource::Silence
        }
    }
}

/// Default backend factory
///
/// Records into WAV files. With `AudioSource::Device` it captures from the
/// microphone and plays through the speakers; the built-in signals pair with
/// the clock-driven player.
pub struct AudioBackendFactory {
    source: AudioSource,
    settings: CaptureSettings,
}

impl AudioBackendFactory {
    pub fn new(source: AudioSource, settings: CaptureSettings) -> Self {
        Self { source, settings }
    }

    /// Create audio input based on configuration
    pub fn create_input(&self) -> Result<Box<dyn AudioInput>> {
        let signal = match self.source {
            AudioSource::Silence => Signal::Silence,
            AudioSource::Device => return device_input(&self.settings),
            AudioSource::Tone(frequency_hz) => {
                if !(frequency_hz > 0.0) || frequency_hz >= self.settings.sample_rate as f32 / 2.0 {
                    anyhow::bail!("Tone frequency {} Hz is outside the audible band", frequency_hz);
                }
                Signal::Sine {
                    frequency_hz,
                    amplitude: 0.5,
                }
            }
        };

        Ok(Box::new(SignalInput::new(signal, self.settings.clone())))
    }
}

impl BackendFactory for AudioBackendFactory {
    fn capture_backend(&self) -> Result<Box<dyn CaptureBackend>> {
        let input = self.create_input()?;
        Ok(Box::new(WavRecorder::new(input)))
    }

    fn playback_backend(&self) -> Result<Box<dyn PlaybackBackend>> {
        match self.source {
            AudioSource::Device => device_player(),
            _ => Ok(Box::new(ClockPlayer::new())),
        }
    }
}

#[cfg(feature = "device")]
fn device_input(settings: &CaptureSettings) -> Result<Box<dyn AudioInput>> {
    Ok(Box::new(super::device::DeviceInput::new(settings.clone())))
}

#[cfg(not(feature = "device"))]
fn device_input(_settings: &CaptureSettings) -> Result<Box<dyn AudioInput>> {
    anyhow::bail!("Audio devices need a build with the `device` feature")
}

#[cfg(feature = "device")]
fn device_player() -> Result<Box<dyn PlaybackBackend>> {
    Ok(Box::new(super::device::DevicePlayer::new()))
}

#[cfg(not(feature = "device"))]
fn device_player() -> Result<Box<dyn PlaybackBackend>> {
    anyhow::bail!("Audio devices need a build with the `device` feature")
}
