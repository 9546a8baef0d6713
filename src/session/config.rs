use std::time::Duration;
use tracing::warn;

use crate::audio::CaptureSettings;
use crate::config::Config;

const DEFAULT_SKIP: Duration = Duration::from_secs(15);

/// Configuration shared by the sessions a coordinator creates
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Capture format for new recordings
    pub capture: CaptureSettings,

    /// How often active sessions sample progress
    /// Default: 1 second
    pub progress_interval: Duration,

    /// Step used by skip forward/backward
    /// Default: 15 seconds
    pub skip: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capture: CaptureSettings::default(),
            progress_interval: Duration::from_secs(1),
            skip: DEFAULT_SKIP,
        }
    }
}

impl From<&Config> for SessionConfig {
    fn from(config: &Config) -> Self {
        Self {
            capture: CaptureSettings {
                sample_rate: config.audio.sample_rate,
                channels: config.audio.channels,
                buffer_duration_ms: config.audio.buffer_duration_ms,
            },
            // A zero interval would make the sampler spin
            progress_interval: Duration::from_millis(config.session.progress_interval_ms.max(1)),
            skip: Duration::try_from_secs_f64(config.session.skip_seconds)
                .unwrap_or_else(|_| {
                    warn!(
                        "Ignoring skip_seconds = {}; using {:?}",
                        config.session.skip_seconds, DEFAULT_SKIP
                    );
                    DEFAULT_SKIP
                }),
        }
    }
}
