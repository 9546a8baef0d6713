use anyhow::{Context, Result};
use hound::WavReader;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Format and length of a stored WAV file
#[derive(Debug, Clone)]
pub struct AudioFile {
    pub path: String,
    pub duration: Duration,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFile {
    /// Read the WAV header without decoding samples
    pub fn probe(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let reader = WavReader::open(path)
            .with_context(|| format!("Failed to open WAV file: {}", path.display()))?;

        let spec = reader.spec();
        // hound reports length in frames (samples per channel)
        let frames = reader.duration();
        let duration = if spec.sample_rate == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(frames as f64 / spec.sample_rate as f64)
        };

        debug!(
            "Probed {}: {:.1}s, {}Hz, {} channels",
            path.display(),
            duration.as_secs_f64(),
            spec.sample_rate,
            spec.channels
        );

        Ok(Self {
            path: path.display().to_string(),
            duration,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
        })
    }
}
