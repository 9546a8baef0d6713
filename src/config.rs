use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub audio: AudioConfig,
    pub session: SessionSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory; `~` and environment variables are expanded
    pub data_dir: String,
    /// Name of the metadata document inside `data_dir`
    pub storage_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub buffer_duration_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    pub progress_interval_ms: u64,
    pub skip_seconds: f64,
}

impl StorageConfig {
    pub fn data_dir(&self) -> Result<PathBuf> {
        let expanded = shellexpand::full(&self.data_dir)
            .with_context(|| format!("Failed to expand data_dir {:?}", self.data_dir))?;
        Ok(PathBuf::from(expanded.as_ref()))
    }
}

impl Config {
    /// Load from an optional config file, overridden by `AUDIO_NOTES__*`
    /// environment variables (e.g. `AUDIO_NOTES__STORAGE__DATA_DIR`)
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .set_default("storage.data_dir", "~/.audio-notes")?
            .set_default("storage.storage_key", "records")?
            .set_default("audio.sample_rate", 44100)?
            .set_default("audio.channels", 1)?
            .set_default("audio.buffer_duration_ms", 100)?
            .set_default("session.progress_interval_ms", 1000)?
            .set_default("session.skip_seconds", 15.0)?
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("AUDIO_NOTES")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() -> Result<()> {
        let cfg = Config::load("does/not/exist/audio-notes")?;

        assert_eq!(cfg.storage.storage_key, "records");
        assert_eq!(cfg.audio.sample_rate, 44100);
        assert_eq!(cfg.audio.channels, 1);
        assert_eq!(cfg.session.progress_interval_ms, 1000);
        assert_eq!(cfg.session.skip_seconds, 15.0);

        Ok(())
    }

    #[test]
    fn test_data_dir_expands_tilde() -> Result<()> {
        let storage = StorageConfig {
            data_dir: "~/notes".to_string(),
            storage_key: "records".to_string(),
        };

        let dir = storage.data_dir()?;
        assert!(!dir.to_string_lossy().starts_with('~'));
        assert!(dir.ends_with("notes"));

        Ok(())
    }
}
