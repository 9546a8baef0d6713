use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use super::record::StoredRecord;
use crate::config::StorageConfig;
use crate::error::{SessionError, SessionResult};

/// Subdirectory holding one audio file per record
const AUDIO_DIR: &str = "audio";

/// Persistent list of recordings
///
/// Metadata lives in a single JSON array (`<data_dir>/<storage_key>.json`),
/// newest first; audio files live under `<data_dir>/audio/`. Access is
/// single-writer.
#[derive(Debug, Clone)]
pub struct RecordStore {
    audio_dir: PathBuf,
    index_path: PathBuf,
}

impl RecordStore {
    /// Open (creating if needed) a store rooted at `data_dir`
    pub fn open(data_dir: impl AsRef<Path>, storage_key: &str) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let audio_dir = data_dir.join(AUDIO_DIR);

        fs::create_dir_all(&audio_dir)
            .with_context(|| format!("Failed to create audio directory {:?}", audio_dir))?;

        let store = Self {
            audio_dir,
            index_path: data_dir.join(format!("{}.json", storage_key)),
        };

        info!("Record store opened at {}", data_dir.display());

        Ok(store)
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        Self::open(config.data_dir()?, &config.storage_key)
    }

    /// All records, newest first
    ///
    /// Unreadable metadata is logged and treated as an empty store.
    pub fn list(&self) -> Vec<StoredRecord> {
        match self.load() {
            Ok(records) => records,
            Err(e) => {
                warn!("Failed to fetch records: {:#}", e);
                Vec::new()
            }
        }
    }

    /// Records that can be offered for playback
    pub fn playable(&self) -> Vec<StoredRecord> {
        self.list().into_iter().filter(StoredRecord::is_playable).collect()
    }

    /// Insert a finished record at the front and persist the collection
    pub fn append(&self, record: StoredRecord) -> SessionResult<()> {
        if record.name.trim().is_empty() {
            return Err(SessionError::InvalidState {
                operation: "save a record",
                state: "its name is empty".to_string(),
            });
        }
        if !record.is_playable() {
            return Err(SessionError::InvalidState {
                operation: "save a record",
                state: "its duration is unknown".to_string(),
            });
        }

        let mut records = self.load().map_err(SessionError::Persistence)?;
        let name = record.name.clone();
        records.insert(0, record);

        self.persist(&records).map_err(SessionError::Persistence)?;

        info!("Saved record \"{}\" ({} total)", name, records.len());

        Ok(())
    }

    /// Remove the record at `index` together with its audio file
    ///
    /// Either both the audio file and the metadata entry are gone afterwards,
    /// or neither is.
    pub fn delete(&self, index: usize) -> SessionResult<StoredRecord> {
        let mut records = self.load().map_err(SessionError::Persistence)?;

        if index >= records.len() {
            return Err(SessionError::InvalidState {
                operation: "delete a record",
                state: format!("index {} is out of range for {} records", index, records.len()),
            });
        }

        let audio_path = self.audio_path(&records[index].file_reference);
        let trash_path = self
            .audio_dir
            .join(format!(".{}.deleting", records[index].file_reference));

        // Move the audio aside first so a failed metadata write can be undone
        let moved = match fs::rename(&audio_path, &trash_path) {
            Ok(()) => true,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                warn!("Audio file {} already missing", audio_path.display());
                false
            }
            Err(e) => {
                return Err(SessionError::Persistence(
                    anyhow::Error::new(e)
                        .context(format!("Failed to remove {}", audio_path.display())),
                ));
            }
        };

        let removed = records.remove(index);

        if let Err(e) = self.persist(&records) {
            if moved {
                if let Err(restore) = fs::rename(&trash_path, &audio_path) {
                    error!(
                        "Failed to restore {} after aborted delete: {}",
                        audio_path.display(),
                        restore
                    );
                }
            }
            return Err(SessionError::Persistence(e));
        }

        if moved {
            if let Err(e) = fs::remove_file(&trash_path) {
                warn!("Failed to remove {}: {}", trash_path.display(), e);
            }
        }

        info!("Deleted record \"{}\" ({} left)", removed.name, records.len());

        Ok(removed)
    }

    /// Absolute path of a record's audio file
    pub fn audio_path(&self, file_reference: &str) -> PathBuf {
        self.audio_dir.join(file_reference)
    }

    /// Fresh, collision-free audio file name
    pub fn new_file_reference(&self) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("recording-{}.wav", &suffix[..10])
    }

    /// Remove an audio file that never became a record
    pub fn discard_audio(&self, file_reference: &str) -> Result<()> {
        let path = self.audio_path(file_reference);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Discarded {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to discard {}", path.display())),
        }
    }

    fn load(&self) -> Result<Vec<StoredRecord>> {
        let data = match fs::read(&self.index_path) {
            Ok(data) => data,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.index_path.display()))
            }
        };

        serde_json::from_slice(&data)
            .with_context(|| format!("Failed to decode {}", self.index_path.display()))
    }

    fn persist(&self, records: &[StoredRecord]) -> Result<()> {
        let data = serde_json::to_vec_pretty(records).context("Failed to encode records")?;

        // Write-then-rename keeps the previous list intact on failure
        let staging = self.index_path.with_extension("json.tmp");
        fs::write(&staging, data)
            .with_context(|| format!("Failed to write {}", staging.display()))?;
        fs::rename(&staging, &self.index_path)
            .with_context(|| format!("Failed to replace {}", self.index_path.display()))?;

        Ok(())
    }
}
