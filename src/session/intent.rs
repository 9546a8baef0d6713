use crate::store::StoredRecord;

/// A user action forwarded by the presentation layer
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    StartRecording { name: Option<String> },
    RenameRecording(String),
    PauseRecording,
    ResumeRecording,
    StopRecording { commit: bool },
    /// Play the record at `index` of the playable list
    Play { index: usize },
    PausePlayback,
    ResumePlayback,
    Seek { fraction: f64 },
    SkipForward,
    SkipBackward,
    StopPlayback,
    Delete { index: usize },
}

/// What an intent produced
#[derive(Debug, Clone, PartialEq)]
pub enum IntentOutcome {
    Done,
    /// Result of stopping a recording; `None` when it was discarded
    Saved(Option<StoredRecord>),
    Deleted(StoredRecord),
}
