use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Metadata of one completed recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    /// User-assigned label
    pub name: String,

    /// Audio file name, relative to the store's audio directory
    pub file_reference: String,

    /// When the recording was started
    pub created_at: DateTime<Utc>,

    /// Length in seconds, absent until the recording finished
    #[serde(default)]
    pub duration: Option<f64>,
}

impl StoredRecord {
    pub fn new(name: impl Into<String>, file_reference: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            file_reference: file_reference.into(),
            created_at,
            duration: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration.as_secs_f64());
        self
    }

    /// Only records with a usable measured duration may be played back
    pub fn is_playable(&self) -> bool {
        self.duration().is_some()
    }

    /// Stored length; `None` when absent, negative or out of range
    pub fn duration(&self) -> Option<Duration> {
        self.duration
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}

/// Format a time span the way the player shows it: `mm:ss`, or `hh:mm:ss`
/// from one hour on.
pub fn format_clock(span: Duration) -> String {
    let total = span.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours == 0 {
        format!("{:02}:{:02}", minutes, seconds)
    } else {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(Duration::ZERO), "00:00");
        assert_eq!(format_clock(Duration::from_secs_f64(65.9)), "01:05");
        assert_eq!(format_clock(Duration::from_secs(3599)), "59:59");
        assert_eq!(format_clock(Duration::from_secs(3725)), "01:02:05");
    }

    #[test]
    fn test_serialized_field_names() -> anyhow::Result<()> {
        let created_at = DateTime::parse_from_rfc3339("2020-01-15T10:00:00Z")?.with_timezone(&Utc);
        let record = StoredRecord::new("Standup", "recording-abc.wav", created_at)
            .with_duration(Duration::from_millis(5200));

        let json = serde_json::to_value(&record)?;
        assert_eq!(json["name"], "Standup");
        assert_eq!(json["fileReference"], "recording-abc.wav");
        let duration = json["duration"].as_f64().unwrap_or_default();
        assert!((duration - 5.2).abs() < 1e-9);
        assert!(json["createdAt"].as_str().is_some());

        Ok(())
    }

    #[test]
    fn test_record_without_duration_is_not_playable() -> anyhow::Result<()> {
        let json = r#"{"name":"a","fileReference":"f.wav","createdAt":"2020-01-15T10:00:00Z"}"#;
        let record: StoredRecord = serde_json::from_str(json)?;

        assert!(!record.is_playable());
        assert_eq!(record.duration(), None);

        Ok(())
    }
}
