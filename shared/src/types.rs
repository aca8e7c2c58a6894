use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

/// Lifecycle state of an active recording as persisted and reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordingState {
    New,
    Running,
    Stopped,
    Closed,
}

impl RecordingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingState::New => "NEW",
            RecordingState::Running => "RUNNING",
            RecordingState::Stopped => "STOPPED",
            RecordingState::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for RecordingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordingState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(RecordingState::New),
            "RUNNING" => Ok(RecordingState::Running),
            "STOPPED" => Ok(RecordingState::Stopped),
            "CLOSED" => Ok(RecordingState::Closed),
            other => Err(format!("unknown recording state: {}", other)),
        }
    }
}

/// Origin of an event template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemplateType {
    /// Shipped with the target runtime
    Target,
    /// User-authored, stored on the target
    Custom,
}

impl TemplateType {
    pub fn name(&self) -> &'static str {
        match self {
            TemplateType::Target => "TARGET",
            TemplateType::Custom => "CUSTOM",
        }
    }

    /// Case-insensitive lookup against the closed set of template types.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_uppercase().as_str() {
            "TARGET" => Some(TemplateType::Target),
            "CUSTOM" => Some(TemplateType::Custom),
            _ => None,
        }
    }
}

impl fmt::Display for TemplateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Free-form labels attached to a recording.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub labels: BTreeMap<String, String>,
}

impl Metadata {
    pub fn new(labels: BTreeMap<String, String>) -> Self {
        Self { labels }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// Outward view of an active recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedRecordingDescriptor {
    /// Identifier assigned by the target JVM
    pub id: i64,
    pub state: RecordingState,
    /// Milliseconds; 0 for continuous recordings
    pub duration: i64,
    /// Epoch milliseconds
    pub start_time: i64,
    pub continuous: bool,
    pub to_disk: bool,
    /// Bytes
    pub max_size: i64,
    /// Milliseconds
    pub max_age: i64,
    pub name: String,
    /// `None` until a download location is known
    pub download_url: Option<String>,
    pub report_url: Option<String>,
    pub metadata: Metadata,
}

/// A recording that has been copied off its target into the archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedRecording {
    pub name: String,
    pub download_url: String,
    pub report_url: String,
    pub metadata: Metadata,
    pub size: i64,
    pub archived_time: i64,
}

/// Effective recording defaults of a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingOptionsView {
    pub to_disk: Option<bool>,
    pub max_age: Option<i64>,
    pub max_size: Option<i64>,
}

/// A target known to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSummary {
    pub id: i64,
    pub connect_url: String,
    pub alias: Option<String>,
}

/// Closed set of recording lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationCategory {
    ActiveRecordingCreated,
    ActiveRecordingStopped,
    ActiveRecordingDeleted,
    SnapshotCreated,
    SnapshotDeleted,
}

impl NotificationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationCategory::ActiveRecordingCreated => "ActiveRecordingCreated",
            NotificationCategory::ActiveRecordingStopped => "ActiveRecordingStopped",
            NotificationCategory::ActiveRecordingDeleted => "ActiveRecordingDeleted",
            NotificationCategory::SnapshotCreated => "SnapshotCreated",
            NotificationCategory::SnapshotDeleted => "SnapshotDeleted",
        }
    }
}

impl fmt::Display for NotificationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a recording notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingEvent {
    /// Connect URL of the target the recording lives on
    pub target: String,
    pub recording: LinkedRecordingDescriptor,
}

/// Envelope published on the messaging topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub category: NotificationCategory,
    pub message: RecordingEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> LinkedRecordingDescriptor {
        LinkedRecordingDescriptor {
            id: 42,
            state: RecordingState::Running,
            duration: 30_000,
            start_time: 1_700_000_000_000,
            continuous: false,
            to_disk: true,
            max_size: 0,
            max_age: 0,
            name: "r1".to_string(),
            download_url: None,
            report_url: None,
            metadata: Metadata::new(BTreeMap::from([
                ("template.name".to_string(), "Profiling".to_string()),
                ("template.type".to_string(), "TARGET".to_string()),
            ])),
        }
    }

    #[test]
    fn test_descriptor_wire_shape() {
        let json = serde_json::to_value(descriptor()).unwrap();

        assert_eq!(json["state"], "RUNNING");
        assert_eq!(json["startTime"], 1_700_000_000_000i64);
        assert_eq!(json["toDisk"], true);
        assert!(json["downloadUrl"].is_null());
        assert_eq!(json["metadata"]["labels"]["template.name"], "Profiling");
    }

    #[test]
    fn test_notification_envelope() {
        let notification = Notification {
            category: NotificationCategory::ActiveRecordingDeleted,
            message: RecordingEvent {
                target: "service:jmx:rmi:///jndi/rmi://localhost:9091/jmxrmi".to_string(),
                recording: descriptor(),
            },
        };

        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["category"], "ActiveRecordingDeleted");
        assert_eq!(
            json["message"]["target"],
            "service:jmx:rmi:///jndi/rmi://localhost:9091/jmxrmi"
        );
        assert_eq!(json["message"]["recording"]["id"], 42);
    }

    #[test]
    fn test_template_type_from_name_is_case_insensitive() {
        assert_eq!(TemplateType::from_name("custom"), Some(TemplateType::Custom));
        assert_eq!(TemplateType::from_name("Target"), Some(TemplateType::Target));
        assert_eq!(TemplateType::from_name("builtin"), None);
    }

    #[test]
    fn test_state_parses_its_own_names() {
        for state in [
            RecordingState::New,
            RecordingState::Running,
            RecordingState::Stopped,
            RecordingState::Closed,
        ] {
            assert_eq!(state.as_str().parse::<RecordingState>().unwrap(), state);
        }
        assert!("STOPPING".parse::<RecordingState>().is_err());
    }
}
