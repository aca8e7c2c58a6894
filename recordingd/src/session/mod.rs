//! Contracts for talking to a remote JVM's flight recorder.
//!
//! A [`TargetSession`] is one authenticated session against one target. The
//! [`ConnectionManager`](pool::ConnectionManager) hands sessions to callers for
//! the length of a single task; how a session reaches its JVM is up to the
//! [`Connector`] it was opened by.

pub mod loopback;
pub mod pool;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use shared::types::TemplateType;
use crate::store::Target;

pub use pool::ConnectionManager;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    /// The flight recorder on the target rejected the operation
    #[error("Flight recorder error: {0}")]
    FlightRecorder(String),

    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// Recording state as reported by the target, before collapsing into
/// [`RecordingState`](shared::types::RecordingState).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteRecordingState {
    Created,
    Running,
    Stopping,
    Stopped,
    Unknown(String),
}

/// A target's own view of one of its recordings. Durations are in
/// milliseconds, sizes in bytes, start time in epoch milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRecordingDescriptor {
    pub id: i64,
    pub name: String,
    pub state: RemoteRecordingState,
    pub duration: i64,
    pub start_time: i64,
    pub continuous: bool,
    pub to_disk: bool,
    pub max_size: i64,
    pub max_age: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl OptionValue {
    /// Numeric values as a 64-bit integer; fractional values are truncated.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            OptionValue::Integer(v) => Some(*v),
            OptionValue::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

/// A recording option the target understands, with its default.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionDescriptor {
    pub default: OptionValue,
    pub unit: Option<String>,
}

/// Recording settings handed to [`TargetSession::start`], keyed by the
/// target's option names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordingOptions(BTreeMap<String, OptionValue>);

impl RecordingOptions {
    pub const NAME: &'static str = "name";
    pub const DURATION: &'static str = "duration";
    pub const TO_DISK: &'static str = "disk";
    pub const MAX_AGE: &'static str = "maxAge";
    pub const MAX_SIZE: &'static str = "maxSize";

    pub fn insert(&mut self, key: &str, value: OptionValue) {
        self.0.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }
}

/// An event type a target can record, e.g. `jdk.CPULoad`.
#[derive(Debug, Clone, PartialEq)]
pub struct EventTypeInfo {
    full_key: String,
}

impl EventTypeInfo {
    pub fn new(full_key: impl Into<String>) -> Self {
        Self {
            full_key: full_key.into(),
        }
    }

    pub fn full_key(&self) -> &str {
        &self.full_key
    }
}

/// One option of one event type, e.g. `jdk.CPULoad` / `enabled`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventOptionId {
    pub event: String,
    pub option: String,
}

/// Per-event option settings that select which events a recording captures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventEnableMap(BTreeMap<EventOptionId, String>);

impl EventEnableMap {
    pub fn set(&mut self, event: &str, option: &str, value: &str) {
        self.0.insert(
            EventOptionId {
                event: event.to_string(),
                option: option.to_string(),
            },
            value.to_string(),
        );
    }

    pub fn get(&self, event: &str, option: &str) -> Option<&str> {
        self.0
            .get(&EventOptionId {
                event: event.to_string(),
                option: option.to_string(),
            })
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EventOptionId, &str)> {
        self.0.iter().map(|(k, v)| (k, v.as_str()))
    }

    /// Event types with at least one option set
    pub fn events(&self) -> Vec<&str> {
        let mut events: Vec<&str> = self.0.keys().map(|k| k.event.as_str()).collect();
        events.dedup();
        events
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub name: String,
    pub description: String,
    pub provider: String,
    pub template_type: TemplateType,
}

#[async_trait]
pub trait TemplateService: Send + Sync {
    async fn templates(&self) -> Result<Vec<Template>, SessionError>;

    /// Event settings of a template, or `None` if the target has no such template.
    async fn events(
        &self,
        name: &str,
        template_type: TemplateType,
    ) -> Result<Option<EventEnableMap>, SessionError>;
}

/// An authenticated session against one target JVM.
#[async_trait]
pub trait TargetSession: Send + Sync {
    async fn available_recordings(&self) -> Result<Vec<RemoteRecordingDescriptor>, SessionError>;

    async fn start(
        &self,
        options: &RecordingOptions,
        events: &EventEnableMap,
    ) -> Result<RemoteRecordingDescriptor, SessionError>;

    async fn stop(&self, descriptor: &RemoteRecordingDescriptor) -> Result<(), SessionError>;

    async fn close(&self, descriptor: &RemoteRecordingDescriptor) -> Result<(), SessionError>;

    async fn available_recording_options(
        &self,
    ) -> Result<HashMap<String, OptionDescriptor>, SessionError>;

    async fn available_event_types(&self) -> Result<Vec<EventTypeInfo>, SessionError>;

    fn template_service(&self) -> &dyn TemplateService;
}

/// Opens sessions to targets.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &Target) -> Result<Arc<dyn TargetSession>, SessionError>;
}
