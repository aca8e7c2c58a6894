pub mod db;
pub mod handle;

use shared::types::{Metadata, RecordingState, TargetSummary};

pub use handle::{StoreHandle, TargetLock};

/// A remote JVM known to the daemon, together with the recordings it owns.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub id: i64,
    pub connect_url: String,
    pub alias: Option<String>,
    pub active_recordings: Vec<ActiveRecording>,
}

impl Target {
    pub fn recording_by_remote_id(&self, remote_id: i64) -> Option<&ActiveRecording> {
        self.active_recordings.iter().find(|r| r.remote_id == remote_id)
    }

    pub fn recording_by_name(&self, name: &str) -> Option<&ActiveRecording> {
        self.active_recordings.iter().find(|r| r.name == name)
    }

    pub fn summary(&self) -> TargetSummary {
        TargetSummary {
            id: self.id,
            connect_url: self.connect_url.clone(),
            alias: self.alias.clone(),
        }
    }
}

/// Persisted record of a recording running on a target.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveRecording {
    pub target_id: i64,
    pub remote_id: i64,
    pub name: String,
    pub state: RecordingState,
    pub duration: i64,
    pub start_time: i64,
    pub continuous: bool,
    pub to_disk: bool,
    pub max_size: i64,
    pub max_age: i64,
    pub metadata: Metadata,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Metadata encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Store thread has shut down")]
    Closed,
}
