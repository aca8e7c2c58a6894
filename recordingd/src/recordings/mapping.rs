use std::collections::BTreeMap;
use shared::protocol::{LABEL_TEMPLATE_NAME, LABEL_TEMPLATE_TYPE};
use shared::types::{LinkedRecordingDescriptor, Metadata, RecordingState, TemplateType};
use crate::session::{RemoteRecordingDescriptor, RemoteRecordingState};
use crate::store::ActiveRecording;

/// Collapse a target-reported state into the persisted state set. This is
/// the only place the mapping lives; create, stop and list all go through it.
pub fn map_state(state: &RemoteRecordingState) -> RecordingState {
    match state {
        RemoteRecordingState::Created => RecordingState::New,
        RemoteRecordingState::Running | RemoteRecordingState::Stopping => RecordingState::Running,
        RemoteRecordingState::Stopped => RecordingState::Stopped,
        RemoteRecordingState::Unknown(other) => {
            tracing::warn!("Unrecognized recording state: {}", other);
            RecordingState::Closed
        }
    }
}

pub fn template_metadata(name: &str, template_type: TemplateType) -> Metadata {
    Metadata::new(BTreeMap::from([
        (LABEL_TEMPLATE_NAME.to_string(), name.to_string()),
        (LABEL_TEMPLATE_TYPE.to_string(), template_type.name().to_string()),
    ]))
}

pub fn active_recording(
    target_id: i64,
    remote: &RemoteRecordingDescriptor,
    metadata: Metadata,
) -> ActiveRecording {
    ActiveRecording {
        target_id,
        remote_id: remote.id,
        name: remote.name.clone(),
        state: map_state(&remote.state),
        duration: remote.duration,
        start_time: remote.start_time,
        continuous: remote.continuous,
        to_disk: remote.to_disk,
        max_size: remote.max_size,
        max_age: remote.max_age,
        metadata,
    }
}

/// Composes download and report links from the daemon's external URL.
#[derive(Debug, Clone, Default)]
pub struct LinkBuilder {
    base_url: Option<String>,
}

impl LinkBuilder {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url: base_url.map(|url| url.trim_end_matches('/').to_string()),
        }
    }

    pub fn download_url(&self, recording: &ActiveRecording) -> Option<String> {
        self.base_url.as_ref().map(|base| {
            format!(
                "{}/api/v3/activedownload/{}?target={}",
                base, recording.remote_id, recording.target_id
            )
        })
    }

    pub fn report_url(&self, recording: &ActiveRecording) -> Option<String> {
        self.base_url.as_ref().map(|base| {
            format!(
                "{}/api/v3/targets/{}/reports/{}",
                base, recording.target_id, recording.remote_id
            )
        })
    }

    pub fn descriptor(&self, recording: &ActiveRecording) -> LinkedRecordingDescriptor {
        LinkedRecordingDescriptor {
            id: recording.remote_id,
            state: recording.state,
            duration: recording.duration,
            start_time: recording.start_time,
            continuous: recording.continuous,
            to_disk: recording.to_disk,
            max_size: recording.max_size,
            max_age: recording.max_age,
            name: recording.name.clone(),
            download_url: self.download_url(recording),
            report_url: self.report_url(recording),
            metadata: recording.metadata.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(state: RemoteRecordingState) -> RemoteRecordingDescriptor {
        RemoteRecordingDescriptor {
            id: 42,
            name: "r1".to_string(),
            state,
            duration: 30_000,
            start_time: 1_700_000_000_000,
            continuous: false,
            to_disk: true,
            max_size: 0,
            max_age: 0,
        }
    }

    #[test]
    fn test_state_collapse() {
        assert_eq!(map_state(&RemoteRecordingState::Created), RecordingState::New);
        assert_eq!(map_state(&RemoteRecordingState::Running), RecordingState::Running);
        assert_eq!(map_state(&RemoteRecordingState::Stopping), RecordingState::Running);
        assert_eq!(map_state(&RemoteRecordingState::Stopped), RecordingState::Stopped);
        assert_eq!(
            map_state(&RemoteRecordingState::Unknown("DESTROYED".to_string())),
            RecordingState::Closed
        );
    }

    #[test]
    fn test_descriptor_mirrors_remote_fields() {
        let metadata = template_metadata("Profiling", TemplateType::Target);
        let recording = active_recording(1, &remote(RemoteRecordingState::Running), metadata.clone());

        let descriptor = LinkBuilder::default().descriptor(&recording);

        assert_eq!(descriptor.id, 42);
        assert_eq!(descriptor.state, RecordingState::Running);
        assert_eq!(descriptor.duration, 30_000);
        assert_eq!(descriptor.start_time, 1_700_000_000_000);
        assert!(descriptor.to_disk);
        assert_eq!(descriptor.metadata.get("template.name"), Some("Profiling"));
        assert_eq!(descriptor.metadata.get("template.type"), Some("TARGET"));
        assert!(descriptor.download_url.is_none());
        assert!(descriptor.report_url.is_none());
    }

    #[test]
    fn test_links_from_base_url() {
        let recording = active_recording(
            7,
            &remote(RemoteRecordingState::Created),
            Metadata::default(),
        );
        let links = LinkBuilder::new(Some("https://recordings.example.com/".to_string()));

        assert_eq!(
            links.download_url(&recording).as_deref(),
            Some("https://recordings.example.com/api/v3/activedownload/42?target=7")
        );
        assert_eq!(
            links.report_url(&recording).as_deref(),
            Some("https://recordings.example.com/api/v3/targets/7/reports/42")
        );
    }
}
