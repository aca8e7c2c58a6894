use std::sync::Arc;
use serde::Deserialize;
use shared::types::{
    ArchivedRecording, LinkedRecordingDescriptor, NotificationCategory, RecordingOptionsView,
    RecordingState, TargetSummary,
};
use crate::error::{ApiError, FAILED_TO_STOP};
use crate::notify::NotificationPublisher;
use crate::recordings::mapping::{self, LinkBuilder};
use crate::recordings::options::{OptionsAssembler, RequestedOptions};
use crate::recordings::specifier::parse_event_specifier;
use crate::recordings::templates;
use crate::session::{ConnectionManager, RemoteRecordingDescriptor, SessionError, TargetSession};
use crate::store::{ActiveRecording, StoreError, StoreHandle, Target, TargetLock};

/// Form fields accepted when creating a recording.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRecordingForm {
    pub recording_name: Option<String>,
    pub events: Option<String>,
    pub duration: Option<i64>,
    pub to_disk: Option<bool>,
    pub max_age: Option<i64>,
    pub max_size: Option<i64>,
    /// Accepted but not acted on
    pub metadata: Option<String>,
    /// Accepted but not acted on
    pub archive_on_stop: Option<bool>,
}

impl CreateRecordingForm {
    fn requested_options(&self) -> RequestedOptions {
        RequestedOptions {
            duration: self.duration,
            to_disk: self.to_disk,
            max_age: self.max_age,
            max_size: self.max_size,
        }
    }
}

fn duplicate_name(name: &str) -> ApiError {
    ApiError::bad_input(format!("Recording with name \"{}\" already exists", name))
}

fn require(value: Option<String>, field: &str) -> Result<String, ApiError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ApiError::bad_input(format!(
            "\"{}\" form parameter must be provided",
            field
        ))),
    }
}

async fn find_remote(
    session: &dyn TargetSession,
    matches: impl Fn(&RemoteRecordingDescriptor) -> bool,
) -> Result<Option<RemoteRecordingDescriptor>, ApiError> {
    Ok(session
        .available_recordings()
        .await?
        .into_iter()
        .find(|r| matches(r)))
}

/// Close a remote recording. A flight recorder refusal means the recording
/// is already gone as far as the daemon is concerned.
async fn safe_close(
    session: &dyn TargetSession,
    remote: &RemoteRecordingDescriptor,
) -> Result<(), SessionError> {
    match session.close(remote).await {
        Err(SessionError::FlightRecorder(reason)) => {
            tracing::error!("Failed to stop remote recording {}: {}", remote.name, reason);
            Ok(())
        }
        other => other,
    }
}

/// Sequences recording requests across the store, the target sessions and
/// the notification bus.
///
/// Every mutating operation holds the target's lock from its first lookup
/// until its store write commits. The remote change always happens first,
/// then the store write, then the notification; a failure at any step
/// leaves the later steps undone.
pub struct RecordingController {
    store: StoreHandle,
    connections: Arc<ConnectionManager>,
    publisher: NotificationPublisher,
    options: OptionsAssembler,
    links: LinkBuilder,
}

impl RecordingController {
    pub fn new(
        store: StoreHandle,
        connections: Arc<ConnectionManager>,
        publisher: NotificationPublisher,
        options: OptionsAssembler,
        links: LinkBuilder,
    ) -> Self {
        Self {
            store,
            connections,
            publisher,
            options,
            links,
        }
    }

    async fn target(&self, id: i64) -> Result<Target, ApiError> {
        self.store
            .find_target_by_id(id)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("Target {} not found", id)))
    }

    /// Lock a target that exists, then read it again under the lock.
    async fn locked_target(&self, id: i64) -> Result<(TargetLock, Target), ApiError> {
        self.target(id).await?;
        let lock = self.store.lock_target(id).await;
        let target = self.target(id).await?;
        Ok((lock, target))
    }

    async fn target_id_by_url(&self, connect_url: &str) -> Result<i64, ApiError> {
        Ok(self.store.find_target_by_connect_url(connect_url.to_string()).await?.id)
    }

    pub async fn list_targets(&self) -> Result<Vec<TargetSummary>, ApiError> {
        Ok(self.store.list_targets().await?.iter().map(Target::summary).collect())
    }

    /// Archived recordings live with the archive service; nothing is held here.
    pub fn list_archives(&self) -> Vec<ArchivedRecording> {
        Vec::new()
    }

    pub async fn list_for_target(&self, target_id: i64) -> Result<Vec<LinkedRecordingDescriptor>, ApiError> {
        let target = self.target(target_id).await?;
        Ok(target
            .active_recordings
            .iter()
            .map(|r| self.links.descriptor(r))
            .collect())
    }

    pub async fn list_for_target_v1(&self, connect_url: &str) -> Result<Vec<LinkedRecordingDescriptor>, ApiError> {
        let target_id = self.target_id_by_url(connect_url).await?;
        self.list_for_target(target_id).await
    }

    pub async fn create_recording(
        &self,
        target_id: i64,
        form: CreateRecordingForm,
    ) -> Result<LinkedRecordingDescriptor, ApiError> {
        let recording_name = require(form.recording_name.clone(), "recordingName")?;
        let events = require(form.events.clone(), "events")?;
        if form.metadata.is_some() || form.archive_on_stop.is_some() {
            tracing::debug!("Ignoring metadata/archiveOnStop for recording {}", recording_name);
        }

        let (_lock, target) = self.locked_target(target_id).await?;
        if target.recording_by_name(&recording_name).is_some() {
            return Err(duplicate_name(&recording_name));
        }
        let options = self
            .options
            .recording_options(&recording_name, &form.requested_options());

        let name = recording_name.clone();
        let (remote, metadata) = self
            .connections
            .execute_connected_task(&target, |session| async move {
                if find_remote(&*session, |r| r.name == name).await?.is_some() {
                    return Err(duplicate_name(&name));
                }

                let specifier = parse_event_specifier(&events)?;
                let template_type = templates::resolve_type(
                    &*session,
                    &specifier.template_name,
                    specifier.template_type,
                )
                .await?;
                let event_map = templates::enable_events(
                    &*session,
                    &specifier.template_name,
                    Some(template_type),
                )
                .await?;

                let remote = session.start(&options, &event_map).await?;
                let metadata = mapping::template_metadata(&specifier.template_name, template_type);
                Ok::<_, ApiError>((remote, metadata))
            })
            .await?;

        let recording = mapping::active_recording(target.id, &remote, metadata);
        if let Err(e) = self.persist_started(&target, &recording).await {
            tracing::error!(
                "Recording {} started on {} but could not be saved: {}",
                remote.id,
                target.connect_url,
                e
            );
            self.discard_started(&target, &remote).await;
            return Err(e.into());
        }

        tracing::info!("Started recording {} ({}) on {}", recording.name, recording.remote_id, target.connect_url);
        let descriptor = self.links.descriptor(&recording);
        self.publisher.notify(
            NotificationCategory::ActiveRecordingCreated,
            &target.connect_url,
            descriptor.clone(),
        );
        Ok(descriptor)
    }

    /// Save a freshly started recording. A row still holding the new remote
    /// id belongs to a recording the target no longer has, so it is dropped.
    async fn persist_started(&self, target: &Target, recording: &ActiveRecording) -> Result<(), StoreError> {
        if let Some(stale) = target.recording_by_remote_id(recording.remote_id) {
            tracing::warn!(
                "Dropping stale recording {} ({}) on {}; the target reassigned its id",
                stale.name,
                stale.remote_id,
                target.connect_url
            );
            self.store.delete_recording(target.id, stale.remote_id).await?;
            self.publisher.notify(
                NotificationCategory::ActiveRecordingDeleted,
                &target.connect_url,
                self.links.descriptor(stale),
            );
        }
        self.store.insert_recording(recording.clone()).await
    }

    /// Close a recording that was started but could not be saved.
    async fn discard_started(&self, target: &Target, remote: &RemoteRecordingDescriptor) {
        let closed = self
            .connections
            .execute_connected_task(target, |session| async move {
                session.close(remote).await?;
                Ok::<_, ApiError>(())
            })
            .await;

        match closed {
            Ok(()) => tracing::warn!("Closed unsaved recording {} on {}", remote.id, target.connect_url),
            Err(e) => tracing::error!(
                "Unsaved recording {} is still running on {}: {}",
                remote.id,
                target.connect_url,
                e
            ),
        }
    }

    pub async fn create_recording_v1(
        &self,
        connect_url: &str,
        form: CreateRecordingForm,
    ) -> Result<LinkedRecordingDescriptor, ApiError> {
        let target_id = self.target_id_by_url(connect_url).await?;
        self.create_recording(target_id, form).await
    }

    pub async fn delete_recording(&self, target_id: i64, remote_id: i64) -> Result<(), ApiError> {
        let (_lock, target) = self.locked_target(target_id).await?;
        let recording = target
            .recording_by_remote_id(remote_id)
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("Recording {} not found", remote_id)))?;

        self.delete_active(&target, &recording).await
    }

    pub async fn delete_recording_v1(&self, connect_url: &str, recording_name: &str) -> Result<(), ApiError> {
        if recording_name.trim().is_empty() {
            return Err(ApiError::bad_input("\"recordingName\" form parameter must be provided"));
        }
        let target_id = self.target_id_by_url(connect_url).await?;
        let (_lock, target) = self.locked_target(target_id).await?;
        let recording = target
            .recording_by_name(recording_name)
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("Recording \"{}\" not found", recording_name)))?;

        self.delete_active(&target, &recording).await
    }

    async fn delete_active(&self, target: &Target, recording: &ActiveRecording) -> Result<(), ApiError> {
        let remote_id = recording.remote_id;
        self.connections
            .execute_connected_task(target, |session| async move {
                if let Some(remote) = find_remote(&*session, |r| r.id == remote_id).await? {
                    safe_close(&*session, &remote).await?;
                }
                Ok::<_, ApiError>(())
            })
            .await
            .map_err(|e| match e {
                ApiError::Upstream { source, .. } => ApiError::upstream(FAILED_TO_STOP, source),
                other => other,
            })?;

        self.store.delete_recording(target.id, remote_id).await?;

        tracing::info!("Deleted recording {} ({}) on {}", recording.name, remote_id, target.connect_url);
        self.publisher.notify(
            NotificationCategory::ActiveRecordingDeleted,
            &target.connect_url,
            self.links.descriptor(recording),
        );
        Ok(())
    }

    pub async fn stop_recording(
        &self,
        target_id: i64,
        remote_id: i64,
    ) -> Result<LinkedRecordingDescriptor, ApiError> {
        let (_lock, target) = self.locked_target(target_id).await?;
        let recording = target
            .recording_by_remote_id(remote_id)
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("Recording {} not found", remote_id)))?;

        self.stop_active(&target, recording).await
    }

    pub async fn stop_recording_v1(
        &self,
        connect_url: &str,
        recording_name: &str,
    ) -> Result<LinkedRecordingDescriptor, ApiError> {
        let target_id = self.target_id_by_url(connect_url).await?;
        let (_lock, target) = self.locked_target(target_id).await?;
        let recording = target
            .recording_by_name(recording_name)
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("Recording \"{}\" not found", recording_name)))?;

        self.stop_active(&target, recording).await
    }

    async fn stop_active(
        &self,
        target: &Target,
        mut recording: ActiveRecording,
    ) -> Result<LinkedRecordingDescriptor, ApiError> {
        let remote_id = recording.remote_id;
        let name = recording.name.clone();
        let state = self
            .connections
            .execute_connected_task(target, |session| async move {
                let remote = find_remote(&*session, |r| r.id == remote_id)
                    .await?
                    .ok_or_else(|| {
                        ApiError::not_found(format!("Recording \"{}\" no longer exists on the target", name))
                    })?;
                session.stop(&remote).await?;

                let state = match find_remote(&*session, |r| r.id == remote_id).await? {
                    Some(refreshed) => mapping::map_state(&refreshed.state),
                    None => RecordingState::Stopped,
                };
                Ok::<_, ApiError>(state)
            })
            .await?;

        self.store
            .update_recording_state(target.id, remote_id, state)
            .await?;
        recording.state = state;

        tracing::info!("Stopped recording {} ({}) on {}", recording.name, remote_id, target.connect_url);
        let descriptor = self.links.descriptor(&recording);
        self.publisher.notify(
            NotificationCategory::ActiveRecordingStopped,
            &target.connect_url,
            descriptor.clone(),
        );
        Ok(descriptor)
    }

    pub async fn recording_options(&self, target_id: i64) -> Result<RecordingOptionsView, ApiError> {
        let target = self.target(target_id).await?;
        let assembler = &self.options;
        self.connections
            .execute_connected_task(&target, |session| async move {
                assembler.effective_defaults(&*session).await
            })
            .await
    }

    pub async fn recording_options_v1(&self, connect_url: &str) -> Result<RecordingOptionsView, ApiError> {
        let target_id = self.target_id_by_url(connect_url).await?;
        self.recording_options(target_id).await
    }
}
