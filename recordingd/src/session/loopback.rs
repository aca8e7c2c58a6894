//! In-process flight recorders standing in for remote JVMs.
//!
//! Each connect URL gets its own [`LoopbackTarget`] with a stock event
//! catalogue, two built-in templates and the usual recording option
//! defaults. Targets can be reconfigured and made to fail, which is how the
//! rest of the crate exercises its error paths.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use shared::types::TemplateType;
use crate::session::{
    Connector, EventEnableMap, EventTypeInfo, OptionDescriptor, OptionValue, RecordingOptions,
    RemoteRecordingDescriptor, RemoteRecordingState, SessionError, TargetSession, Template,
    TemplateService,
};
use crate::store::Target;

const STOCK_EVENTS: &[&str] = &[
    "jdk.CPULoad",
    "jdk.GarbageCollection",
    "jdk.ThreadSleep",
    "jdk.ObjectAllocationSample",
    "jdk.ExecutionSample",
];

/// One recording held by a loopback target
#[derive(Debug, Clone)]
pub struct LoopbackRecording {
    pub descriptor: RemoteRecordingDescriptor,
    pub options: RecordingOptions,
    pub events: EventEnableMap,
}

#[derive(Default)]
struct Faults {
    connect: bool,
    start: VecDeque<SessionError>,
    stop: VecDeque<SessionError>,
    close: VecDeque<SessionError>,
    list: VecDeque<SessionError>,
}

struct FlightRecorder {
    next_id: i64,
    fixed_start_time: Option<i64>,
    recordings: Vec<LoopbackRecording>,
    templates: Vec<(Template, EventEnableMap)>,
    event_types: Vec<EventTypeInfo>,
    options: HashMap<String, OptionDescriptor>,
    closed: Vec<i64>,
}

/// A simulated JVM flight recorder
pub struct LoopbackTarget {
    recorder: Mutex<FlightRecorder>,
    faults: Mutex<Faults>,
}

impl LoopbackTarget {
    pub fn new() -> Self {
        let event_types: Vec<EventTypeInfo> = STOCK_EVENTS
            .iter()
            .map(|key| EventTypeInfo::new(*key))
            .collect();

        let mut continuous = EventEnableMap::default();
        continuous.set("jdk.CPULoad", "enabled", "true");
        continuous.set("jdk.CPULoad", "period", "1000 ms");
        continuous.set("jdk.GarbageCollection", "enabled", "true");

        let mut profiling = continuous.clone();
        profiling.set("jdk.ExecutionSample", "enabled", "true");
        profiling.set("jdk.ExecutionSample", "period", "10 ms");
        profiling.set("jdk.ObjectAllocationSample", "enabled", "true");

        let templates = vec![
            (builtin_template("Continuous", "Low overhead configuration"), continuous),
            (builtin_template("Profiling", "Low overhead profiling configuration"), profiling),
        ];

        let options = HashMap::from([
            ("name".to_string(), descriptor(OptionValue::Text(String::new()), None)),
            ("duration".to_string(), descriptor(OptionValue::Integer(0), Some("ms"))),
            ("disk".to_string(), descriptor(OptionValue::Bool(true), None)),
            ("maxAge".to_string(), descriptor(OptionValue::Integer(0), Some("ms"))),
            ("maxSize".to_string(), descriptor(OptionValue::Integer(0), Some("B"))),
        ]);

        Self {
            recorder: Mutex::new(FlightRecorder {
                next_id: 1,
                fixed_start_time: None,
                recordings: Vec::new(),
                templates,
                event_types,
                options,
                closed: Vec::new(),
            }),
            faults: Mutex::new(Faults::default()),
        }
    }

    pub fn set_next_id(&self, id: i64) {
        self.recorder.lock().next_id = id;
    }

    /// Report this start time for every recording started from now on
    pub fn fix_start_time(&self, epoch_ms: i64) {
        self.recorder.lock().fixed_start_time = Some(epoch_ms);
    }

    pub fn set_event_types(&self, keys: &[&str]) {
        self.recorder.lock().event_types = keys.iter().map(|k| EventTypeInfo::new(*k)).collect();
    }

    pub fn add_template(&self, template: Template, events: EventEnableMap) {
        self.recorder.lock().templates.push((template, events));
    }

    pub fn set_option_default(&self, name: &str, default: OptionValue) {
        let mut recorder = self.recorder.lock();
        let unit = recorder.options.get(name).and_then(|o| o.unit.clone());
        recorder
            .options
            .insert(name.to_string(), OptionDescriptor { default, unit });
    }

    pub fn recordings(&self) -> Vec<LoopbackRecording> {
        self.recorder.lock().recordings.clone()
    }

    /// Ids of recordings closed so far, in order
    pub fn closed(&self) -> Vec<i64> {
        self.recorder.lock().closed.clone()
    }

    pub fn fail_connect(&self, fail: bool) {
        self.faults.lock().connect = fail;
    }

    pub fn fail_next_start(&self, err: SessionError) {
        self.faults.lock().start.push_back(err);
    }

    pub fn fail_next_stop(&self, err: SessionError) {
        self.faults.lock().stop.push_back(err);
    }

    pub fn fail_next_close(&self, err: SessionError) {
        self.faults.lock().close.push_back(err);
    }

    pub fn fail_next_list(&self, err: SessionError) {
        self.faults.lock().list.push_back(err);
    }
}

impl Default for LoopbackTarget {
    fn default() -> Self {
        Self::new()
    }
}

fn builtin_template(name: &str, description: &str) -> Template {
    Template {
        name: name.to_string(),
        description: description.to_string(),
        provider: "Oracle".to_string(),
        template_type: TemplateType::Target,
    }
}

fn descriptor(default: OptionValue, unit: Option<&str>) -> OptionDescriptor {
    OptionDescriptor {
        default,
        unit: unit.map(str::to_string),
    }
}

/// Opens sessions onto loopback targets, creating one per connect URL on first use.
#[derive(Default)]
pub struct LoopbackConnector {
    targets: Mutex<HashMap<String, Arc<LoopbackTarget>>>,
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target(&self, connect_url: &str) -> Arc<LoopbackTarget> {
        self.targets
            .lock()
            .entry(connect_url.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self, target: &Target) -> Result<Arc<dyn TargetSession>, SessionError> {
        let remote = self.target(&target.connect_url);
        if remote.faults.lock().connect {
            return Err(SessionError::Connect {
                url: target.connect_url.clone(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(Arc::new(LoopbackSession { remote }))
    }
}

pub struct LoopbackSession {
    remote: Arc<LoopbackTarget>,
}

impl LoopbackSession {
    fn injected(&self, pick: impl FnOnce(&mut Faults) -> Option<SessionError>) -> Result<(), SessionError> {
        let mut faults = self.remote.faults.lock();
        match pick(&mut faults) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Fixed-duration recordings report themselves stopped once their duration has elapsed.
fn refresh_state(recording: &mut LoopbackRecording, now: i64) {
    let d = &mut recording.descriptor;
    if d.state == RemoteRecordingState::Running && d.duration > 0 && now >= d.start_time + d.duration {
        d.state = RemoteRecordingState::Stopped;
    }
}

#[async_trait]
impl TargetSession for LoopbackSession {
    async fn available_recordings(&self) -> Result<Vec<RemoteRecordingDescriptor>, SessionError> {
        self.injected(|f| f.list.pop_front())?;
        let now = Utc::now().timestamp_millis();
        let mut recorder = self.remote.recorder.lock();
        Ok(recorder
            .recordings
            .iter_mut()
            .map(|r| {
                refresh_state(r, now);
                r.descriptor.clone()
            })
            .collect())
    }

    async fn start(
        &self,
        options: &RecordingOptions,
        events: &EventEnableMap,
    ) -> Result<RemoteRecordingDescriptor, SessionError> {
        self.injected(|f| f.start.pop_front())?;
        let mut recorder = self.remote.recorder.lock();

        let name = options
            .get(RecordingOptions::NAME)
            .and_then(OptionValue::as_str)
            .ok_or_else(|| SessionError::FlightRecorder("recording name is required".to_string()))?
            .to_string();
        if recorder.recordings.iter().any(|r| r.descriptor.name == name) {
            return Err(SessionError::FlightRecorder(format!(
                "recording {} already exists",
                name
            )));
        }

        let default_i64 = |key: &str| {
            recorder
                .options
                .get(key)
                .and_then(|o| o.default.as_i64())
                .unwrap_or(0)
        };
        let numeric = |key: &str| {
            options
                .get(key)
                .and_then(OptionValue::as_i64)
                .unwrap_or_else(|| default_i64(key))
        };
        let duration = numeric(RecordingOptions::DURATION);
        let max_age = numeric(RecordingOptions::MAX_AGE);
        let max_size = numeric(RecordingOptions::MAX_SIZE);
        let to_disk = options
            .get(RecordingOptions::TO_DISK)
            .and_then(OptionValue::as_bool)
            .or_else(|| {
                recorder
                    .options
                    .get(RecordingOptions::TO_DISK)
                    .and_then(|o| o.default.as_bool())
            })
            .unwrap_or(false);

        let id = recorder.next_id;
        recorder.next_id += 1;
        let start_time = recorder
            .fixed_start_time
            .unwrap_or_else(|| Utc::now().timestamp_millis());

        let descriptor = RemoteRecordingDescriptor {
            id,
            name,
            state: RemoteRecordingState::Running,
            duration,
            start_time,
            continuous: duration == 0,
            to_disk,
            max_size,
            max_age,
        };
        recorder.recordings.push(LoopbackRecording {
            descriptor: descriptor.clone(),
            options: options.clone(),
            events: events.clone(),
        });

        Ok(descriptor)
    }

    async fn stop(&self, descriptor: &RemoteRecordingDescriptor) -> Result<(), SessionError> {
        self.injected(|f| f.stop.pop_front())?;
        let mut recorder = self.remote.recorder.lock();
        let recording = recorder
            .recordings
            .iter_mut()
            .find(|r| r.descriptor.id == descriptor.id)
            .ok_or_else(|| SessionError::FlightRecorder(format!("no recording with id {}", descriptor.id)))?;
        recording.descriptor.state = RemoteRecordingState::Stopped;
        Ok(())
    }

    async fn close(&self, descriptor: &RemoteRecordingDescriptor) -> Result<(), SessionError> {
        self.injected(|f| f.close.pop_front())?;
        let mut recorder = self.remote.recorder.lock();
        let before = recorder.recordings.len();
        recorder.recordings.retain(|r| r.descriptor.id != descriptor.id);
        if recorder.recordings.len() == before {
            return Err(SessionError::FlightRecorder(format!(
                "no recording with id {}",
                descriptor.id
            )));
        }
        recorder.closed.push(descriptor.id);
        Ok(())
    }

    async fn available_recording_options(
        &self,
    ) -> Result<HashMap<String, OptionDescriptor>, SessionError> {
        Ok(self.remote.recorder.lock().options.clone())
    }

    async fn available_event_types(&self) -> Result<Vec<EventTypeInfo>, SessionError> {
        Ok(self.remote.recorder.lock().event_types.clone())
    }

    fn template_service(&self) -> &dyn TemplateService {
        self
    }
}

#[async_trait]
impl TemplateService for LoopbackSession {
    async fn templates(&self) -> Result<Vec<Template>, SessionError> {
        Ok(self
            .remote
            .recorder
            .lock()
            .templates
            .iter()
            .map(|(t, _)| t.clone())
            .collect())
    }

    async fn events(
        &self,
        name: &str,
        template_type: TemplateType,
    ) -> Result<Option<EventEnableMap>, SessionError> {
        Ok(self
            .remote
            .recorder
            .lock()
            .templates
            .iter()
            .find(|(t, _)| t.name == name && t.template_type == template_type)
            .map(|(_, events)| events.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> (Arc<LoopbackTarget>, LoopbackSession) {
        let remote = Arc::new(LoopbackTarget::new());
        (remote.clone(), LoopbackSession { remote })
    }

    fn named(name: &str) -> RecordingOptions {
        let mut options = RecordingOptions::default();
        options.insert(RecordingOptions::NAME, OptionValue::Text(name.to_string()));
        options
    }

    #[tokio::test]
    async fn test_start_applies_target_defaults() {
        let (_, session) = session();

        let started = session.start(&named("r1"), &EventEnableMap::default()).await.unwrap();

        assert_eq!(started.name, "r1");
        assert_eq!(started.state, RemoteRecordingState::Running);
        assert!(started.continuous);
        assert!(started.to_disk);
        assert_eq!(session.available_recordings().await.unwrap(), vec![started]);
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected_by_recorder() {
        let (_, session) = session();
        session.start(&named("r1"), &EventEnableMap::default()).await.unwrap();

        let err = session.start(&named("r1"), &EventEnableMap::default()).await.unwrap_err();
        assert!(matches!(err, SessionError::FlightRecorder(_)));
    }

    #[tokio::test]
    async fn test_elapsed_fixed_duration_reports_stopped() {
        let (remote, session) = session();
        remote.fix_start_time(0);
        let mut options = named("short");
        options.insert(RecordingOptions::DURATION, OptionValue::Integer(1));

        session.start(&options, &EventEnableMap::default()).await.unwrap();

        let listed = session.available_recordings().await.unwrap();
        assert_eq!(listed[0].state, RemoteRecordingState::Stopped);
        assert!(!listed[0].continuous);
    }

    #[tokio::test]
    async fn test_injected_close_failure_is_one_shot() {
        let (remote, session) = session();
        let started = session.start(&named("r1"), &EventEnableMap::default()).await.unwrap();
        remote.fail_next_close(SessionError::Transport("reset".into()));

        assert!(session.close(&started).await.is_err());
        session.close(&started).await.unwrap();
        assert_eq!(remote.closed(), vec![started.id]);
    }

    #[tokio::test]
    async fn test_template_events_by_name_and_type() {
        let (_, session) = session();

        let events = session.events("Profiling", TemplateType::Target).await.unwrap().unwrap();
        assert_eq!(events.get("jdk.ExecutionSample", "enabled"), Some("true"));
        assert!(session.events("Profiling", TemplateType::Custom).await.unwrap().is_none());
    }
}
