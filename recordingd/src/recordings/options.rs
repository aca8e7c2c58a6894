use shared::types::RecordingOptionsView;
use crate::config::RecordingDefaults;
use crate::error::ApiError;
use crate::session::{OptionValue, RecordingOptions, TargetSession};

/// Optional recording settings supplied by a client. Durations are in
/// milliseconds, sizes in bytes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestedOptions {
    pub duration: Option<i64>,
    pub to_disk: Option<bool>,
    pub max_age: Option<i64>,
    pub max_size: Option<i64>,
}

/// Builds recording options for a target, layering client settings over
/// the operator's configured defaults.
#[derive(Debug, Clone, Default)]
pub struct OptionsAssembler {
    defaults: RecordingDefaults,
}

impl OptionsAssembler {
    pub fn new(defaults: RecordingDefaults) -> Self {
        Self { defaults }
    }

    /// Options for starting a recording called `name`. Anything neither the
    /// client nor the configuration sets is left for the target to default.
    pub fn recording_options(&self, name: &str, requested: &RequestedOptions) -> RecordingOptions {
        let mut options = RecordingOptions::default();
        options.insert(RecordingOptions::NAME, OptionValue::Text(name.to_string()));

        if let Some(duration) = requested.duration {
            options.insert(RecordingOptions::DURATION, OptionValue::Integer(duration));
        }
        if let Some(to_disk) = requested.to_disk.or(self.defaults.to_disk) {
            options.insert(RecordingOptions::TO_DISK, OptionValue::Bool(to_disk));
        }
        if let Some(max_age) = requested.max_age.or(self.defaults.max_age_ms) {
            options.insert(RecordingOptions::MAX_AGE, OptionValue::Integer(max_age));
        }
        if let Some(max_size) = requested.max_size.or(self.defaults.max_size_bytes) {
            options.insert(RecordingOptions::MAX_SIZE, OptionValue::Integer(max_size));
        }

        options
    }

    /// Effective defaults for new recordings on the session's target.
    pub async fn effective_defaults(
        &self,
        session: &dyn TargetSession,
    ) -> Result<RecordingOptionsView, ApiError> {
        let announced = session.available_recording_options().await?;
        let announced_default = |key: &str| announced.get(key).map(|o| &o.default);

        let to_disk = match self.defaults.to_disk {
            Some(to_disk) => Some(to_disk),
            None => announced_default(RecordingOptions::TO_DISK).and_then(OptionValue::as_bool),
        };
        let max_age = match self.defaults.max_age_ms {
            Some(max_age) => Some(max_age),
            None => announced_default(RecordingOptions::MAX_AGE).and_then(OptionValue::as_i64),
        };
        let max_size = match self.defaults.max_size_bytes {
            Some(max_size) => Some(max_size),
            None => announced_default(RecordingOptions::MAX_SIZE).and_then(OptionValue::as_i64),
        };

        Ok(RecordingOptionsView {
            to_disk,
            max_age,
            max_size,
        })
    }
}
