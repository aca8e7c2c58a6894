pub mod controller;
pub mod mapping;
pub mod options;
pub mod specifier;
pub mod templates;

pub use controller::{CreateRecordingForm, RecordingController};
