use std::sync::Arc;
use axum::{
    extract::{
        rejection::{FormRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    routing::{delete, get},
    Form, Json, Router,
};
use shared::protocol::{API_V1_PREFIX, API_V3_PREFIX};
use shared::types::{ArchivedRecording, LinkedRecordingDescriptor, RecordingOptionsView, TargetSummary};
use crate::error::ApiError;
use crate::recordings::{CreateRecordingForm, RecordingController};

#[derive(Clone)]
pub struct AppState {
    pub recordings: Arc<RecordingController>,
}

pub fn router(state: AppState) -> Router {
    let v1 = |path: &str| format!("{}{}", API_V1_PREFIX, path);
    let v3 = |path: &str| format!("{}{}", API_V3_PREFIX, path);

    Router::new()
        .route("/health", get(health))
        .route(&v1("/recordings"), get(list_archives))
        .route(&v3("/targets"), get(list_targets))
        .route(
            &v3("/targets/:id/recordings"),
            get(list_recordings).post(create_recording),
        )
        .route(
            &v3("/targets/:id/recordings/:remote_id"),
            delete(delete_recording).patch(patch_recording),
        )
        .route(&v3("/targets/:id/recordingOptions"), get(recording_options))
        .route(
            &v1("/targets/:connect_url/recordings"),
            get(list_recordings_v1).post(create_recording_v1),
        )
        .route(
            &v1("/targets/:connect_url/recordings/:recording_name"),
            delete(delete_recording_v1).patch(patch_recording_v1),
        )
        .route(
            &v1("/targets/:connect_url/recordingOptions"),
            get(recording_options_v1),
        )
        .with_state(state)
}

fn form_fields(
    form: Result<Form<CreateRecordingForm>, FormRejection>,
) -> Result<CreateRecordingForm, ApiError> {
    form.map(|Form(fields)| fields)
        .map_err(|rejection| ApiError::bad_input(rejection.body_text()))
}

fn path_params<T>(path: Result<Path<T>, PathRejection>) -> Result<T, ApiError> {
    path.map(|Path(params)| params)
        .map_err(|rejection| ApiError::bad_input(rejection.body_text()))
}

/// Only `STOP` is understood as a PATCH operation.
fn require_stop(body: &str) -> Result<(), ApiError> {
    if body.trim().eq_ignore_ascii_case("stop") {
        Ok(())
    } else {
        Err(ApiError::bad_input(format!("Unsupported operation {}", body.trim())))
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn list_archives(State(state): State<AppState>) -> Json<Vec<ArchivedRecording>> {
    Json(state.recordings.list_archives())
}

async fn list_targets(State(state): State<AppState>) -> Result<Json<Vec<TargetSummary>>, ApiError> {
    state.recordings.list_targets().await.map(Json)
}

async fn list_recordings(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<Vec<LinkedRecordingDescriptor>>, ApiError> {
    let id = path_params(path)?;
    state.recordings.list_for_target(id).await.map(Json)
}

async fn create_recording(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
    form: Result<Form<CreateRecordingForm>, FormRejection>,
) -> Result<Json<LinkedRecordingDescriptor>, ApiError> {
    let id = path_params(path)?;
    let fields = form_fields(form)?;
    state.recordings.create_recording(id, fields).await.map(Json)
}

async fn delete_recording(
    State(state): State<AppState>,
    path: Result<Path<(i64, i64)>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let (id, remote_id) = path_params(path)?;
    state.recordings.delete_recording(id, remote_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn patch_recording(
    State(state): State<AppState>,
    path: Result<Path<(i64, i64)>, PathRejection>,
    body: String,
) -> Result<Json<LinkedRecordingDescriptor>, ApiError> {
    let (id, remote_id) = path_params(path)?;
    require_stop(&body)?;
    state.recordings.stop_recording(id, remote_id).await.map(Json)
}

async fn recording_options(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<RecordingOptionsView>, ApiError> {
    let id = path_params(path)?;
    state.recordings.recording_options(id).await.map(Json)
}

async fn list_recordings_v1(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Json<Vec<LinkedRecordingDescriptor>>, ApiError> {
    let connect_url = path_params(path)?;
    state.recordings.list_for_target_v1(&connect_url).await.map(Json)
}

async fn create_recording_v1(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
    form: Result<Form<CreateRecordingForm>, FormRejection>,
) -> Result<Json<LinkedRecordingDescriptor>, ApiError> {
    let connect_url = path_params(path)?;
    let fields = form_fields(form)?;
    state.recordings.create_recording_v1(&connect_url, fields).await.map(Json)
}

async fn delete_recording_v1(
    State(state): State<AppState>,
    path: Result<Path<(String, String)>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let (connect_url, recording_name) = path_params(path)?;
    state
        .recordings
        .delete_recording_v1(&connect_url, &recording_name)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn patch_recording_v1(
    State(state): State<AppState>,
    path: Result<Path<(String, String)>, PathRejection>,
    body: String,
) -> Result<Json<LinkedRecordingDescriptor>, ApiError> {
    let (connect_url, recording_name) = path_params(path)?;
    require_stop(&body)?;
    state
        .recordings
        .stop_recording_v1(&connect_url, &recording_name)
        .await
        .map(Json)
}

async fn recording_options_v1(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Json<RecordingOptionsView>, ApiError> {
    let connect_url = path_params(path)?;
    state.recordings.recording_options_v1(&connect_url).await.map(Json)
}
