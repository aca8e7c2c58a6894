use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use crate::session::SessionError;
use crate::store::StoreError;

/// Message reported when a session call fails outside the delete path.
pub const TARGET_CONNECTION_FAILED: &str = "Target connection failed";
/// Message reported when closing a remote recording fails for a reason other
/// than the flight recorder itself.
pub const FAILED_TO_STOP: &str = "Failed to stop remote recording";

/// Errors surfaced by the recording endpoints, one variant per HTTP outcome.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadInput(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    Upstream {
        message: String,
        #[source]
        source: SessionError,
    },

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl ApiError {
    pub fn bad_input(message: impl Into<String>) -> Self {
        ApiError::BadInput(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn upstream(message: impl Into<String>, source: SessionError) -> Self {
        ApiError::Upstream {
            message: message.into(),
            source,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadInput(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream { .. } | ApiError::Unexpected(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        ApiError::upstream(TARGET_CONNECTION_FAILED, err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ApiError::NotFound(format!("{} not found", what)),
            StoreError::Conflict(message) => ApiError::BadInput(message),
            other => ApiError::Unexpected(other.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Upstream { message, source } => {
                tracing::error!("{}: {}", message, source);
            }
            ApiError::Unexpected(e) => {
                tracing::error!("Unexpected error: {:?}", e);
            }
            _ => {}
        }

        let status = self.status();
        let message = match &self {
            ApiError::Unexpected(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        (status, Json(ErrorBody { message })).into_response()
    }
}
