use crate::services::object_store::StorageError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value, json};
use std::{fmt, io};
use thiserror::Error;

/// Why the backoff executor gave up on an operation.
#[derive(Debug, Error)]
pub enum RetryError {
    /// Every allowed retry failed with a retriable error.
    #[error("gave up after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: StorageError,
    },

    /// The error is not retriable; it was returned after a single attempt.
    #[error("{0}")]
    Permanent(#[source] StorageError),
}

/// Failures of an upload as seen by its caller.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Failed to initiate upload: {0}")]
    Initiation(#[source] RetryError),

    #[error("Failed to upload part {part_number}: {source}")]
    Part {
        part_number: i32,
        #[source]
        source: RetryError,
    },

    #[error("Failed to complete multipart upload: {0}")]
    Completion(#[source] RetryError),

    #[error("Single-shot upload failed: {0}")]
    Put(#[source] RetryError),

    #[error("Managed transfer failed: {0}")]
    Managed(#[source] RetryError),

    #[error("No parts were successfully uploaded")]
    EmptyUpload,

    #[error("part {got} submitted out of order, expected part {expected}")]
    OutOfOrderPart { expected: i32, got: i32 },

    #[error("upload session is already {0:?}")]
    SessionClosed(crate::models::multipart::SessionState),

    #[error("{failed} of {total} files failed to upload")]
    PartialDirectoryFailure { failed: usize, total: usize },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A lightweight wrapper for errors returned to HTTP callers.
///
/// Renders as `{"error": ..., "success": false, ...}`.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    /// Extra fields merged into the JSON body (e.g. `filepath`, `upload_id`).
    pub fields: Map<String, Value>,
    /// Whether the body carries a `status` label.
    pub labelled: bool,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            fields: Map::new(),
            labelled: true,
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request (missing file, empty filename).
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for 401 with the session-expired message the UI looks for.
    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "Session expired. Please login again.",
        )
    }

    /// Attach an extra field to the JSON body.
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Drop the `status` label from the body.
    pub fn unlabelled(mut self) -> Self {
        self.labelled = false;
        self
    }

    fn status_label(&self) -> Option<&'static str> {
        if !self.labelled {
            return None;
        }
        match self.status {
            StatusCode::UNAUTHORIZED => Some("unauthorized"),
            StatusCode::BAD_REQUEST => None,
            _ => Some("error"),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = Map::new();
        body.insert("error".into(), json!(self.message));
        body.insert("success".into(), json!(false));
        if let Some(label) = self.status_label() {
            body.insert("status".into(), json!(label));
        }
        body.extend(self.fields);

        (self.status, Json(Value::Object(body))).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        AppError::internal(err.to_string())
    }
}
