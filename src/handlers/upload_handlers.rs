//! `POST /api/upload`: relay one file from a multipart form to the bucket.
//!
//! The form carries a `file` field and an optional `filepath` naming the key.
//! When `filepath` arrives first the file body is streamed straight through;
//! when the file comes first its key is not known yet, so the body is spooled
//! to disk and uploaded once the form has been read.

use crate::{
    errors::{AppError, UploadError},
    models::multipart::UploadReceipt,
    services::relay::SpooledFile,
    state::AppState,
};
use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartError},
    http::{HeaderMap, header},
};
use futures::TryStreamExt;
use serde::Serialize;
use std::io;
use tokio::time::Instant;
use tokio_util::io::StreamReader;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
    pub filepath: String,
    /// Tracking id for this request, not the storage upload id.
    pub upload_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parts: Option<usize>,
    pub time_seconds: f64,
    pub accelerated: bool,
}

pub async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let started = Instant::now();
    let tracking_id = Uuid::new_v4().to_string();
    // Length of the whole form, boundaries and other fields included.
    let request_len = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    info!(upload_id = %tracking_id, request_bytes = ?request_len, "Upload request received");

    let mut filepath: Option<String> = None;
    let mut spooled: Option<(String, SpooledFile)> = None;

    while let Some(field) = multipart.next_field().await.map_err(form_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "filepath" => {
                let value = field.text().await.map_err(form_error)?;
                filepath = Some(value).filter(|v| !v.is_empty());
            }
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                if file_name.is_empty() {
                    error!("No selected file (empty filename)");
                    return Err(AppError::bad_request("No selected file"));
                }
                let mut reader = Box::pin(StreamReader::new(field.map_err(io::Error::other)));

                if let Some(key) = filepath.clone() {
                    info!(filepath = %key, "Streaming upload straight to storage");
                    let result = state.relay.relay_stream(&key, reader, None).await;
                    return respond(key, tracking_id, started, result);
                }

                // The bundled page sends the file before its path, so every
                // browser upload lands here and needs disk room for the whole
                // file under the spool directory before storage sees a byte.
                let spool = state.relay.spool(&mut reader).await.map_err(|err| {
                    error!(error = %err, "Could not spool upload body");
                    AppError::internal(err.to_string())
                })?;
                spooled = Some((file_name, spool));
            }
            _ => {}
        }
    }

    let Some((file_name, spool)) = spooled else {
        error!("No file part in the request");
        return Err(AppError::bad_request("No file part"));
    };
    let key = filepath.unwrap_or(file_name);
    info!(filepath = %key, bytes = spool.len(), "Uploading spooled body");
    let result = state.relay.relay_spooled(&key, spool).await;
    respond(key, tracking_id, started, result)
}

fn respond(
    filepath: String,
    tracking_id: String,
    started: Instant,
    result: Result<UploadReceipt, UploadError>,
) -> Result<Json<UploadResponse>, AppError> {
    match result {
        Ok(receipt) => {
            let elapsed = started.elapsed().as_secs_f64();
            info!(
                filepath = %filepath,
                upload_id = %tracking_id,
                elapsed_secs = elapsed,
                "Upload finished"
            );
            Ok(Json(UploadResponse {
                success: true,
                message: format!("File uploaded successfully as {filepath}"),
                filepath,
                upload_id: tracking_id,
                parts: receipt.parts,
                time_seconds: elapsed,
                accelerated: receipt.accelerated,
            }))
        }
        Err(err @ UploadError::Initiation(_)) => {
            error!(filepath = %filepath, error = %err, "Failed to initiate multipart upload");
            Err(AppError::internal(err.to_string())
                .unlabelled()
                .with_field("filepath", filepath)
                .with_field("upload_id", tracking_id))
        }
        Err(err) => {
            error!(filepath = %filepath, error = %err, "Upload failed");
            Err(err.into())
        }
    }
}

fn form_error(err: MultipartError) -> AppError {
    AppError::new(err.status(), err.body_text())
}
