//! Health handler.
//!
//! - GET /api/health -> liveness plus the bucket and region in use

use crate::state::AppState;
use axum::{Json, extract::State};
use chrono::Utc;
use serde::Serialize;

/// `GET /api/health`
///
/// Always 200. Performs no I/O against the bucket.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let now = Utc::now();
    Json(HealthResponse {
        status: "healthy",
        timestamp: now.timestamp_micros() as f64 / 1_000_000.0,
        bucket: state.bucket().to_string(),
        region: state.region.clone(),
    })
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    /// Seconds since the Unix epoch.
    timestamp: f64,
    bucket: String,
    region: String,
}
