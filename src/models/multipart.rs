//! Represents multipart upload sessions and parts.

use serde::Serialize;
use std::time::Duration;

/// Where an object lands in the bucket.
///
/// Fixed for the lifetime of an upload once the first storage call is made.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct UploadTarget {
    /// Destination bucket.
    pub bucket: String,

    /// Slash-delimited object key (preserves the client's folder structure).
    pub key: String,
}

impl UploadTarget {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

/// Lifecycle of one multipart upload session.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Initiated,
    InProgress,
    Completing,
    Completed,
    Aborted,
    Failed,
}

impl SessionState {
    /// Whether the session can no longer accept parts.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Failed)
    }
}

/// Represents a single uploaded part in a multipart upload session.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct PartResult {
    /// Part number (1-based).
    pub part_number: i32,

    /// ETag returned by the backend for this part.
    pub etag: String,

    /// Size in bytes.
    pub size_bytes: u64,
}

/// A multipart upload session, owned by the state machine while it runs.
#[derive(Serialize, Clone, Debug)]
pub struct UploadSession {
    /// Upload id issued by the backend on initiation.
    pub upload_id: String,

    /// Object being assembled.
    pub target: UploadTarget,

    /// Parts accepted so far, ascending by part number.
    pub parts: Vec<PartResult>,

    /// Current lifecycle state.
    pub state: SessionState,
}

impl UploadSession {
    pub fn new(upload_id: impl Into<String>, target: UploadTarget) -> Self {
        Self {
            upload_id: upload_id.into(),
            target,
            parts: Vec::new(),
            state: SessionState::Initiated,
        }
    }

    /// The only part number the session will accept next.
    pub fn next_part_number(&self) -> i32 {
        self.parts.len() as i32 + 1
    }

    pub fn total_bytes(&self) -> u64 {
        self.parts.iter().map(|p| p.size_bytes).sum()
    }
}

/// What a finished upload reports back to its caller.
#[derive(Serialize, Clone, Debug)]
pub struct UploadReceipt {
    /// Object key that was written.
    pub key: String,

    /// Backend multipart upload id, absent for single-shot puts.
    pub upload_id: Option<String>,

    /// Number of parts, present only for the manual streaming path.
    pub parts: Option<usize>,

    /// Bytes sent to the backend.
    pub bytes: u64,

    /// Retries consumed across every storage call of this upload.
    pub retries: u32,

    /// Wall-clock time spent uploading.
    pub elapsed: Duration,

    /// Whether the managed (concurrent) transfer path produced the object.
    pub accelerated: bool,
}
