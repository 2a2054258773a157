//! Metadata and bookkeeping for CLI directory uploads.

use serde::Serialize;
use std::path::PathBuf;

/// User-supplied labels that determine where a directory lands in the bucket.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct DirectoryUploadMetadata {
    pub user: String,
    pub camera: String,
    pub task: String,
    /// `YYYY-MM-DD`, validated before this value is built.
    pub date: String,
}

/// One discovered file and the key it will be uploaded to.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct FileUploadRecord {
    pub local_path: PathBuf,
    pub remote_key: String,
    pub size_bytes: u64,
}

/// Result of walking one top-level directory.
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectoryListing {
    pub files: Vec<FileUploadRecord>,
    /// Entries that could not be read or stat'ed; each counts as a failed file.
    pub unreadable: usize,
}

/// Outcome of uploading one top-level directory.
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectoryUploadSummary {
    pub directory: String,
    pub uploaded_files: usize,
    pub failed_files: usize,
    pub total_files: usize,
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
}

impl DirectoryUploadSummary {
    pub fn is_success(&self) -> bool {
        self.failed_files == 0
    }
}
