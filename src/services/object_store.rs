//! The storage capability the upload pipeline is written against.
//!
//! Production uses [`crate::services::spaces::SpacesClient`]; tests plug in an
//! in-memory fake. Every method maps to exactly one backend request so the
//! backoff executor can wrap each call individually.

use crate::models::multipart::{PartResult, UploadTarget};
use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use thiserror::Error;

/// Service error codes that are worth retrying.
pub const RETRIABLE_ERROR_CODES: [&str; 6] = [
    "RequestTimeout",
    "InternalError",
    "ServiceUnavailable",
    "SlowDown",
    "ThrottlingException",
    "RequestLimitExceeded",
];

/// Transport-level failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Timeout,
    ConnectionReset,
    Dispatch,
    Response,
}

#[derive(Debug, Error)]
pub enum StorageError {
    /// The request never produced a service response.
    #[error("transport error ({kind:?}): {message}")]
    Transport { kind: TransportKind, message: String },

    /// The service answered with an error code.
    #[error("{code}: {message}")]
    Service { code: String, message: String },

    /// A response arrived but lacked a field the protocol requires.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StorageError {
    pub fn service(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Service {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn transport(kind: TransportKind, message: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: message.into(),
        }
    }

    /// Transient network failures, local I/O failures and the allow-listed
    /// service codes are retriable. Everything else fails fast.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Io(_) => true,
            Self::Service { code, .. } => RETRIABLE_ERROR_CODES.contains(&code.as_str()),
            Self::MalformedResponse(_) => false,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Service { code, .. } => Some(code),
            _ => None,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Multipart and single-shot object writes against one backend.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Start a multipart upload and return the backend's upload id.
    async fn create_multipart_upload(&self, target: &UploadTarget) -> StorageResult<String>;

    /// Upload one part and return its ETag.
    ///
    /// `content_md5` is the base64 MD5 of `body`, checked by the backend.
    async fn upload_part(
        &self,
        target: &UploadTarget,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
        content_md5: &str,
    ) -> StorageResult<String>;

    /// Stitch the listed parts into the final object.
    async fn complete_multipart_upload(
        &self,
        target: &UploadTarget,
        upload_id: &str,
        parts: &[PartResult],
    ) -> StorageResult<()>;

    /// Discard a multipart upload and every part stored under it.
    async fn abort_multipart_upload(&self, target: &UploadTarget, upload_id: &str)
    -> StorageResult<()>;

    /// Write a whole object in one request and return its ETag.
    async fn put_object(&self, target: &UploadTarget, body: Bytes) -> StorageResult<String>;
}

/// Base64 MD5 digest in the form the `Content-MD5` header expects.
pub fn content_md5(body: &[u8]) -> String {
    use base64::{Engine as _, engine::general_purpose};
    general_purpose::STANDARD.encode(md5::compute(body).0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_listed_codes_are_retriable() {
        for code in RETRIABLE_ERROR_CODES {
            assert!(StorageError::service(code, "x").is_retriable(), "{code}");
        }
    }

    #[test]
    fn other_codes_fail_fast() {
        assert!(!StorageError::service("AccessDenied", "nope").is_retriable());
        assert!(!StorageError::service("NoSuchBucket", "gone").is_retriable());
        assert!(!StorageError::MalformedResponse("no etag".into()).is_retriable());
    }

    #[test]
    fn transport_and_io_are_retriable() {
        assert!(StorageError::transport(TransportKind::ConnectionReset, "reset").is_retriable());
        assert!(StorageError::transport(TransportKind::Timeout, "slow").is_retriable());
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe");
        assert!(StorageError::from(io_err).is_retriable());
    }

    #[test]
    fn md5_of_empty_body() {
        assert_eq!(content_md5(b""), "1B2M2Y8AsgTpgAmY7PhCfg==");
    }
}
