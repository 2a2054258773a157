//! Multipart upload state machine.
//!
//! One [`MultipartUpload`] owns one backend session from initiation to
//! completion or abort. Parts go up strictly one after another, each through
//! the backoff executor, and only one chunk is held in memory at a time.

use crate::{
    errors::UploadError,
    models::{
        multipart::{PartResult, SessionState, UploadReceipt, UploadSession, UploadTarget},
        transfer::SessionRetryPolicies,
    },
    services::{
        backoff,
        object_store::{ObjectStore, content_md5},
    },
    utils::size::format_bytes,
};
use bytes::Bytes;
use std::{io, sync::Arc};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    time::Instant,
};
use tracing::{debug, error, info, warn};

/// Log a progress line every this many parts.
const PROGRESS_EVERY: usize = 10;

pub struct MultipartUpload {
    store: Arc<dyn ObjectStore>,
    policies: SessionRetryPolicies,
    session: UploadSession,
    started: Instant,
    retries: u32,
}

impl MultipartUpload {
    /// Create the backend session. Retried aggressively since a failed
    /// initiation loses no uploaded data.
    pub async fn initiate(
        store: Arc<dyn ObjectStore>,
        target: UploadTarget,
        policies: SessionRetryPolicies,
    ) -> Result<Self, UploadError> {
        let started = Instant::now();
        let created = backoff::execute(&policies.initiate, "create_multipart_upload", || {
            store.create_multipart_upload(&target)
        })
        .await
        .map_err(|err| {
            error!(key = %target.key, error = %err, "Failed to initiate multipart upload");
            UploadError::Initiation(err)
        })?;

        info!(
            key = %target.key,
            upload_id = %created.value,
            "Multipart upload initiated"
        );

        Ok(Self {
            store,
            policies,
            session: UploadSession::new(created.value, target),
            started,
            retries: created.retries,
        })
    }

    pub fn session(&self) -> &UploadSession {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    /// Retries consumed so far by this session.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Upload the next part.
    ///
    /// `part_number` must be exactly the next expected number. If the part
    /// cannot be stored the whole session is aborted and marked `Failed`.
    pub async fn upload_part(
        &mut self,
        part_number: i32,
        chunk: Bytes,
    ) -> Result<PartResult, UploadError> {
        self.ensure_open()?;
        let expected = self.session.next_part_number();
        if part_number != expected {
            return Err(UploadError::OutOfOrderPart {
                expected,
                got: part_number,
            });
        }
        self.session.state = SessionState::InProgress;

        let size_bytes = chunk.len() as u64;
        let md5 = content_md5(&chunk);
        debug!(
            key = %self.session.target.key,
            part_number,
            size = %format_bytes(size_bytes),
            "Uploading part"
        );

        let store = &self.store;
        let target = &self.session.target;
        let upload_id = self.session.upload_id.as_str();
        let result = backoff::execute(&self.policies.part, "upload_part", || {
            store.upload_part(target, upload_id, part_number, chunk.clone(), &md5)
        })
        .await;

        match result {
            Ok(uploaded) => {
                self.retries += uploaded.retries;
                let part = PartResult {
                    part_number,
                    etag: uploaded.value,
                    size_bytes,
                };
                self.session.parts.push(part.clone());

                if self.session.parts.len() % PROGRESS_EVERY == 0 {
                    info!(
                        key = %self.session.target.key,
                        parts = self.session.parts.len(),
                        elapsed_secs = self.started.elapsed().as_secs_f64(),
                        "Upload progress"
                    );
                }
                Ok(part)
            }
            Err(source) => {
                error!(
                    key = %self.session.target.key,
                    part_number,
                    error = %source,
                    "Failed to upload part after retries"
                );
                self.fail().await;
                Err(UploadError::Part {
                    part_number,
                    source,
                })
            }
        }
    }

    /// Stitch the accumulated parts into the final object.
    pub async fn complete(mut self) -> Result<UploadReceipt, UploadError> {
        self.ensure_open()?;
        if self.session.parts.is_empty() {
            self.fail().await;
            return Err(UploadError::EmptyUpload);
        }
        self.session.state = SessionState::Completing;

        let store = &self.store;
        let target = &self.session.target;
        let upload_id = self.session.upload_id.as_str();
        let parts = self.session.parts.as_slice();
        let result = backoff::execute(&self.policies.complete, "complete_multipart_upload", || {
            store.complete_multipart_upload(target, upload_id, parts)
        })
        .await;

        match result {
            Ok(done) => {
                self.retries += done.retries;
                self.session.state = SessionState::Completed;
                let receipt = UploadReceipt {
                    key: self.session.target.key.clone(),
                    upload_id: Some(self.session.upload_id.clone()),
                    parts: Some(self.session.parts.len()),
                    bytes: self.session.total_bytes(),
                    retries: self.retries,
                    elapsed: self.started.elapsed(),
                    accelerated: false,
                };
                info!(
                    key = %receipt.key,
                    parts = self.session.parts.len(),
                    size = %format_bytes(receipt.bytes),
                    elapsed_secs = receipt.elapsed.as_secs_f64(),
                    "Multipart streaming upload completed"
                );
                Ok(receipt)
            }
            Err(err) => {
                error!(key = %self.session.target.key, error = %err, "Failed to complete multipart upload");
                self.fail().await;
                Err(UploadError::Completion(err))
            }
        }
    }

    /// Abort the backend session on request of the caller.
    pub async fn abort(&mut self) -> Result<(), UploadError> {
        self.ensure_open()?;
        if self.release().await {
            self.session.state = SessionState::Aborted;
        } else {
            self.session.state = SessionState::Failed;
        }
        Ok(())
    }

    /// Mark the session failed after releasing its backend state.
    async fn fail(&mut self) {
        self.release().await;
        self.session.state = SessionState::Failed;
    }

    /// Abort the multipart upload on the backend so its parts are not
    /// left behind. Returns whether the backend confirmed.
    async fn release(&mut self) -> bool {
        let store = &self.store;
        let target = &self.session.target;
        let upload_id = self.session.upload_id.as_str();
        match backoff::execute(&self.policies.abort, "abort_multipart_upload", || {
            store.abort_multipart_upload(target, upload_id)
        })
        .await
        {
            Ok(done) => {
                self.retries += done.retries;
                warn!(key = %target.key, upload_id, "Multipart upload aborted");
                true
            }
            Err(err) => {
                error!(
                    key = %target.key,
                    upload_id,
                    error = %err,
                    "Could not abort multipart upload; parts may remain on the backend"
                );
                false
            }
        }
    }

    fn ensure_open(&self) -> Result<(), UploadError> {
        match self.session.state {
            state if state.is_terminal() || state == SessionState::Completing => {
                Err(UploadError::SessionClosed(state))
            }
            _ => Ok(()),
        }
    }
}

/// Read up to `chunk_size` bytes, stopping early only at end of stream.
pub async fn read_chunk<R>(reader: &mut R, chunk_size: usize) -> io::Result<Bytes>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = Vec::with_capacity(chunk_size.min(8 * 1024 * 1024));
    reader.take(chunk_size as u64).read_to_end(&mut buf).await?;
    Ok(Bytes::from(buf))
}

/// Stream `reader` into a new multipart session, one chunk at a time.
pub async fn stream_upload<R>(
    store: Arc<dyn ObjectStore>,
    target: UploadTarget,
    reader: &mut R,
    chunk_size: usize,
    policies: SessionRetryPolicies,
) -> Result<UploadReceipt, UploadError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut upload = MultipartUpload::initiate(store, target, policies).await?;

    loop {
        let chunk = match read_chunk(reader, chunk_size).await {
            Ok(chunk) => chunk,
            Err(err) => {
                error!(key = %upload.session.target.key, error = %err, "Reading upload source failed");
                upload.fail().await;
                return Err(UploadError::Io(err));
            }
        };
        if chunk.is_empty() {
            break;
        }
        let part_number = upload.session.next_part_number();
        upload.upload_part(part_number, chunk).await?;
    }

    upload.complete().await
}
