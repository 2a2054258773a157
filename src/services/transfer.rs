//! Transfer strategy: pick the managed or manual path for one upload.
//!
//! Large rewindable sources first try the managed (concurrent-part) transfer.
//! If that fails the upload degrades to the manual streaming path instead of
//! failing, and the receipt records that acceleration was not used.

use crate::{
    errors::UploadError,
    models::{
        multipart::{UploadReceipt, UploadTarget},
        transfer::TransferPolicy,
    },
    services::{
        backoff,
        managed::managed_upload,
        multipart::{read_chunk, stream_upload},
        object_store::ObjectStore,
    },
    utils::size::{format_bytes, format_size},
};
use std::{
    fmt,
    path::{Path, PathBuf},
    pin::Pin,
    sync::Arc,
};
use tokio::{fs::File, io::AsyncRead, time::Instant};
use tracing::{error, info};

/// Where the bytes of an upload come from.
pub enum UploadBody<'a> {
    /// A one-shot stream, e.g. a request body. Cannot be replayed.
    Stream(Pin<Box<dyn AsyncRead + Send + 'a>>),
    /// A local file, reopened from the start whenever a path needs it.
    File(PathBuf),
}

impl UploadBody<'_> {
    pub fn is_rewindable(&self) -> bool {
        matches!(self, Self::File(_))
    }
}

impl fmt::Debug for UploadBody<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream(_) => f.write_str("Stream"),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPlan {
    /// Concurrent parts through the managed transfer, manual path as fallback.
    Managed,
    /// One put request for a small object of known size.
    SinglePut,
    /// Sequential multipart streaming.
    Manual,
}

/// Result of the managed attempt.
#[derive(Debug)]
pub enum ManagedOutcome {
    Succeeded(UploadReceipt),
    DegradeToManual(String),
}

#[derive(Clone)]
pub struct TransferStrategy {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    policy: TransferPolicy,
}

impl TransferStrategy {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>, policy: TransferPolicy) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            policy,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Decide how an upload of `declared_len` bytes should travel.
    pub fn plan(&self, declared_len: Option<u64>, rewindable: bool) -> TransferPlan {
        let policy = &self.policy;
        match declared_len {
            Some(len) if len > policy.managed_threshold && policy.managed_enabled && rewindable => {
                TransferPlan::Managed
            }
            Some(len) if len <= policy.managed_threshold && policy.small_object_put => {
                TransferPlan::SinglePut
            }
            _ => TransferPlan::Manual,
        }
    }

    /// Upload `body` to `key` using the planned path.
    pub async fn upload(
        &self,
        key: &str,
        body: UploadBody<'_>,
        declared_len: Option<u64>,
    ) -> Result<UploadReceipt, UploadError> {
        let started = Instant::now();
        let target = UploadTarget::new(&self.bucket, key);
        let plan = self.plan(declared_len, body.is_rewindable());
        info!(
            key,
            size = %format_size(declared_len.map(|n| n as f64)),
            ?plan,
            "Preparing upload"
        );

        if plan == TransferPlan::Managed {
            let path = match &body {
                UploadBody::File(path) => Some(path.clone()),
                UploadBody::Stream(_) => None,
            };
            if let Some(path) = path {
                match self.try_managed(&target, &path, declared_len).await {
                    ManagedOutcome::Succeeded(receipt) => return Ok(receipt),
                    ManagedOutcome::DegradeToManual(reason) => {
                        error!(key, reason = %reason, "Accelerated upload failed");
                        error!(key, "Falling back to manual streaming upload");
                    }
                }
            }
        }

        let mut receipt = match plan {
            TransferPlan::SinglePut => self.single_put(&target, body, declared_len).await?,
            TransferPlan::Managed | TransferPlan::Manual => self.manual(&target, body).await?,
        };
        receipt.elapsed = started.elapsed();
        Ok(receipt)
    }

    /// One managed transfer call, retried as a whole. Each attempt reopens
    /// the file so a retry never resumes from a half-read position.
    pub async fn try_managed(
        &self,
        target: &UploadTarget,
        path: &Path,
        declared_len: Option<u64>,
    ) -> ManagedOutcome {
        let started = Instant::now();
        let store = &self.store;
        let config = &self.policy.transfer;
        info!(
            key = %target.key,
            size = %format_size(declared_len.map(|n| n as f64)),
            "Using optimized managed transfer for large file"
        );

        let result = backoff::execute(&self.policy.managed_retry, "managed_upload", || async move {
            let file = File::open(path).await?;
            managed_upload(store, target, file, declared_len, config).await
        })
        .await;

        match result {
            Ok(done) => {
                let receipt = UploadReceipt {
                    key: target.key.clone(),
                    upload_id: done.value.upload_id,
                    parts: None,
                    bytes: done.value.bytes,
                    retries: done.retries,
                    elapsed: started.elapsed(),
                    accelerated: true,
                };
                info!(
                    key = %receipt.key,
                    size = %format_bytes(receipt.bytes),
                    elapsed_secs = receipt.elapsed.as_secs_f64(),
                    "Accelerated upload completed"
                );
                ManagedOutcome::Succeeded(receipt)
            }
            Err(err) => ManagedOutcome::DegradeToManual(UploadError::Managed(err).to_string()),
        }
    }

    async fn single_put(
        &self,
        target: &UploadTarget,
        body: UploadBody<'_>,
        declared_len: Option<u64>,
    ) -> Result<UploadReceipt, UploadError> {
        let started = Instant::now();
        let bytes = match body {
            UploadBody::File(path) => bytes::Bytes::from(tokio::fs::read(&path).await?),
            UploadBody::Stream(mut stream) => {
                read_chunk(&mut stream, declared_len.unwrap_or_default() as usize).await?
            }
        };
        let size = bytes.len() as u64;

        let store = &self.store;
        let put = backoff::execute(&self.policy.put_retry, "put_object", || {
            store.put_object(target, bytes.clone())
        })
        .await
        .map_err(UploadError::Put)?;

        let receipt = UploadReceipt {
            key: target.key.clone(),
            upload_id: None,
            parts: None,
            bytes: size,
            retries: put.retries,
            elapsed: started.elapsed(),
            accelerated: false,
        };
        info!(
            key = %receipt.key,
            size = %format_bytes(size),
            elapsed_secs = receipt.elapsed.as_secs_f64(),
            "Upload completed"
        );
        Ok(receipt)
    }

    async fn manual(
        &self,
        target: &UploadTarget,
        body: UploadBody<'_>,
    ) -> Result<UploadReceipt, UploadError> {
        let chunk_size = self.policy.manual_chunk_size;
        let policies = self.policy.session;
        match body {
            UploadBody::Stream(mut stream) => {
                stream_upload(self.store.clone(), target.clone(), &mut stream, chunk_size, policies)
                    .await
            }
            UploadBody::File(path) => {
                let mut file = File::open(&path).await?;
                stream_upload(self.store.clone(), target.clone(), &mut file, chunk_size, policies)
                    .await
            }
        }
    }
}
