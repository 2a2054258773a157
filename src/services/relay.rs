//! The server side of an upload: hand a request body to the transfer
//! strategy, either straight from the socket or through a spool file.

use crate::{
    errors::UploadError,
    models::multipart::UploadReceipt,
    services::transfer::{TransferStrategy, UploadBody},
};
use std::{
    io,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::debug;

/// A request body copied to disk. The file is removed on drop.
#[derive(Debug)]
pub struct SpooledFile {
    file: NamedTempFile,
    len: u64,
}

impl SpooledFile {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Clone)]
pub struct UploadRelay {
    strategy: TransferStrategy,
    spool_dir: PathBuf,
}

impl UploadRelay {
    pub fn new(strategy: TransferStrategy, spool_dir: impl Into<PathBuf>) -> Self {
        Self {
            strategy,
            spool_dir: spool_dir.into(),
        }
    }

    pub fn strategy(&self) -> &TransferStrategy {
        &self.strategy
    }

    /// Upload a one-shot body without touching the disk.
    pub async fn relay_stream<'a, R>(
        &self,
        key: &str,
        reader: R,
        declared_len: Option<u64>,
    ) -> Result<UploadReceipt, UploadError>
    where
        R: AsyncRead + Send + 'a,
    {
        self.strategy
            .upload(key, UploadBody::Stream(Box::pin(reader)), declared_len)
            .await
    }

    /// Copy `reader` into a fresh temp file under the spool directory.
    pub async fn spool<R>(&self, reader: &mut R) -> io::Result<SpooledFile>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let file = tempfile::Builder::new()
            .prefix("upload-")
            .tempfile_in(&self.spool_dir)?;
        let mut out = tokio::fs::File::from_std(file.reopen()?);
        let len = tokio::io::copy(reader, &mut out).await?;
        out.flush().await?;
        debug!(path = %file.path().display(), bytes = len, "Spooled request body");
        Ok(SpooledFile { file, len })
    }

    /// Upload a spooled body with its exact length, then remove the file.
    pub async fn relay_spooled(
        &self,
        key: &str,
        spooled: SpooledFile,
    ) -> Result<UploadReceipt, UploadError> {
        let body = UploadBody::File(spooled.path().to_path_buf());
        let result = self.strategy.upload(key, body, Some(spooled.len())).await;
        drop(spooled);
        result
    }
}
