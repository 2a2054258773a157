//! Managed transfer: one call that uploads a whole source with parallel parts.
//!
//! Reading stays sequential; part uploads run as spawned tasks, at most
//! `TransferConfig::in_flight_limit` at a time. Nothing in here retries on
//! its own beyond the SDK's request-level retries: the transfer strategy
//! wraps the whole call in the backoff executor instead.

use crate::{
    models::{
        multipart::{PartResult, UploadTarget},
        transfer::TransferConfig,
    },
    services::{
        multipart::read_chunk,
        object_store::{ObjectStore, StorageError, StorageResult, content_md5},
    },
};
use bytes::Bytes;
use std::{io, sync::Arc};
use tokio::{
    io::{AsyncRead, BufReader},
    task::JoinSet,
};
use tracing::{debug, warn};

/// Result of a managed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedReceipt {
    /// Multipart upload id, `None` when the object went up in one put.
    pub upload_id: Option<String>,
    pub parts: usize,
    pub bytes: u64,
}

/// Upload everything `reader` yields to `target`.
///
/// A declared length at or below `multipart_threshold` is sent as a single
/// put; anything else becomes a multipart upload with concurrent parts.
pub async fn managed_upload<R>(
    store: &Arc<dyn ObjectStore>,
    target: &UploadTarget,
    reader: R,
    declared_len: Option<u64>,
    config: &TransferConfig,
) -> StorageResult<ManagedReceipt>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::with_capacity(config.io_chunk_size.max(1), reader);

    match declared_len {
        Some(len) if len <= config.multipart_threshold => {
            let body = read_chunk(&mut reader, len as usize).await?;
            let bytes = body.len() as u64;
            store.put_object(target, body).await?;
            debug!(key = %target.key, bytes, "Managed transfer sent a single put");
            return Ok(ManagedReceipt {
                upload_id: None,
                parts: 1,
                bytes,
            });
        }
        _ => {}
    }

    let upload_id = store.create_multipart_upload(target).await?;
    match upload_parts(store, target, &upload_id, &mut reader, config).await {
        Ok(parts) if parts.is_empty() => {
            store.abort_multipart_upload(target, &upload_id).await?;
            store.put_object(target, Bytes::new()).await?;
            Ok(ManagedReceipt {
                upload_id: None,
                parts: 1,
                bytes: 0,
            })
        }
        Ok(parts) => {
            store
                .complete_multipart_upload(target, &upload_id, &parts)
                .await?;
            Ok(ManagedReceipt {
                upload_id: Some(upload_id),
                parts: parts.len(),
                bytes: parts.iter().map(|p| p.size_bytes).sum(),
            })
        }
        Err(err) => {
            if let Err(abort_err) = store.abort_multipart_upload(target, &upload_id).await {
                warn!(
                    key = %target.key,
                    upload_id,
                    error = %abort_err,
                    "Could not abort failed managed transfer"
                );
            }
            Err(err)
        }
    }
}

/// Read parts in order and upload them concurrently. Returns the parts sorted
/// by part number.
async fn upload_parts<R>(
    store: &Arc<dyn ObjectStore>,
    target: &UploadTarget,
    upload_id: &str,
    reader: &mut R,
    config: &TransferConfig,
) -> StorageResult<Vec<PartResult>>
where
    R: AsyncRead + Unpin,
{
    let limit = config.in_flight_limit();
    let mut tasks: JoinSet<StorageResult<PartResult>> = JoinSet::new();
    let mut parts = Vec::new();
    let mut next_part = 1i32;
    let mut exhausted = false;

    loop {
        while !exhausted && tasks.len() < limit {
            let chunk = read_chunk(reader, config.multipart_chunk_size).await?;
            if chunk.is_empty() {
                exhausted = true;
                break;
            }

            let part_number = next_part;
            next_part += 1;
            let store = Arc::clone(store);
            let target = target.clone();
            let upload_id = upload_id.to_string();
            tasks.spawn(async move {
                let size_bytes = chunk.len() as u64;
                let md5 = content_md5(&chunk);
                let etag = store
                    .upload_part(&target, &upload_id, part_number, chunk, &md5)
                    .await?;
                Ok(PartResult {
                    part_number,
                    etag,
                    size_bytes,
                })
            });
        }

        match tasks.join_next().await {
            Some(Ok(Ok(part))) => parts.push(part),
            Some(Ok(Err(err))) => return Err(err),
            Some(Err(join_err)) => return Err(StorageError::Io(io::Error::other(join_err))),
            None => break,
        }
    }

    parts.sort_by_key(|p| p.part_number);
    Ok(parts)
}
