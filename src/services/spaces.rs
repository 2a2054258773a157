//! DigitalOcean Spaces (S3-compatible) implementation of [`ObjectStore`].
//!
//! The endpoint is chosen once, when the client is built: the accelerated
//! endpoint if the bucket's accelerate configuration can be read (and turned
//! on when needed), otherwise the standard regional endpoint for the rest of
//! the process lifetime.

use crate::{
    config::StorageSettings,
    models::multipart::{PartResult, UploadTarget},
    services::object_store::{ObjectStore, StorageError, StorageResult, TransportKind},
};
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{
        BehaviorVersion, Builder, Credentials, Region, retry::RetryConfig, timeout::TimeoutConfig,
    },
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::ByteStream,
    types::{
        AccelerateConfiguration, BucketAccelerateStatus, CompletedMultipartUpload, CompletedPart,
    },
};
use bytes::Bytes;
use std::{error::Error, fmt, io, sync::Arc, time::Duration};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{info, warn};

/// Connect and read timeouts. Long enough that retries, not deadlines,
/// decide when to give up.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// SDK-level attempts per request (adaptive mode), below our own backoff.
const SDK_MAX_ATTEMPTS: u32 = 10;

/// Requests allowed in flight across all uploads in the process.
pub const MAX_POOL_CONNECTIONS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointMode {
    Accelerated,
    Standard,
}

#[derive(Clone)]
pub struct SpacesClient {
    client: Client,
    endpoint: EndpointMode,
    permits: Arc<Semaphore>,
}

impl fmt::Debug for SpacesClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpacesClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl SpacesClient {
    /// Build the client and settle the endpoint for the process lifetime.
    pub async fn connect(settings: &StorageSettings) -> Self {
        if !settings.use_acceleration {
            info!(endpoint = %settings.endpoint, "Using standard S3 endpoint");
            return Self::with_client(build_client(settings, false), EndpointMode::Standard);
        }

        let accelerated = build_client(settings, true);
        info!(
            endpoint = %format!("https://{}.s3-accelerate.amazonaws.com", settings.bucket),
            "Using S3 Transfer Acceleration endpoint"
        );

        match ensure_acceleration(&accelerated, &settings.bucket).await {
            Ok(()) => Self::with_client(accelerated, EndpointMode::Accelerated),
            Err(err) => {
                warn!(bucket = %settings.bucket, error = %err, "Could not enable Transfer Acceleration");
                warn!(endpoint = %settings.endpoint, "Will proceed with standard endpoint");
                Self::with_client(build_client(settings, false), EndpointMode::Standard)
            }
        }
    }

    fn with_client(client: Client, endpoint: EndpointMode) -> Self {
        Self {
            client,
            endpoint,
            permits: Arc::new(Semaphore::new(MAX_POOL_CONNECTIONS)),
        }
    }

    pub fn endpoint(&self) -> EndpointMode {
        self.endpoint
    }

    async fn permit(&self) -> StorageResult<SemaphorePermit<'_>> {
        self.permits
            .acquire()
            .await
            .map_err(|err| StorageError::Io(io::Error::other(err)))
    }
}

fn build_client(settings: &StorageSettings, accelerate: bool) -> Client {
    let credentials = Credentials::new(
        settings.access_key.clone(),
        settings.secret_key.clone(),
        None,
        None,
        "spaces-relay",
    );
    let timeouts = TimeoutConfig::builder()
        .connect_timeout(REQUEST_TIMEOUT)
        .read_timeout(REQUEST_TIMEOUT)
        .build();

    let builder = Builder::new()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new(settings.region.clone()))
        .credentials_provider(credentials)
        .retry_config(RetryConfig::adaptive().with_max_attempts(SDK_MAX_ATTEMPTS))
        .timeout_config(timeouts);

    let builder = if accelerate {
        builder.accelerate(true)
    } else {
        builder.endpoint_url(settings.endpoint.clone())
    };

    Client::from_conf(builder.build())
}

/// Make sure transfer acceleration is enabled on `bucket`.
async fn ensure_acceleration(client: &Client, bucket: &str) -> StorageResult<()> {
    info!(bucket, "Checking Transfer Acceleration status");
    let current = client
        .get_bucket_accelerate_configuration()
        .bucket(bucket)
        .send()
        .await
        .map_err(map_sdk_error)?;

    if current.status() == Some(&BucketAccelerateStatus::Enabled) {
        info!(bucket, "Transfer Acceleration already enabled");
        return Ok(());
    }

    info!(bucket, "Enabling Transfer Acceleration");
    client
        .put_bucket_accelerate_configuration()
        .bucket(bucket)
        .accelerate_configuration(
            AccelerateConfiguration::builder()
                .status(BucketAccelerateStatus::Enabled)
                .build(),
        )
        .send()
        .await
        .map_err(map_sdk_error)?;
    info!(bucket, "Transfer Acceleration enabled successfully");
    Ok(())
}

/// Translate an SDK failure into the retry classification used upstream.
pub fn map_sdk_error<E, R>(err: SdkError<E, R>) -> StorageError
where
    E: ProvideErrorMetadata + Error + 'static,
    R: fmt::Debug,
{
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::TimeoutError(_) => StorageError::transport(TransportKind::Timeout, message),
        SdkError::DispatchFailure(failure) => {
            let kind = if failure.is_timeout() {
                TransportKind::Timeout
            } else if failure.is_io() {
                TransportKind::ConnectionReset
            } else {
                TransportKind::Dispatch
            };
            StorageError::transport(kind, message)
        }
        SdkError::ResponseError(_) => StorageError::transport(TransportKind::Response, message),
        SdkError::ServiceError(context) => {
            let service_err = context.err();
            StorageError::service(
                service_err.code().unwrap_or("Unknown"),
                service_err.message().unwrap_or(&message),
            )
        }
        _ => StorageError::service("ConstructionFailure", message),
    }
}

#[async_trait]
impl ObjectStore for SpacesClient {
    async fn create_multipart_upload(&self, target: &UploadTarget) -> StorageResult<String> {
        let _permit = self.permit().await?;
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&target.bucket)
            .key(&target.key)
            .send()
            .await
            .map_err(map_sdk_error)?;

        output
            .upload_id()
            .map(str::to_owned)
            .ok_or_else(|| StorageError::MalformedResponse("missing UploadId".into()))
    }

    async fn upload_part(
        &self,
        target: &UploadTarget,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
        content_md5: &str,
    ) -> StorageResult<String> {
        let _permit = self.permit().await?;
        let output = self
            .client
            .upload_part()
            .bucket(&target.bucket)
            .key(&target.key)
            .upload_id(upload_id)
            .part_number(part_number)
            .content_md5(content_md5)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(map_sdk_error)?;

        output
            .e_tag()
            .map(str::to_owned)
            .ok_or_else(|| StorageError::MalformedResponse(format!("part {part_number} has no ETag")))
    }

    async fn complete_multipart_upload(
        &self,
        target: &UploadTarget,
        upload_id: &str,
        parts: &[PartResult],
    ) -> StorageResult<()> {
        let completed = parts
            .iter()
            .map(|part| {
                CompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(&part.etag)
                    .build()
            })
            .collect::<Vec<_>>();

        let _permit = self.permit().await?;
        self.client
            .complete_multipart_upload()
            .bucket(&target.bucket)
            .key(&target.key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        target: &UploadTarget,
        upload_id: &str,
    ) -> StorageResult<()> {
        let _permit = self.permit().await?;
        self.client
            .abort_multipart_upload()
            .bucket(&target.bucket)
            .key(&target.key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    async fn put_object(&self, target: &UploadTarget, body: Bytes) -> StorageResult<String> {
        let _permit = self.permit().await?;
        let output = self
            .client
            .put_object()
            .bucket(&target.bucket)
            .key(&target.key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(map_sdk_error)?;

        Ok(output.e_tag().unwrap_or_default().to_string())
    }
}
