//! S3 blob store built on the AWS SDK.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use tracing::{debug, info};

use crate::blob::{BlobStore, PutRequest};
use crate::error::{ArchiveError, Result};

/// Blob store backed by Amazon S3 or an S3-compatible service.
///
/// Credentials and region come from the standard AWS provider chain
/// (environment, profile files, instance metadata).
#[derive(Debug, Clone)]
pub struct S3BlobStore {
    client: Client,
}

impl S3BlobStore {
    /// Load the AWS configuration and create a client.
    ///
    /// `endpoint_url` points the client at an S3-compatible service and
    /// switches to path-style addressing.
    pub async fn connect(endpoint_url: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(url) = endpoint_url {
            loader = loader.endpoint_url(url);
        }
        let sdk_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(endpoint_url.is_some())
            .build();
        let region = sdk_config
            .region()
            .map_or_else(|| "unset".to_string(), ToString::to_string);
        info!("Created S3 client (region: {region})");

        Self {
            client: Client::from_conf(s3_config),
        }
    }

    /// Create a store from an existing client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Names of the buckets visible to the configured credentials.
    pub async fn list_buckets(&self) -> Result<Vec<String>> {
        let output = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|err| ArchiveError::BlobStore(DisplayErrorContext(&err).to_string()))?;

        Ok(output
            .buckets()
            .iter()
            .filter_map(|bucket| bucket.name().map(str::to_string))
            .collect())
    }

    /// Check that `bucket` exists and is reachable.
    pub async fn verify_bucket(&self, bucket: &str) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|err| {
                ArchiveError::BlobStore(format!(
                    "bucket {bucket} is not accessible: {}",
                    DisplayErrorContext(&err)
                ))
            })?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    fn name(&self) -> &str {
        "s3"
    }

    async fn put(&self, request: PutRequest) -> Result<()> {
        let PutRequest {
            bucket,
            key,
            content,
            storage_class,
        } = request;
        let size = content.len();

        self.client
            .put_object()
            .bucket(&bucket)
            .key(&key)
            .storage_class(aws_sdk_s3::types::StorageClass::from(storage_class.as_str()))
            .body(ByteStream::from(content))
            .send()
            .await
            .map_err(|err| ArchiveError::Upload {
                key: key.clone(),
                message: DisplayErrorContext(&err).to_string(),
            })?;

        debug!("Put s3://{bucket}/{key} ({size} bytes)");
        Ok(())
    }
}
