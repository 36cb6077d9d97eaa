use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_types::region::Region;
use fire_watch_common::config::StorageConfig;
use tracing::{debug, info};

use super::keys::public_url;

/// S3 (or S3-compatible) object storage for detection snapshots.
pub struct S3Storage {
    client: aws_sdk_s3::Client,
    bucket: String,
    public_base_url: Option<String>,
}

impl S3Storage {
    /// Build a client from the default AWS credential chain, or from static
    /// keys when both are configured. A custom endpoint switches to
    /// path-style addressing.
    pub async fn new(config: &StorageConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key, secret_key, None, None, "static",
            ));
        }
        let sdk_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.endpoint.is_some())
            .build();

        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
            public_base_url: config.public_base_url.clone(),
        }
    }

    /// Verify the credentials can reach the bucket.
    pub async fn check_access(&self) -> Result<(), StorageError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::HeadBucket(format!("{e:?}")))?;
        info!(bucket = self.bucket, "storage credentials verified");
        Ok(())
    }

    /// Upload a JPEG under `key` and return its public URL.
    pub async fn put_jpeg(&self, key: &str, jpeg_data: Vec<u8>) -> Result<String, StorageError> {
        let size = jpeg_data.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("image/jpeg")
            .body(ByteStream::from(jpeg_data))
            .send()
            .await
            .map_err(|e| StorageError::PutObject(format!("{e:?}")))?;

        debug!(key, size, "stored snapshot");
        Ok(public_url(self.public_base_url.as_deref(), &self.bucket, key))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("bucket is not accessible: {0}")]
    HeadBucket(String),
    #[error("failed to put object: {0}")]
    PutObject(String),
}
