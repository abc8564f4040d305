//! S3-compatible storage client
//!
//! Wraps the AWS SDK for S3-compatible storage access.

use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{http::HttpResponse, Credentials, Region},
    error::{DisplayErrorContext, SdkError},
    primitives::ByteStream,
    Client,
};
use bytes::Bytes;

use crate::config::StorageConfig;

use super::types::RemoteError;

/// S3-compatible storage client
#[derive(Clone)]
pub struct S3Client {
    client: Client,
    bucket: String,
}

impl S3Client {
    /// Create a new S3 client from configuration
    pub async fn new(config: &StorageConfig) -> Result<Self, RemoteError> {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "chunkvault",
        );

        let region = config
            .region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string());

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint)
            .region(Region::new(region))
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO and other S3-compatible services
            .build();

        let client = Client::from_conf(s3_config);
        let s3 = Self {
            client,
            bucket: config.bucket.clone(),
        };

        // Test connection by checking if bucket exists
        match s3.head_bucket().await {
            Ok(()) => {
                tracing::info!("Connected to S3 bucket: {}", s3.bucket);
            }
            Err(e) => {
                tracing::warn!(
                    "Could not verify bucket {}: {}. Will attempt operations anyway.",
                    s3.bucket,
                    e
                );
            }
        }

        Ok(s3)
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Check that the bucket is reachable
    pub async fn head_bucket(&self) -> Result<(), RemoteError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| classify("head bucket", &self.bucket, e))?;
        Ok(())
    }

    /// Upload an object
    pub async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), RemoteError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| classify("put object", key, e))?;
        Ok(())
    }

    /// Get an object's data
    pub async fn get_object(&self, key: &str) -> Result<Bytes, RemoteError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify("get object", key, e))?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| RemoteError::Unavailable(format!("Failed to read object body {}: {}", key, e)))?
            .into_bytes();

        Ok(data)
    }

    /// Delete an object
    pub async fn delete_object(&self, key: &str) -> Result<(), RemoteError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify("delete object", key, e))?;
        Ok(())
    }
}

/// Map SDK failures onto the remote error taxonomy
fn classify<E>(operation: &str, key: &str, err: SdkError<E, HttpResponse>) -> RemoteError
where
    E: std::error::Error + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let message = format!("Failed to {} {}: {}", operation, key, DisplayErrorContext(&err));

    match (&err, status) {
        (SdkError::TimeoutError(_) | SdkError::DispatchFailure(_), _) => RemoteError::Unavailable(message),
        (_, Some(404)) => RemoteError::NotFound(key.to_string()),
        (_, Some(408 | 429)) => RemoteError::Unavailable(message),
        (_, Some(code)) if code >= 500 => RemoteError::Unavailable(message),
        (_, Some(_)) => RemoteError::Rejected(message),
        (_, None) => RemoteError::Unavailable(message),
    }
}
