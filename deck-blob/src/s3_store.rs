use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream as AwsByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::{debug, warn};

use crate::{ImageStore, ResourceId, S3Config, StorageKind, StoreError, StoreResult, UploadedObject};

/// S3-compatible image store.
///
/// Objects are private; the editing service reads them through a presigned
/// GET URL that stays valid for `presign_expiry`.
#[derive(Clone)]
pub struct S3ImageStore {
    client: Client,
    bucket: String,
    prefix: String,
    presign_expiry: std::time::Duration,
}

impl S3ImageStore {
    /// Build a client from the configuration, falling back to the AWS default
    /// credential and region chain for anything not set
    pub async fn connect(config: S3Config) -> StoreResult<Self> {
        if config.bucket.is_empty() {
            return Err(StoreError::config("S3 bucket name must not be empty"));
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some((id, secret)) = config.static_credentials() {
            loader = loader.credentials_provider(Credentials::new(id, secret, None, None, "deck"));
        }
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint.clone());
        }
        let aws_config = loader.load().await;

        let client = Client::from_conf(
            aws_sdk_s3::config::Builder::from(&aws_config)
                // Required by most S3-compatible services
                .force_path_style(config.endpoint.is_some())
                .build(),
        );

        Ok(Self::from_client(client, config))
    }

    /// Wrap an already configured client
    pub fn from_client(client: Client, config: S3Config) -> Self {
        Self {
            client,
            bucket: config.bucket,
            prefix: config.prefix,
            presign_expiry: config.presign_expiry,
        }
    }

    fn object_key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    async fn presign_get(&self, key: &str) -> StoreResult<String> {
        let presigning = PresigningConfig::expires_in(self.presign_expiry).map_err(StoreError::backend)?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(StoreError::backend)?;
        Ok(request.uri().to_string())
    }

    /// Presign a stored object, removing it again when presigning fails
    async fn publish(&self, key: String) -> StoreResult<UploadedObject> {
        match self.presign_get(&key).await {
            Ok(url) => Ok(UploadedObject::new(url, ResourceId::from_string(key))),
            Err(e) => {
                // Nobody will ever learn this key, so remove the object now
                if let Err(cleanup) = self.delete(&ResourceId::from(key.as_str())).await {
                    warn!(key = %key, error = %cleanup, "Failed to remove object after presign failure");
                }
                Err(StoreError::upload_failed(format!(
                    "failed to presign URL for {}: {}",
                    key, e
                )))
            }
        }
    }
}

#[async_trait]
impl ImageStore for S3ImageStore {
    async fn upload(
        &self,
        data: Bytes,
        mime_type: &str,
        name: &str,
    ) -> StoreResult<UploadedObject> {
        let key = self.object_key(name);
        let size = data.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(mime_type)
            .body(AwsByteStream::from(data))
            .send()
            .await
            .map_err(StoreError::backend)?;

        debug!(bucket = %self.bucket, key = %key, size, "Uploaded image object");

        self.publish(key).await
    }

    async fn delete(&self, resource_id: &ResourceId) -> StoreResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(resource_id.as_str())
            .send()
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    fn kind(&self) -> StorageKind {
        StorageKind::S3
    }
}
