use std::time::Duration;

use crate::{StorageKind, StoreError, StoreResult};

/// Selects the image storage backend
pub const ENV_IMAGE_STORAGE: &str = "DECK_IMAGE_STORAGE";
/// Bucket to upload images to (required for S3)
pub const ENV_S3_BUCKET: &str = "DECK_S3_BUCKET";
/// Optional key prefix (folder path) for uploaded images
pub const ENV_S3_PREFIX: &str = "DECK_S3_PREFIX";
/// Region of the bucket
pub const ENV_S3_REGION: &str = "DECK_S3_REGION";
/// Custom endpoint for S3-compatible services (MinIO, R2, RustFS)
pub const ENV_S3_ENDPOINT: &str = "DECK_S3_ENDPOINT";
/// Access key id; falls back to the AWS default chain when unset
pub const ENV_S3_ACCESS_KEY_ID: &str = "DECK_S3_ACCESS_KEY_ID";
/// Secret access key; falls back to the AWS default chain when unset
pub const ENV_S3_SECRET_ACCESS_KEY: &str = "DECK_S3_SECRET_ACCESS_KEY";
/// Lifetime of presigned GET URLs in seconds
pub const ENV_S3_PRESIGN_EXPIRY_SECS: &str = "DECK_S3_PRESIGN_EXPIRY_SECS";

/// Configuration for the image storage layer
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub kind: StorageKind,
    /// Present when `kind` is S3
    pub s3: Option<S3Config>,
}

impl StorageConfig {
    /// In-memory storage, for tests and dry runs
    pub fn memory() -> Self {
        Self {
            kind: StorageKind::Memory,
            s3: None,
        }
    }

    /// S3-compatible storage
    pub fn s3(config: S3Config) -> Self {
        Self {
            kind: StorageKind::S3,
            s3: Some(config),
        }
    }

    /// Read configuration from the process environment
    pub fn from_env() -> StoreResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> StoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let kind: StorageKind = lookup(ENV_IMAGE_STORAGE).unwrap_or_default().parse()?;
        match kind {
            StorageKind::Memory => Ok(Self::memory()),
            StorageKind::S3 => Ok(Self::s3(S3Config::from_lookup(lookup)?)),
        }
    }
}

/// Settings for an S3-compatible bucket
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub prefix: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub presign_expiry: Duration,
}

impl S3Config {
    pub fn new<S: Into<String>>(bucket: S) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: String::new(),
            region: None,
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            presign_expiry: Duration::from_secs(3600),
        }
    }

    pub fn with_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_region<S: Into<String>>(mut self, region: S) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_credentials<A: Into<String>, S: Into<String>>(
        mut self,
        access_key_id: A,
        secret_access_key: S,
    ) -> Self {
        self.access_key_id = Some(access_key_id.into());
        self.secret_access_key = Some(secret_access_key.into());
        self
    }

    pub fn with_presign_expiry(mut self, expiry: Duration) -> Self {
        self.presign_expiry = expiry;
        self
    }

    /// Static credentials, only when both halves are configured
    pub fn static_credentials(&self) -> Option<(&str, &str)> {
        match (&self.access_key_id, &self.secret_access_key) {
            (Some(id), Some(secret)) => Some((id.as_str(), secret.as_str())),
            _ => None,
        }
    }

    fn from_lookup<F>(lookup: F) -> StoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let bucket = non_empty(ENV_S3_BUCKET).ok_or_else(|| {
            StoreError::config(format!("{} is required for S3 storage", ENV_S3_BUCKET))
        })?;

        let mut config = Self::new(bucket);
        config.prefix = non_empty(ENV_S3_PREFIX).unwrap_or_default();
        config.region = non_empty(ENV_S3_REGION);
        config.endpoint = non_empty(ENV_S3_ENDPOINT);
        config.access_key_id = non_empty(ENV_S3_ACCESS_KEY_ID);
        config.secret_access_key = non_empty(ENV_S3_SECRET_ACCESS_KEY);

        if let Some(raw) = non_empty(ENV_S3_PRESIGN_EXPIRY_SECS) {
            let secs: u64 = raw.parse().map_err(|_| {
                StoreError::config(format!(
                    "{} must be a number of seconds, got {:?}",
                    ENV_S3_PRESIGN_EXPIRY_SECS, raw
                ))
            })?;
            config.presign_expiry = Duration::from_secs(secs);
        }

        Ok(config)
    }
}
