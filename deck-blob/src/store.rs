use async_trait::async_trait;
use bytes::Bytes;

use crate::{ResourceId, StoreResult, UploadedObject};

/// Temporary object storage the editing service fetches images from.
///
/// Implementations must return a URL that is fetchable as soon as `upload`
/// returns, and must tolerate `delete` being called once for every resource
/// they handed out.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Store image bytes under `name` and return a public URL plus a resource id
    async fn upload(
        &self,
        data: Bytes,
        mime_type: &str,
        name: &str,
    ) -> StoreResult<UploadedObject>;

    /// Delete a previously uploaded object
    async fn delete(&self, resource_id: &ResourceId) -> StoreResult<()>;

    /// Which backend this is, for logging
    fn kind(&self) -> StorageKind;
}

/// Available storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    S3,
    Memory,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S3 => "s3",
            Self::Memory => "memory",
        }
    }
}

impl std::fmt::Display for StorageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StorageKind {
    type Err = crate::StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "s3" => Ok(Self::S3),
            "memory" => Ok(Self::Memory),
            other => Err(crate::StoreError::config(format!(
                "unknown image storage backend: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_kind_parsing() {
        assert_eq!("s3".parse::<StorageKind>().unwrap(), StorageKind::S3);
        assert_eq!("".parse::<StorageKind>().unwrap(), StorageKind::S3);
        assert_eq!(" Memory ".parse::<StorageKind>().unwrap(), StorageKind::Memory);
        assert!("gdrive".parse::<StorageKind>().is_err());
    }
}
