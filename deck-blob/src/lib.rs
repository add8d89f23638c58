//! # deck-blob: temporary object storage for slide images
//!
//! The presentation-editing service can only insert images it can fetch by
//! URL. `deck-blob` is the storage boundary that makes local image content
//! reachable: upload bytes, hand back a public URL and a resource id, delete
//! the object once the service has ingested it.
//!
//! ```text
//! ┌─────────────────┐
//! │   deck-sync     │  ← preload / upload / cleanup pipeline
//! ├─────────────────┤
//! │   ImageStore    │  ← upload + delete primitives
//! ├─────────────────┤
//! │ S3 │ Memory     │  ← backends
//! └─────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use deck_blob::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> StoreResult<()> {
//! let store = open_store(&StorageConfig::memory()).await?;
//!
//! let uploaded = store
//!     .upload(bytes::Bytes::from_static(b"\x89PNG"), "image/png", &temp_object_name())
//!     .await?;
//! store.delete(&uploaded.resource_id).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod memory_store;
mod s3_store;
pub mod store;
mod types;

use std::sync::Arc;

pub use config::{
    S3Config, StorageConfig, ENV_IMAGE_STORAGE, ENV_S3_ACCESS_KEY_ID, ENV_S3_BUCKET,
    ENV_S3_ENDPOINT, ENV_S3_PREFIX, ENV_S3_PRESIGN_EXPIRY_SECS, ENV_S3_REGION,
    ENV_S3_SECRET_ACCESS_KEY,
};
pub use error::{StoreError, StoreResult};
pub use memory_store::{MemoryImageStore, StoredObject};
pub use s3_store::S3ImageStore;
pub use store::{ImageStore, StorageKind};
pub use types::{temp_object_name, ResourceId, UploadedObject, TEMP_OBJECT_PREFIX};

/// Build the backend a configuration selects
pub async fn open_store(config: &StorageConfig) -> StoreResult<Arc<dyn ImageStore>> {
    match config.kind {
        StorageKind::Memory => {
            tracing::debug!("Using in-memory image storage");
            Ok(Arc::new(MemoryImageStore::new()))
        }
        StorageKind::S3 => {
            let s3 = config
                .s3
                .clone()
                .ok_or_else(|| StoreError::config("S3 storage selected without S3 settings"))?;
            tracing::debug!(bucket = %s3.bucket, "Using S3 image storage");
            Ok(Arc::new(S3ImageStore::connect(s3).await?))
        }
    }
}

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        open_store, temp_object_name, ImageStore, ResourceId, StorageConfig, StorageKind,
        StoreError, StoreResult, UploadedObject,
    };
}
