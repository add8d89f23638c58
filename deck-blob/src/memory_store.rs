use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::{ImageStore, ResourceId, StorageKind, StoreError, StoreResult, UploadedObject};

/// An object held by [`MemoryImageStore`]
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub mime_type: String,
}

/// In-process image store for tests and dry runs.
///
/// URLs use the `memory://` scheme and are only meaningful to callers that
/// also hold the store. Deleting a missing object is not an error.
#[derive(Debug, Clone, Default)]
pub struct MemoryImageStore {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

impl MemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a stored object
    pub fn get(&self, resource_id: &ResourceId) -> Option<StoredObject> {
        self.objects.read().get(resource_id.as_str()).cloned()
    }

    pub fn contains(&self, resource_id: &ResourceId) -> bool {
        self.objects.read().contains_key(resource_id.as_str())
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

#[async_trait]
impl ImageStore for MemoryImageStore {
    async fn upload(
        &self,
        data: Bytes,
        mime_type: &str,
        name: &str,
    ) -> StoreResult<UploadedObject> {
        if name.is_empty() {
            return Err(StoreError::invalid("object name must not be empty"));
        }

        let mut objects = self.objects.write();
        if objects.contains_key(name) {
            return Err(StoreError::upload_failed(format!("object {} already exists", name)));
        }
        objects.insert(
            name.to_string(),
            StoredObject {
                data,
                mime_type: mime_type.to_string(),
            },
        );

        Ok(UploadedObject::new(
            format!("memory://{}", name),
            ResourceId::from(name),
        ))
    }

    async fn delete(&self, resource_id: &ResourceId) -> StoreResult<()> {
        self.objects.write().remove(resource_id.as_str());
        Ok(())
    }

    fn kind(&self) -> StorageKind {
        StorageKind::Memory
    }
}
