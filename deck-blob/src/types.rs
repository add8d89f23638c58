use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix of every temporary object the pipeline uploads
pub const TEMP_OBJECT_PREFIX: &str = "________tmp-for-deck-";

/// Opaque handle a backend returns for an uploaded object, used only for deletion
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId(pub String);

impl ResourceId {
    /// Create from existing string
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ResourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Result of a successful upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedObject {
    /// URL the editing service can fetch immediately
    pub public_url: String,
    /// Handle for the later delete
    pub resource_id: ResourceId,
}

impl UploadedObject {
    pub fn new<S: Into<String>>(public_url: S, resource_id: ResourceId) -> Self {
        Self {
            public_url: public_url.into(),
            resource_id,
        }
    }
}

/// Generate a fresh name for a temporary upload.
///
/// The timestamp keeps objects sortable in a bucket listing; the uuid keeps
/// names distinct when several uploads start within the same second.
pub fn temp_object_name() -> String {
    format!(
        "{}{}-{}",
        TEMP_OBJECT_PREFIX,
        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
        Uuid::new_v4().simple()
    )
}
