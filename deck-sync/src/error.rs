use deck_blob::StoreError;
use thiserror::Error;

/// Result type for pipeline operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Boxed error carried from fetchers and backends
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by the image pipeline
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Failed to fetch image {source_ref}: {source}")]
    Fetch {
        source_ref: String,
        #[source]
        source: BoxError,
    },

    #[error("Unsupported image type for {source_ref}: {detail}")]
    UnsupportedMimeType { source_ref: String, detail: String },

    #[error("Failed to preload {failed} image(s): {first}")]
    Preload {
        failed: usize,
        #[source]
        first: Box<SyncError>,
    },

    #[error("Upload failed: {reason}")]
    Upload { reason: String },

    #[error("Image upload was never scheduled")]
    NotScheduled,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Worker task failed: {0}")]
    Task(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    /// Create a fetch error from any error type
    pub fn fetch<S, E>(source_ref: S, error: E) -> Self
    where
        S: Into<String>,
        E: Into<BoxError>,
    {
        Self::Fetch {
            source_ref: source_ref.into(),
            source: error.into(),
        }
    }

    /// Create an unsupported MIME type error
    pub fn unsupported_mime<S: Into<String>, D: Into<String>>(source_ref: S, detail: D) -> Self {
        Self::UnsupportedMimeType {
            source_ref: source_ref.into(),
            detail: detail.into(),
        }
    }

    /// Create an upload failure
    pub fn upload<S: Into<String>>(reason: S) -> Self {
        Self::Upload {
            reason: reason.into(),
        }
    }

    /// Aggregate the failures of a stage into one error.
    ///
    /// Returns `None` when `errors` is empty.
    pub fn preload(mut errors: Vec<SyncError>) -> Option<Self> {
        if errors.is_empty() {
            return None;
        }
        let failed = errors.len();
        let first = errors.swap_remove(0);
        Some(Self::Preload {
            failed,
            first: Box::new(first),
        })
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preload_aggregation() {
        assert!(SyncError::preload(Vec::new()).is_none());

        let err = SyncError::preload(vec![
            SyncError::fetch("https://a", "boom"),
            SyncError::fetch("https://b", "bang"),
        ])
        .unwrap();

        match &err {
            SyncError::Preload { failed, first } => {
                assert_eq!(*failed, 2);
                assert!(first.to_string().contains("https://a"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().starts_with("Failed to preload 2 image(s)"));
    }
}
