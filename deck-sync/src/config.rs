use crate::{SyncError, SyncResult};

/// Default admission limit for every stage
pub const DEFAULT_STAGE_CONCURRENCY: usize = 4;

/// Override for the preload stage limit
pub const ENV_PRELOAD_CONCURRENCY: &str = "DECK_PRELOAD_CONCURRENCY";
/// Override for the upload stage limit
pub const ENV_UPLOAD_CONCURRENCY: &str = "DECK_UPLOAD_CONCURRENCY";
/// Override for the cleanup stage limit
pub const ENV_CLEANUP_CONCURRENCY: &str = "DECK_CLEANUP_CONCURRENCY";

/// Per-stage admission limits.
///
/// Each stage gets its own limiter; the limits are never pooled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Maximum concurrent fetches while preloading current images
    pub preload_concurrency: usize,

    /// Maximum concurrent uploads of new images
    pub upload_concurrency: usize,

    /// Maximum concurrent deletions of temporary uploads
    pub cleanup_concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            preload_concurrency: DEFAULT_STAGE_CONCURRENCY,
            upload_concurrency: DEFAULT_STAGE_CONCURRENCY,
            cleanup_concurrency: DEFAULT_STAGE_CONCURRENCY,
        }
    }
}

impl SyncConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// One task at a time in every stage
    pub fn serial() -> Self {
        Self {
            preload_concurrency: 1,
            upload_concurrency: 1,
            cleanup_concurrency: 1,
        }
    }

    /// Set the preload limit
    pub fn with_preload_concurrency(mut self, limit: usize) -> Self {
        self.preload_concurrency = limit;
        self
    }

    /// Set the upload limit
    pub fn with_upload_concurrency(mut self, limit: usize) -> Self {
        self.upload_concurrency = limit;
        self
    }

    /// Set the cleanup limit
    pub fn with_cleanup_concurrency(mut self, limit: usize) -> Self {
        self.cleanup_concurrency = limit;
        self
    }

    /// Reject limits that would never admit any work
    pub fn validate(&self) -> SyncResult<()> {
        for (stage, limit) in [
            ("preload", self.preload_concurrency),
            ("upload", self.upload_concurrency),
            ("cleanup", self.cleanup_concurrency),
        ] {
            if limit == 0 {
                return Err(SyncError::Config(format!(
                    "{} concurrency must be at least 1",
                    stage
                )));
            }
        }
        Ok(())
    }

    /// Defaults overridden by the process environment
    pub fn from_env() -> SyncResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> SyncResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str, default: usize| -> SyncResult<usize> {
            match lookup(key).filter(|v| !v.trim().is_empty()) {
                Some(raw) => raw.trim().parse().map_err(|_| {
                    SyncError::Config(format!("{} must be a positive integer, got {:?}", key, raw))
                }),
                None => Ok(default),
            }
        };

        let config = Self {
            preload_concurrency: read(ENV_PRELOAD_CONCURRENCY, DEFAULT_STAGE_CONCURRENCY)?,
            upload_concurrency: read(ENV_UPLOAD_CONCURRENCY, DEFAULT_STAGE_CONCURRENCY)?,
            cleanup_concurrency: read(ENV_CLEANUP_CONCURRENCY, DEFAULT_STAGE_CONCURRENCY)?,
        };
        config.validate()?;
        Ok(config)
    }
}
