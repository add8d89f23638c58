use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::{SyncError, SyncResult};

/// Raw content of an image source
#[derive(Debug, Clone)]
pub struct FetchedContent {
    pub bytes: Bytes,
    /// `Content-Type` reported by the source, if any
    pub content_type: Option<String>,
}

/// Reads the bytes behind an image source reference
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, source: &str) -> SyncResult<FetchedContent>;
}

/// True for references the editing service can fetch on its own
pub fn is_remote_source(source: &str) -> bool {
    let lower = source.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Fetches `http(s)` sources over the network and everything else from disk
#[derive(Debug, Clone, Default)]
pub struct SourceFetcher {
    client: reqwest::Client,
}

impl SourceFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured HTTP client (timeouts, proxies, auth)
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch_remote(&self, url: &str) -> SyncResult<FetchedContent> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SyncError::fetch(url, e))?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        let bytes = response.bytes().await.map_err(|e| SyncError::fetch(url, e))?;
        debug!(url, size = bytes.len(), "Fetched remote image");

        Ok(FetchedContent { bytes, content_type })
    }

    async fn fetch_local(&self, source: &str) -> SyncResult<FetchedContent> {
        let path = source.strip_prefix("file://").unwrap_or(source);
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| SyncError::fetch(source, e))?;
        debug!(path, size = data.len(), "Read local image");

        Ok(FetchedContent {
            bytes: Bytes::from(data),
            content_type: None,
        })
    }
}

#[async_trait]
impl ImageFetcher for SourceFetcher {
    async fn fetch(&self, source: &str) -> SyncResult<FetchedContent> {
        if source.trim().is_empty() {
            return Err(SyncError::fetch(source, "empty image source"));
        }
        if is_remote_source(source) {
            self.fetch_remote(source).await
        } else {
            self.fetch_local(source).await
        }
    }
}
