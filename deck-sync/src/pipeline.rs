use std::sync::Arc;

use deck_blob::{open_store, ImageStore, StorageConfig};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    CleanupSweeper, ImageFetcher, PreloadSnapshot, Preloader, Presentation, SlideAction,
    SourceFetcher, SyncConfig, SyncResult, UploadDispatcher, UploadStream,
};

/// The image pipeline for one presentation editor.
///
/// Owns one stage of each kind, each bounded by its own limit from
/// [`SyncConfig`]. A typical edit cycle is `preload`, `start_upload`, apply
/// the edits using the uploaded URLs, then `cleanup`.
pub struct ImageSync {
    store: Arc<dyn ImageStore>,
    config: SyncConfig,
    preloader: Preloader,
    dispatcher: UploadDispatcher,
    sweeper: CleanupSweeper,
}

impl ImageSync {
    /// Create a pipeline over the given backend and fetcher
    pub fn new(
        store: Arc<dyn ImageStore>,
        fetcher: Arc<dyn ImageFetcher>,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        config.validate()?;

        Ok(Self {
            preloader: Preloader::new(fetcher, config.preload_concurrency),
            dispatcher: UploadDispatcher::new(store.clone(), config.upload_concurrency),
            sweeper: CleanupSweeper::new(store.clone(), config.cleanup_concurrency),
            store,
            config,
        })
    }

    /// Build the backend, fetcher and limits from `DECK_*` environment variables
    pub async fn from_env() -> SyncResult<Self> {
        let storage = StorageConfig::from_env()?;
        let config = SyncConfig::from_env()?;
        let store = open_store(&storage).await?;
        info!(storage = %store.kind(), ?config, "Image pipeline configured");

        Self::new(store, Arc::new(SourceFetcher::new()), config)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ImageStore> {
        &self.store
    }

    pub fn preloader(&self) -> &Preloader {
        &self.preloader
    }

    pub fn dispatcher(&self) -> &UploadDispatcher {
        &self.dispatcher
    }

    pub fn sweeper(&self) -> &CleanupSweeper {
        &self.sweeper
    }

    /// See [`Preloader::preload`]
    pub async fn preload(
        &self,
        presentation: &Presentation,
        actions: &[SlideAction],
        cancel: &CancellationToken,
    ) -> SyncResult<PreloadSnapshot> {
        self.preloader.preload(presentation, actions, cancel).await
    }

    /// See [`UploadDispatcher::start_upload`]
    pub fn start_upload(
        &self,
        actions: &[SlideAction],
        snapshot: &PreloadSnapshot,
        cancel: &CancellationToken,
    ) -> UploadStream {
        self.dispatcher.start_upload(actions, snapshot, cancel)
    }

    /// See [`CleanupSweeper::cleanup`]
    pub async fn cleanup(&self, stream: UploadStream, cancel: &CancellationToken) -> SyncResult<()> {
        self.sweeper.cleanup(stream, cancel).await
    }
}
