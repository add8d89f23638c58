//! # deck-sync: image pipeline for slide deck edits
//!
//! Rewriting a slide means knowing which images it already shows, getting
//! every new image somewhere the editing service can fetch it, and removing
//! those temporary copies afterwards. `deck-sync` runs the three stages, each
//! with its own bounded worker pool:
//!
//! ```text
//!  Presentation + SlideActions
//!            │
//!   ┌────────▼────────┐
//!   │    Preloader    │  fetch current images, all or nothing
//!   └────────┬────────┘
//!            │ PreloadSnapshot
//!   ┌────────▼────────┐
//!   │ UploadDispatcher│  claim + upload new images in the background
//!   └────────┬────────┘
//!            │ UploadStream (one event per upload)
//!   ┌────────▼────────┐
//!   │ CleanupSweeper  │  delete temporary objects, best effort
//!   └─────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use deck_blob::MemoryImageStore;
//! use deck_sync::prelude::*;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> SyncResult<()> {
//! let sync = ImageSync::new(
//!     Arc::new(MemoryImageStore::new()),
//!     Arc::new(SourceFetcher::new()),
//!     SyncConfig::default(),
//! )?;
//! let cancel = CancellationToken::new();
//!
//! let diagram = Image::from_bytes(Bytes::from_static(b"\x89PNG\r\n\x1a\n"), MimeType::Png);
//! let actions = vec![SlideAction::append(0, Slide::new("body").with_image(diagram.clone()))];
//!
//! let snapshot = sync.preload(&Presentation::default(), &actions, &cancel).await?;
//! let uploads = sync.start_upload(&actions, &snapshot, &cancel);
//!
//! let url = diagram.wait_uploaded_url().await?;
//! assert!(url.starts_with("memory://"));
//!
//! sync.cleanup(uploads, &cancel).await?;
//! # Ok(())
//! # }
//! ```

mod cleanup;
mod config;
mod dispatch;
mod error;
mod fetch;
mod image;
mod limiter;
mod pipeline;
mod preload;
mod presentation;

#[cfg(feature = "tracing-basic")]
pub mod observability;

pub use cleanup::CleanupSweeper;
pub use config::{
    SyncConfig, DEFAULT_STAGE_CONCURRENCY, ENV_CLEANUP_CONCURRENCY, ENV_PRELOAD_CONCURRENCY,
    ENV_UPLOAD_CONCURRENCY,
};
pub use dispatch::{completion_channel, UploadDispatcher, UploadStream, UploadedImage};
pub use error::{BoxError, SyncError, SyncResult};
pub use fetch::{is_remote_source, FetchedContent, ImageFetcher, SourceFetcher};
pub use image::{Image, MimeType, UploadClaim, UploadState, ABANDONED_UPLOAD};
pub use limiter::{AdmissionLimiter, AdmissionPermit};
pub use pipeline::ImageSync;
pub use preload::{PreloadSnapshot, PreloadedSlide, Preloader};
pub use presentation::{
    ActionKind, EmbeddedImage, Page, PageElement, Presentation, Slide, SlideAction,
    MARKDOWN_IMAGE_DESCRIPTION,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        ActionKind, CleanupSweeper, Image, ImageFetcher, ImageSync, MimeType, PreloadSnapshot,
        Preloader, Presentation, Slide, SlideAction, SourceFetcher, SyncConfig, SyncError,
        SyncResult, UploadDispatcher, UploadState, UploadStream, UploadedImage,
    };
}
