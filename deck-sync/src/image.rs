use std::sync::Arc;

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::sync::watch;

use crate::fetch::{is_remote_source, ImageFetcher};
use crate::{SyncError, SyncResult};

/// Error recorded on images whose claim was dropped before an upload was attempted
pub const ABANDONED_UPLOAD: &str = "upload abandoned before it was attempted";

/// Image formats the editing service accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MimeType {
    Png,
    Jpeg,
    Gif,
    Webp,
}

impl MimeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
        }
    }

    /// Detect the format from magic bytes
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match image::guess_format(bytes).ok()? {
            image::ImageFormat::Png => Some(Self::Png),
            image::ImageFormat::Jpeg => Some(Self::Jpeg),
            image::ImageFormat::Gif => Some(Self::Gif),
            image::ImageFormat::WebP => Some(Self::Webp),
            _ => None,
        }
    }

    /// Parse a `Content-Type` value, ignoring parameters
    pub fn from_content_type(value: &str) -> Option<Self> {
        let essence = value.split(';').next()?.trim().to_ascii_lowercase();
        match essence.as_str() {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/gif" => Some(Self::Gif),
            "image/webp" => Some(Self::Webp),
            _ => None,
        }
    }
}

impl std::fmt::Display for MimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upload lifecycle of one image.
///
/// `NotNeeded` is terminal. Otherwise `Needed -> Uploading -> Uploaded | Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadState {
    NotNeeded,
    Needed,
    Uploading,
    Uploaded { url: String },
    Failed { error: String },
}

impl UploadState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Needed | Self::Uploading)
    }
}

/// Image content plus its upload state.
///
/// Cloning is cheap and clones share one upload state: they are the same
/// image. Use [`Image::equivalent`] to compare content.
#[derive(Clone)]
pub struct Image {
    bytes: Bytes,
    mime_type: MimeType,
    source: Option<String>,
    link: Option<String>,
    from_markdown: bool,
    checksum: [u8; 32],
    upload: Arc<watch::Sender<UploadState>>,
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("mime_type", &self.mime_type)
            .field("size", &self.bytes.len())
            .field("source", &self.source)
            .field("link", &self.link)
            .field("from_markdown", &self.from_markdown)
            .field("upload", &*self.upload.borrow())
            .finish()
    }
}

impl Image {
    /// Build from content already in hand; it will need uploading
    pub fn from_bytes(bytes: Bytes, mime_type: MimeType) -> Self {
        Self::build(bytes, mime_type, None, false, UploadState::Needed)
    }

    /// Fetch a plain image reference
    pub async fn load<F>(fetcher: &F, source: &str) -> SyncResult<Self>
    where
        F: ImageFetcher + ?Sized,
    {
        Self::load_with(fetcher, source, false).await
    }

    /// Fetch an image reference that was written in markdown
    pub async fn load_from_markdown<F>(fetcher: &F, source: &str) -> SyncResult<Self>
    where
        F: ImageFetcher + ?Sized,
    {
        Self::load_with(fetcher, source, true).await
    }

    async fn load_with<F>(fetcher: &F, source: &str, from_markdown: bool) -> SyncResult<Self>
    where
        F: ImageFetcher + ?Sized,
    {
        let content = fetcher.fetch(source).await?;

        let mime_type = MimeType::sniff(&content.bytes)
            .or_else(|| content.content_type.as_deref().and_then(MimeType::from_content_type))
            .ok_or_else(|| {
                SyncError::unsupported_mime(
                    source,
                    content
                        .content_type
                        .clone()
                        .unwrap_or_else(|| "unrecognised content".to_string()),
                )
            })?;

        // Remote sources are fetched by the editing service directly
        let state = if is_remote_source(source) {
            UploadState::NotNeeded
        } else {
            UploadState::Needed
        };

        Ok(Self::build(
            content.bytes,
            mime_type,
            Some(source.to_string()),
            from_markdown,
            state,
        ))
    }

    fn build(
        bytes: Bytes,
        mime_type: MimeType,
        source: Option<String>,
        from_markdown: bool,
        state: UploadState,
    ) -> Self {
        let checksum: [u8; 32] = Sha256::digest(&bytes).into();
        let (upload, _) = watch::channel(state);
        Self {
            bytes,
            mime_type,
            source,
            link: None,
            from_markdown,
            checksum,
            upload: Arc::new(upload),
        }
    }

    /// Attach the hyperlink the image carries on the slide
    pub fn with_link<S: Into<String>>(mut self, link: Option<S>) -> Self {
        self.link = link.map(Into::into).filter(|l: &String| !l.is_empty());
        self
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn mime_type(&self) -> MimeType {
        self.mime_type
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn link(&self) -> Option<&str> {
        self.link.as_deref()
    }

    pub fn is_from_markdown(&self) -> bool {
        self.from_markdown
    }

    /// Hex SHA-256 of the content
    pub fn checksum(&self) -> String {
        hex::encode(self.checksum)
    }

    /// Content equivalence: same link annotation and byte-identical content.
    ///
    /// Different encodings of one picture are different images.
    pub fn equivalent(&self, other: &Image) -> bool {
        self.link == other.link && self.checksum == other.checksum
    }

    /// Reference identity: both handles share one upload state
    pub fn same_instance(&self, other: &Image) -> bool {
        Arc::ptr_eq(&self.upload, &other.upload)
    }

    pub fn upload_state(&self) -> UploadState {
        self.upload.borrow().clone()
    }

    pub fn is_upload_needed(&self) -> bool {
        matches!(*self.upload.borrow(), UploadState::Needed)
    }

    /// Take ownership of the upload: `Needed -> Uploading`.
    ///
    /// Succeeds for exactly one caller per image; every other state, and
    /// every later caller, gets `None`.
    pub fn claim_for_upload(&self) -> Option<UploadClaim> {
        let claimed = self.upload.send_if_modified(|state| {
            if matches!(state, UploadState::Needed) {
                *state = UploadState::Uploading;
                true
            } else {
                false
            }
        });
        claimed.then(|| UploadClaim {
            image: self.clone(),
            settled: false,
        })
    }

    /// URL once uploaded, without waiting
    pub fn uploaded_url(&self) -> Option<String> {
        match &*self.upload.borrow() {
            UploadState::Uploaded { url } => Some(url.clone()),
            _ => None,
        }
    }

    /// Failure message once failed, without waiting
    pub fn upload_error(&self) -> Option<String> {
        match &*self.upload.borrow() {
            UploadState::Failed { error } => Some(error.clone()),
            _ => None,
        }
    }

    /// URL the editing service should fetch, waiting for an in-flight upload.
    ///
    /// Images that never needed an upload resolve to their remote source.
    pub async fn wait_uploaded_url(&self) -> SyncResult<String> {
        let mut rx = self.upload.subscribe();
        let state = rx
            .wait_for(|state| !matches!(state, UploadState::Uploading))
            .await
            .map(|state| state.clone())
            .map_err(|_| SyncError::Task("upload state dropped".to_string()))?;

        match state {
            UploadState::Uploaded { url } => Ok(url),
            UploadState::Failed { error } => Err(SyncError::upload(error)),
            UploadState::NotNeeded => self
                .source
                .clone()
                .filter(|s| is_remote_source(s))
                .ok_or(SyncError::NotScheduled),
            UploadState::Needed | UploadState::Uploading => Err(SyncError::NotScheduled),
        }
    }
}

/// Exclusive right to settle one image's upload.
///
/// Dropping a claim without recording an outcome marks the image failed, so
/// no image is ever left `Uploading`.
#[derive(Debug)]
pub struct UploadClaim {
    image: Image,
    settled: bool,
}

impl UploadClaim {
    pub fn image(&self) -> &Image {
        &self.image
    }

    /// `Uploading -> Uploaded` on `Ok(url)`, `Uploading -> Failed` on `Err(reason)`
    pub fn record_upload_outcome(mut self, outcome: Result<String, String>) {
        let state = match outcome {
            Ok(url) => UploadState::Uploaded { url },
            Err(error) => UploadState::Failed { error },
        };
        self.image.upload.send_replace(state);
        self.settled = true;
    }
}

impl Drop for UploadClaim {
    fn drop(&mut self) {
        if !self.settled {
            self.image.upload.send_replace(UploadState::Failed {
                error: ABANDONED_UPLOAD.to_string(),
            });
        }
    }
}
