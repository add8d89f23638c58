use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use deck_blob::{temp_object_name, ImageStore, ResourceId};
use futures_core::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn, Instrument};

use crate::{
    ActionKind, AdmissionLimiter, AdmissionPermit, Image, PreloadSnapshot, SlideAction,
    SyncError, UploadClaim,
};

/// Published once per successful upload
#[derive(Debug, Clone)]
pub struct UploadedImage {
    /// Handle for deleting the temporary object later
    pub resource_id: ResourceId,
    pub image: Image,
}

/// Receiving half of the completion queue.
///
/// Yields `None` once every upload has settled and no event will ever arrive.
#[derive(Debug)]
pub struct UploadStream {
    rx: mpsc::Receiver<UploadedImage>,
}

impl UploadStream {
    pub async fn recv(&mut self) -> Option<UploadedImage> {
        self.rx.recv().await
    }

    /// Refuse further events. Buffered events can still be received.
    /// Calling it again has no effect.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl Stream for UploadStream {
    type Item = UploadedImage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Bounded completion queue. The stream ends when every sender is dropped.
pub fn completion_channel(capacity: usize) -> (mpsc::Sender<UploadedImage>, UploadStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (tx, UploadStream { rx })
}

/// One backend upload on behalf of one or more equivalent images
#[derive(Debug)]
struct UploadJob {
    primary: UploadClaim,
    aliases: Vec<UploadClaim>,
}

impl UploadJob {
    fn image(&self) -> &Image {
        self.primary.image()
    }

    fn claims(&self) -> usize {
        1 + self.aliases.len()
    }

    fn settle(self, outcome: Result<String, String>) {
        for alias in self.aliases {
            alias.record_upload_outcome(outcome.clone());
        }
        self.primary.record_upload_outcome(outcome);
    }
}

/// Uploads new slide images to object storage in the background
pub struct UploadDispatcher {
    store: Arc<dyn ImageStore>,
    limiter: AdmissionLimiter,
}

impl UploadDispatcher {
    pub fn new(store: Arc<dyn ImageStore>, limit: usize) -> Self {
        Self {
            store,
            limiter: AdmissionLimiter::new(limit),
        }
    }

    pub fn limiter(&self) -> &AdmissionLimiter {
        &self.limiter
    }

    /// Claim every image that has to be uploaded and start uploading them.
    ///
    /// Returns immediately. Claims are taken before anything is spawned, so
    /// an image already being uploaded is never selected twice. Outcomes land
    /// on the images themselves; successes are also published on the stream.
    ///
    /// Must be called from within a Tokio runtime when anything is selected.
    #[instrument(skip_all, fields(actions = actions.len()))]
    pub fn start_upload(
        &self,
        actions: &[SlideAction],
        snapshot: &PreloadSnapshot,
        cancel: &CancellationToken,
    ) -> UploadStream {
        let jobs = select_jobs(actions, snapshot);
        let (tx, stream) = completion_channel(jobs.len());
        if jobs.is_empty() {
            debug!("No images to upload");
            return stream;
        }

        let claims: usize = jobs.iter().map(UploadJob::claims).sum();
        info!(uploads = jobs.len(), images = claims, "Starting image uploads");

        let store = self.store.clone();
        let limiter = self.limiter.clone();
        let scope = cancel.child_token();
        tokio::spawn(run_uploads(store, limiter, scope, jobs, tx).in_current_span());

        stream
    }
}

/// Images of new slide content that need uploading and are not already on
/// the slide, equivalent ones folded into a single job.
fn select_jobs(actions: &[SlideAction], snapshot: &PreloadSnapshot) -> Vec<UploadJob> {
    let mut jobs: Vec<UploadJob> = Vec::new();

    for action in actions.iter().filter(|a| a.carries_new_content()) {
        let Some(slide) = &action.slide else {
            continue;
        };
        let current = match action.kind {
            ActionKind::Update => snapshot.get(action.index),
            _ => None,
        };

        for image in &slide.images {
            if !image.is_upload_needed() {
                continue;
            }
            if current.is_some_and(|c| c.contains_equivalent(image)) {
                debug!(slide = action.index, checksum = %image.checksum(), "Image unchanged on slide");
                continue;
            }

            // None when another clone of this image was claimed first
            let Some(claim) = image.claim_for_upload() else {
                continue;
            };
            match jobs.iter().position(|job| job.image().equivalent(image)) {
                Some(i) => jobs[i].aliases.push(claim),
                None => jobs.push(UploadJob {
                    primary: claim,
                    aliases: Vec::new(),
                }),
            }
        }
    }

    jobs
}

/// Admit jobs one by one. Once the scope is cancelled nothing else is
/// admitted; jobs already running finish on their own.
async fn run_uploads(
    store: Arc<dyn ImageStore>,
    limiter: AdmissionLimiter,
    scope: CancellationToken,
    jobs: Vec<UploadJob>,
    tx: mpsc::Sender<UploadedImage>,
) {
    let total = jobs.len();
    let mut pending = jobs.into_iter();
    let mut workers = JoinSet::new();

    let mut abandoned = 0usize;
    for job in pending.by_ref() {
        let permit = match limiter.acquire(&scope).await {
            Ok(permit) => permit,
            Err(e) => {
                job.settle(Err(e.to_string()));
                abandoned += 1;
                break;
            }
        };
        workers.spawn(
            upload_one(store.clone(), permit, job, tx.clone(), scope.clone()).in_current_span(),
        );
    }

    for job in pending {
        job.settle(Err(SyncError::Cancelled.to_string()));
        abandoned += 1;
    }
    if abandoned > 0 {
        warn!(abandoned, "Image uploads cancelled before they started");
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Upload worker failed");
        }
    }

    // Last sender goes here; the stream ends once buffered events are read
    drop(tx);
    info!(uploads = total, "Image uploads settled");
}

async fn upload_one(
    store: Arc<dyn ImageStore>,
    _permit: AdmissionPermit,
    job: UploadJob,
    tx: mpsc::Sender<UploadedImage>,
    scope: CancellationToken,
) {
    let image = job.image().clone();
    let name = temp_object_name();

    match store
        .upload(image.bytes().clone(), image.mime_type().as_str(), &name)
        .await
    {
        Ok(uploaded) => {
            debug!(name = %name, resource_id = %uploaded.resource_id, "Uploaded image");
            job.settle(Ok(uploaded.public_url));

            let resource_id = uploaded.resource_id;
            let event = UploadedImage {
                resource_id: resource_id.clone(),
                image,
            };
            if tx.send(event).await.is_err() {
                warn!(resource_id = %resource_id, "Completion stream closed; object will not be cleaned up");
            }
        }
        Err(e) => {
            error!(name = %name, error = %e, "Failed to upload image");
            job.settle(Err(e.to_string()));
            scope.cancel();
        }
    }
}
