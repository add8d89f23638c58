use std::sync::Arc;

use deck_blob::{ImageStore, ResourceId};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn, Instrument};

use crate::{AdmissionLimiter, AdmissionPermit, SyncError, SyncResult, UploadStream};

/// Deletes the temporary objects published by an upload run
pub struct CleanupSweeper {
    store: Arc<dyn ImageStore>,
    limiter: AdmissionLimiter,
}

impl CleanupSweeper {
    pub fn new(store: Arc<dyn ImageStore>, limit: usize) -> Self {
        Self {
            store,
            limiter: AdmissionLimiter::new(limit),
        }
    }

    pub fn limiter(&self) -> &AdmissionLimiter {
        &self.limiter
    }

    /// Drain `stream`, deleting every uploaded object.
    ///
    /// Best effort: a failed deletion is logged and the sweep moves on.
    /// Returns once the stream has ended and every deletion has finished.
    /// On cancellation the stream is closed, deletions already started are
    /// awaited, and `SyncError::Cancelled` is returned.
    #[instrument(skip_all)]
    pub async fn cleanup(
        &self,
        mut stream: UploadStream,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        let mut deletions = JoinSet::new();
        let mut received = 0usize;
        let mut failed = 0usize;

        let outcome = loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Err(SyncError::Cancelled),
                event = stream.recv() => event,
            };
            let Some(event) = event else {
                break Ok(());
            };
            received += 1;

            let permit = match self.limiter.acquire(cancel).await {
                Ok(permit) => permit,
                Err(e) => {
                    warn!(resource_id = %event.resource_id, "Cleanup cancelled before deleting object");
                    break Err(e);
                }
            };
            deletions.spawn(
                delete_one(self.store.clone(), permit, event.resource_id).in_current_span(),
            );

            while let Some(done) = deletions.try_join_next() {
                failed += count_failure(done);
            }
        };

        if outcome.is_err() {
            stream.close();
        }
        while let Some(done) = deletions.join_next().await {
            failed += count_failure(done);
        }

        match &outcome {
            Ok(()) => info!(deleted = received - failed, failed, "Cleaned up uploaded images"),
            Err(_) => warn!(received, failed, "Cleanup cancelled"),
        }
        outcome
    }
}

async fn delete_one(
    store: Arc<dyn ImageStore>,
    _permit: AdmissionPermit,
    resource_id: ResourceId,
) -> bool {
    match store.delete(&resource_id).await {
        Ok(()) => {
            debug!(resource_id = %resource_id, "Deleted uploaded image");
            true
        }
        Err(e) => {
            error!(resource_id = %resource_id, error = %e, "Failed to delete uploaded image");
            false
        }
    }
}

fn count_failure(done: Result<bool, tokio::task::JoinError>) -> usize {
    match done {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            error!(error = %e, "Deletion task failed");
            1
        }
    }
}
