use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::{SyncError, SyncResult};

/// Counting gate bounding how many tasks of one stage run at once.
///
/// Tracks the number of permits currently held and the highest number ever
/// held at the same time, so callers can verify the bound under load.
#[derive(Debug, Clone)]
pub struct AdmissionLimiter {
    semaphore: Arc<Semaphore>,
    gauge: Arc<Gauge>,
    limit: usize,
}

#[derive(Debug, Default)]
struct Gauge {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl AdmissionLimiter {
    /// Create a limiter admitting at most `limit` tasks; a limit of 0 is raised to 1
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            gauge: Arc::new(Gauge::default()),
            limit,
        }
    }

    /// Wait for a permit, giving up as soon as `scope` is cancelled
    pub async fn acquire(&self, scope: &CancellationToken) -> SyncResult<AdmissionPermit> {
        // Prefer cancellation so that a cancelled scope admits nothing new
        let permit = tokio::select! {
            biased;
            _ = scope.cancelled() => return Err(SyncError::Cancelled),
            permit = self.semaphore.clone().acquire_owned() => {
                permit.map_err(|_| SyncError::Task("admission limiter closed".to_string()))?
            }
        };

        let now = self.gauge.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.gauge.peak.fetch_max(now, Ordering::SeqCst);

        Ok(AdmissionPermit {
            _permit: permit,
            gauge: self.gauge.clone(),
        })
    }

    /// Configured bound
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Permits currently held
    pub fn in_flight(&self) -> usize {
        self.gauge.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of permits held at once since creation
    pub fn peak(&self) -> usize {
        self.gauge.peak.load(Ordering::SeqCst)
    }
}

/// Admission to run one task; released on drop
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
    gauge: Arc<Gauge>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.gauge.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
