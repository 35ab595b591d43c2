use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

/// Progress reporting and cancellation for long running metadata reads.
///
/// A monitor is handed through the caches down to the [`CacheSource`](crate::CacheSource).
/// Cancelling it aborts any fetch driven by it, in which case the operation fails with
/// [`CacheError::Cancelled`](crate::CacheError::Cancelled).
///
/// Clones share the same cancellation state and progress counter.
#[derive(Clone, Debug, Default)]
pub struct Monitor {
    token: CancellationToken,
    worked: Arc<AtomicU64>,
}

impl Monitor {
    /// Creates a fresh, uncancelled monitor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a monitor that is cancelled together with `self`, but can also be
    /// cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            worked: Arc::clone(&self.worked),
        }
    }

    /// Requests cancellation of all operations driven by this monitor.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Announces the start of a unit of work.
    pub fn begin_task(&self, task: &str) {
        tracing::debug!(task, "begin task");
    }

    /// Records `units` of completed work.
    pub fn worked(&self, units: u64) {
        self.worked.fetch_add(units, Ordering::Relaxed);
    }

    /// The total amount of work recorded so far.
    pub fn work_done(&self) -> u64 {
        self.worked.load(Ordering::Relaxed)
    }
}
