//! GcLoop - periodic reclamation of expired results and idle rate buckets.
//!
//! # Flow (every `gc_interval`)
//! 1. `ResultStore::purge_expired`
//! 2. `RateLimiter::prune_idle`

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::app::rate_limit::RateLimiter;
use crate::ports::{Clock, ResultStore};

/// Background sweeper; one per `App`.
pub struct GcLoop {
    store: Arc<dyn ResultStore>,
    limiter: Arc<RateLimiter<Arc<dyn Clock>>>,
    interval: Duration,
}

impl GcLoop {
    pub fn new(
        store: Arc<dyn ResultStore>,
        limiter: Arc<RateLimiter<Arc<dyn Clock>>>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            limiter,
            interval,
        }
    }

    /// One sweep. Returns `(records purged, buckets pruned)`.
    pub async fn sweep(&self) -> (usize, usize) {
        let purged = match self.store.purge_expired().await {
            Ok(purged) => purged,
            Err(err) => {
                tracing::warn!(error = %err, "result purge failed");
                0
            }
        };
        let pruned = self.limiter.prune_idle().await;
        if purged > 0 || pruned > 0 {
            tracing::debug!(purged, pruned, "gc sweep");
        }
        (purged, pruned)
    }

    /// Sweep every `interval` until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; nothing can have expired yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }
    }
}
