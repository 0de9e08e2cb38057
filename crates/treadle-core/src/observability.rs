//! In-process counters fed by lifecycle events.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::ports::{EventSink, LifecycleEvent, QueueDepth};

/// Point-in-time view of the counters plus queue depth.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub submitted: u64,
    pub rejected: u64,
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub duplicate_deliveries: u64,
    pub workers_lost: u64,
    /// Records closed by the gateway because the broker refused them.
    /// They never started, so they are not part of `finished`.
    pub enqueue_failures: u64,
    /// Sum of completion tokens over completed tasks.
    pub completion_tokens: u64,
    pub queue: QueueDepth,
}

impl StatsSnapshot {
    /// Tasks that reached a terminal state through a worker.
    pub fn finished(&self) -> u64 {
        self.completed + self.failed + self.timed_out
    }

    /// Tasks currently inside a backend call (as far as events tell).
    pub fn active(&self) -> u64 {
        self.started
            .saturating_sub(self.finished() + self.workers_lost)
    }
}

/// Event sink that only counts.
#[derive(Debug, Default)]
pub struct StatsCollector {
    submitted: AtomicU64,
    rejected: AtomicU64,
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    duplicate_deliveries: AtomicU64,
    workers_lost: AtomicU64,
    enqueue_failures: AtomicU64,
    completion_tokens: AtomicU64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current counters, paired with a queue depth read by the caller.
    pub fn snapshot(&self, queue: QueueDepth) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            duplicate_deliveries: self.duplicate_deliveries.load(Ordering::Relaxed),
            workers_lost: self.workers_lost.load(Ordering::Relaxed),
            enqueue_failures: self.enqueue_failures.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
            queue,
        }
    }
}

impl EventSink for StatsCollector {
    fn emit(&self, event: &LifecycleEvent) {
        let counter = match event {
            LifecycleEvent::Submitted { .. } => &self.submitted,
            LifecycleEvent::Rejected { .. } => &self.rejected,
            LifecycleEvent::Started { .. } => &self.started,
            LifecycleEvent::Completed { metrics, .. } => {
                let tokens = metrics.completion_tokens.unwrap_or(0);
                self.completion_tokens
                    .fetch_add(u64::from(tokens), Ordering::Relaxed);
                &self.completed
            }
            LifecycleEvent::Failed { .. } => &self.failed,
            LifecycleEvent::TimedOut { .. } => &self.timed_out,
            LifecycleEvent::EnqueueFailed { .. } => &self.enqueue_failures,
            LifecycleEvent::DuplicateDelivery { .. } => &self.duplicate_deliveries,
            LifecycleEvent::WorkerLost { .. } => &self.workers_lost,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
