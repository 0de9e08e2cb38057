//! BrokerQueue port - ordered hand-off from the gateway to workers.
//!
//! # Delivery contract
//! - FIFO across all submitters, no priorities.
//! - At-least-once: a leased delivery that is not acked before its
//!   visibility timeout is handed out again, flagged `redelivered`.
//! - Workers ack late, after the terminal record is written.
//!
//! The queue only moves records around. The result store stays the source
//! of truth for task state; a worker always re-reads it after a lease.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{QueueError, TaskRecord};

/// Handle used to ack a leased delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryTag(pub u64);

/// One leased message.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub record: TaskRecord,
    /// How many times this message has been leased, including this one.
    pub attempt: u32,
}

impl Delivery {
    /// True from the second delivery of the same message on.
    pub fn redelivered(&self) -> bool {
        self.attempt > 1
    }
}

/// Queue depth snapshot, for liveness monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepth {
    pub ready: usize,
    pub in_flight: usize,
}

/// Hand-off channel from the gateway to the workers.
#[async_trait]
pub trait BrokerQueue: Send + Sync {
    /// Append a record to the tail.
    async fn push(&self, record: TaskRecord) -> Result<(), QueueError>;

    /// Lease the head, waiting at most `wait` for one to show up.
    async fn lease(&self, wait: Duration) -> Result<Option<Delivery>, QueueError>;

    /// Remove a leased delivery for good.
    async fn ack(&self, tag: DeliveryTag) -> Result<(), QueueError>;

    async fn depth(&self) -> Result<QueueDepth, QueueError>;
}
