//! In-memory broker queue.
//!
//! Single FIFO with lease/ack. Leased messages sit in `in_flight` until
//! acked; a lease that outlives the visibility timeout goes back to the
//! head of the ready queue and is handed out again.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::domain::{QueueError, TaskRecord};
use crate::ports::{BrokerQueue, Delivery, DeliveryTag, QueueDepth};

#[derive(Debug, Clone)]
struct Message {
    record: TaskRecord,
    attempt: u32,
}

/// Visibility deadline entry. Reverse ordering turns BinaryHeap into a
/// min-heap, earliest deadline first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LeaseDeadline {
    deadline: Instant,
    tag: DeliveryTag,
}

impl PartialOrd for LeaseDeadline {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LeaseDeadline {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.tag.0.cmp(&self.tag.0))
    }
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Message>,
    in_flight: HashMap<DeliveryTag, Message>,
    /// May hold entries for leases that were already acked; those are
    /// skipped when popped.
    deadlines: BinaryHeap<LeaseDeadline>,
    next_tag: u64,
    closed: bool,
}

impl QueueState {
    /// Move every lease whose deadline has passed back to the head.
    ///
    /// Reclaimed messages keep their relative order and go ahead of
    /// everything that was never leased.
    fn reclaim_expired(&mut self, now: Instant) -> usize {
        let mut expired = Vec::new();
        while let Some(entry) = self.deadlines.peek().copied() {
            if entry.deadline > now {
                break;
            }
            self.deadlines.pop();
            if let Some(message) = self.in_flight.remove(&entry.tag) {
                expired.push(message);
            }
        }

        let count = expired.len();
        for message in expired.into_iter().rev() {
            self.ready.push_front(message);
        }
        count
    }

    fn lease_head(&mut self, now: Instant, visibility: Duration) -> Option<Delivery> {
        let mut message = self.ready.pop_front()?;
        message.attempt += 1;

        self.next_tag += 1;
        let tag = DeliveryTag(self.next_tag);
        let deadline = deadline_after(now, visibility);

        let delivery = Delivery {
            tag,
            record: message.record.clone(),
            attempt: message.attempt,
        };
        self.deadlines.push(LeaseDeadline { deadline, tag });
        self.in_flight.insert(tag, message);
        Some(delivery)
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.peek().map(|entry| entry.deadline)
    }
}

/// Longer waits are clamped here and behave as "never".
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deadline_after(now: Instant, after: Duration) -> Instant {
    now + after.min(FAR_FUTURE)
}

/// In-memory `BrokerQueue`.
pub struct InMemoryBrokerQueue {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
    visibility_timeout: Duration,
}

impl InMemoryBrokerQueue {
    /// Leases not acked within `visibility_timeout` are redelivered.
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            notify: Arc::new(Notify::new()),
            visibility_timeout,
        }
    }

    pub fn visibility_timeout(&self) -> Duration {
        self.visibility_timeout
    }

    /// Refuse further pushes and leases. Pending waiters wake up with
    /// `QueueError::Closed`.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl BrokerQueue for InMemoryBrokerQueue {
    async fn push(&self, record: TaskRecord) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(QueueError::Closed);
            }
            state.ready.push_back(Message { record, attempt: 0 });
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn lease(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let give_up_at = deadline_after(Instant::now(), wait);
        loop {
            let next_wake = {
                let mut state = self.state.lock().await;
                if state.closed {
                    return Err(QueueError::Closed);
                }

                let now = Instant::now();
                let reclaimed = state.reclaim_expired(now);
                if reclaimed > 0 {
                    tracing::warn!(reclaimed, "lease visibility expired, redelivering");
                }

                if let Some(delivery) = state.lease_head(now, self.visibility_timeout) {
                    return Ok(Some(delivery));
                }
                if now >= give_up_at {
                    return Ok(None);
                }

                match state.next_deadline() {
                    Some(deadline) => deadline.min(give_up_at),
                    None => give_up_at,
                }
            };

            tokio::select! {
                _ = self.notify.notified() => {},
                _ = tokio::time::sleep_until(next_wake) => {},
            }
        }
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        match state.in_flight.remove(&tag) {
            Some(_) => Ok(()),
            None => Err(QueueError::UnknownDelivery(tag.0)),
        }
    }

    async fn depth(&self) -> Result<QueueDepth, QueueError> {
        let state = self.state.lock().await;
        Ok(QueueDepth {
            ready: state.ready.len(),
            in_flight: state.in_flight.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GenerationParams, TaskId};
    use chrono::Utc;
    use ulid::Ulid;

    fn record(prompt: &str) -> TaskRecord {
        TaskRecord::new(
            TaskId::from_ulid(Ulid::new()),
            "anonymous",
            prompt,
            GenerationParams::default(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn lease_is_fifo() {
        let queue = InMemoryBrokerQueue::new(Duration::from_secs(60));
        let first = record("first");
        let second = record("second");
        queue.push(first.clone()).await.unwrap();
        queue.push(second.clone()).await.unwrap();

        let a = queue.lease(Duration::ZERO).await.unwrap().unwrap();
        let b = queue.lease(Duration::ZERO).await.unwrap().unwrap();

        assert_eq!(a.record.id, first.id);
        assert_eq!(b.record.id, second.id);
        assert!(!a.redelivered());
    }

    #[tokio::test]
    async fn unbounded_visibility_and_wait_do_not_overflow() {
        let queue = Arc::new(InMemoryBrokerQueue::new(Duration::MAX));
        queue.push(record("first")).await.unwrap();
        let leased = queue.lease(Duration::MAX).await.unwrap();
        assert!(leased.is_some());

        let pusher = tokio::spawn({
            let queue = queue.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                queue.push(record("second")).await.unwrap();
            }
        });
        let leased = tokio::time::timeout(Duration::from_secs(2), queue.lease(Duration::MAX))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(leased.unwrap().record.prompt, "second");
        pusher.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn lease_on_empty_queue_times_out() {
        let queue = InMemoryBrokerQueue::new(Duration::from_secs(60));
        let start = Instant::now();

        let leased = queue.lease(Duration::from_millis(500)).await.unwrap();

        assert!(leased.is_none());
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test]
    async fn push_wakes_waiting_lease() {
        let queue = Arc::new(InMemoryBrokerQueue::new(Duration::from_secs(60)));
        let waiting = tokio::spawn({
            let queue = queue.clone();
            async move { queue.lease(Duration::from_secs(5)).await.unwrap() }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let pushed = record("wake");
        queue.push(pushed.clone()).await.unwrap();

        let delivery = waiting.await.unwrap().unwrap();
        assert_eq!(delivery.record.id, pushed.id);
    }

    #[tokio::test]
    async fn ack_removes_in_flight() {
        let queue = InMemoryBrokerQueue::new(Duration::from_secs(60));
        queue.push(record("x")).await.unwrap();
        let delivery = queue.lease(Duration::ZERO).await.unwrap().unwrap();

        assert_eq!(queue.depth().await.unwrap().in_flight, 1);
        queue.ack(delivery.tag).await.unwrap();
        assert_eq!(queue.depth().await.unwrap(), QueueDepth::default());

        let err = queue.ack(delivery.tag).await.unwrap_err();
        assert_eq!(err, QueueError::UnknownDelivery(delivery.tag.0));
    }

    #[tokio::test(start_paused = true)]
    async fn unacked_lease_is_redelivered_first() {
        let queue = InMemoryBrokerQueue::new(Duration::from_secs(10));
        let lost = record("lost");
        let waiting = record("waiting");
        queue.push(lost.clone()).await.unwrap();
        let first = queue.lease(Duration::ZERO).await.unwrap().unwrap();
        queue.push(waiting.clone()).await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;

        let again = queue.lease(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(again.record.id, lost.id);
        assert_eq!(again.attempt, 2);
        assert!(again.redelivered());
        assert_ne!(again.tag, first.tag);

        // The expired tag can no longer be acked.
        assert!(queue.ack(first.tag).await.is_err());

        let next = queue.lease(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(next.record.id, waiting.id);
    }

    #[tokio::test]
    async fn closed_queue_refuses_push_and_lease() {
        let queue = InMemoryBrokerQueue::new(Duration::from_secs(60));
        queue.close().await;

        assert_eq!(queue.push(record("x")).await.unwrap_err(), QueueError::Closed);
        assert_eq!(
            queue.lease(Duration::ZERO).await.unwrap_err(),
            QueueError::Closed
        );
    }
}
