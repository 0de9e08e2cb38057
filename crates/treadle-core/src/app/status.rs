//! StatusReader - poll and stream task state.
//!
//! Readers only ever touch the result store. Dropping a stream, or the
//! client behind it going away, has no effect on the task.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::domain::{StatusError, TaskId, TaskRecord, TaskView};
use crate::ports::ResultStore;

/// One element of a `StatusStream`.
pub type StatusItem = Result<TaskView, StatusError>;

/// Read side of the store: polls, waits and streams.
#[derive(Clone)]
pub struct StatusReader {
    store: Arc<dyn ResultStore>,
    stream_interval: Duration,
    shutdown: CancellationToken,
}

impl StatusReader {
    pub fn new(
        store: Arc<dyn ResultStore>,
        stream_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            stream_interval,
            shutdown,
        }
    }

    /// Full record, including inputs and timestamps.
    pub async fn get_record(&self, id: TaskId) -> Result<TaskRecord, StatusError> {
        self.store.get(id).await?.ok_or(StatusError::NotFound(id))
    }

    /// Current external view. Unknown and expired ids both read as NotFound.
    pub async fn get_status(&self, id: TaskId) -> Result<TaskView, StatusError> {
        self.get_record(id).await.map(|record| TaskView::from(&record))
    }

    /// Poll until the task is terminal or `timeout` passes. A timeout too
    /// large to represent waits indefinitely.
    pub async fn wait_for_terminal(
        &self,
        id: TaskId,
        interval: Duration,
        timeout: Duration,
    ) -> Result<TaskView, StatusError> {
        let give_up_at = Instant::now().checked_add(timeout);
        loop {
            let view = self.get_status(id).await?;
            if view.status().is_terminal() {
                return Ok(view);
            }
            if give_up_at.is_some_and(|at| Instant::now() >= at) {
                return Err(StatusError::WaitTimeout(id));
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Stream the view on every observed status change, ending after the
    /// terminal one.
    ///
    /// The store is sampled once per `stream_interval`. States that start
    /// and end between two samples are not reported, but the order of what
    /// is reported always follows the state machine.
    pub fn stream(&self, id: TaskId) -> StatusStream {
        let (tx, rx) = mpsc::channel(4);
        let cancel = self.shutdown.child_token();

        let store = Arc::clone(&self.store);
        let interval = self.stream_interval;
        let feed_cancel = cancel.clone();
        tokio::spawn(async move {
            feed_status(store, id, interval, tx, feed_cancel).await;
        });

        StatusStream {
            inner: ReceiverStream::new(rx),
            cancel,
        }
    }
}

async fn feed_status(
    store: Arc<dyn ResultStore>,
    id: TaskId,
    interval: Duration,
    tx: mpsc::Sender<StatusItem>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_rank: Option<u8> = None;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tx.closed() => break,
            _ = ticker.tick() => {}
        }

        let record = match store.get(id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                let _ = tx.send(Err(StatusError::NotFound(id))).await;
                break;
            }
            Err(err) => {
                let _ = tx.send(Err(err.into())).await;
                break;
            }
        };

        let rank = record.status.rank();
        if last_rank.is_none_or(|last| rank > last) {
            last_rank = Some(rank);
            if tx.send(Ok(TaskView::from(&record))).await.is_err() {
                tracing::debug!(task_id = %id, "status stream receiver gone");
                break;
            }
        }

        if record.is_terminal() {
            break;
        }
    }
}

/// Stream of `TaskView`s for one task. Dropping it stops the feed.
pub struct StatusStream {
    inner: ReceiverStream<StatusItem>,
    cancel: CancellationToken,
}

impl StatusStream {
    /// Stop the feed; buffered items are still delivered.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Stream for StatusStream {
    type Item = StatusItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for StatusStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
