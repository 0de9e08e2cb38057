//! WorkerLoop - consumes the broker queue and runs the backend.
//!
//! # Flow per delivery
//! 1. Re-read the record from the store (source of truth)
//! 2. `queued` -> `processing`, persisted before the backend is called
//! 3. Backend call in a spawned task, raced against `task_time_limit`
//! 4. Terminal write (`completed` / `failed` / `timed_out`)
//! 5. Ack the delivery (late ack)
//!
//! A worker never holds more than one backend call. Every write is a
//! compare-and-put on the status it expects to replace, so a redelivered
//! message can never produce a second terminal state.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};

use crate::domain::record::WORKER_LOST_ERROR_KIND;
use crate::domain::{BackendError, QueueError, StoreError, TaskRecord, TaskStatus};
use crate::ports::{
    BrokerQueue, Clock, Delivery, DeliveryTag, EventSink, Generation, GenerationBackend,
    LifecycleEvent, ResultStore,
};

/// `error_kind` for a backend call that panicked.
pub const BACKEND_PANIC_KIND: &str = "BackendPanic";
pub const BACKEND_CANCELLED_KIND: &str = "BackendCancelled";
const WORKER_LOST_MESSAGE: &str = "worker stopped before the task finished";

/// How one backend call ended.
#[derive(Debug)]
enum CallOutcome {
    Generated(Generation),
    Failed(BackendError),
    DeadlineExceeded,
}

/// Shared body of every worker. Holds no per-task state.
pub struct WorkerLoop {
    store: Arc<dyn ResultStore>,
    queue: Arc<dyn BrokerQueue>,
    backend: Arc<dyn GenerationBackend>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    task_time_limit: Duration,
    lease_wait: Duration,
}

impl WorkerLoop {
    pub fn new(
        store: Arc<dyn ResultStore>,
        queue: Arc<dyn BrokerQueue>,
        backend: Arc<dyn GenerationBackend>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
        task_time_limit: Duration,
        lease_wait: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            backend,
            clock,
            events,
            task_time_limit,
            lease_wait,
        }
    }

    /// Lease and process until shutdown is requested or the queue closes.
    ///
    /// Shutdown only interrupts the wait for a lease; a task that has been
    /// leased is always carried to its terminal write.
    pub async fn run(&self, worker_id: usize, mut shutdown_rx: watch::Receiver<bool>) {
        tracing::info!(worker_id, backend = self.backend.name(), "worker started");
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let leased = tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                leased = self.queue.lease(self.lease_wait) => leased,
            };

            match leased {
                Ok(Some(delivery)) => self.handle(worker_id, delivery).await,
                Ok(None) => {}
                Err(QueueError::Closed) => break,
                Err(err) => {
                    tracing::warn!(worker_id, error = %err, "lease failed, backing off");
                    tokio::time::sleep(self.lease_wait).await;
                }
            }
        }
        tracing::info!(worker_id, "worker stopped");
    }

    /// Process one delivery end to end.
    pub async fn handle(&self, worker_id: usize, delivery: Delivery) {
        let task_id = delivery.record.id;
        let current = match self.store.get(task_id).await {
            Ok(current) => current,
            Err(err) => {
                // Leave it un-acked; it comes back after the visibility timeout.
                tracing::error!(worker_id, %task_id, error = %err, "cannot read record");
                return;
            }
        };

        let Some(record) = current else {
            tracing::debug!(worker_id, %task_id, "record gone (expired), dropping delivery");
            self.ack(worker_id, delivery.tag).await;
            return;
        };

        match record.status {
            TaskStatus::Queued => self.process(worker_id, record, delivery.tag).await,
            TaskStatus::Processing => self.close_lost(worker_id, record, delivery.tag).await,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::TimedOut => {
                self.events
                    .emit(&LifecycleEvent::DuplicateDelivery { task_id });
                self.ack(worker_id, delivery.tag).await;
            }
        }
    }

    async fn process(&self, worker_id: usize, mut record: TaskRecord, tag: DeliveryTag) {
        let task_id = record.id;
        if let Err(err) = record.start_processing(self.clock.now()) {
            tracing::error!(worker_id, %task_id, error = %err, "cannot start task");
            self.ack(worker_id, tag).await;
            return;
        }
        match self
            .store
            .compare_and_put(TaskStatus::Queued, record.clone())
            .await
        {
            Ok(()) => {}
            Err(StoreError::Conflict { found, .. }) => {
                // Another worker got there first.
                tracing::debug!(worker_id, %task_id, ?found, "task already taken");
                self.ack(worker_id, tag).await;
                return;
            }
            Err(err) => {
                tracing::error!(worker_id, %task_id, error = %err, "cannot persist processing state");
                return;
            }
        }

        let queue_wait = record
            .start_time
            .and_then(|start| (start - record.enqueue_time).to_std().ok())
            .unwrap_or_default();
        self.events
            .emit(&LifecycleEvent::Started { task_id, queue_wait });
        tracing::debug!(worker_id, %task_id, "calling backend");

        let outcome = self.call_with_deadline(&record).await;
        let now = self.clock.now();
        let (transition, event) = match outcome {
            CallOutcome::Generated(generation) => {
                let transition = record.complete(now, generation.text, generation.usage);
                let event = record
                    .metrics
                    .clone()
                    .map(|metrics| LifecycleEvent::Completed { task_id, metrics });
                (transition, event)
            }
            CallOutcome::Failed(err) => {
                let transition = record.fail(now, err.kind.clone(), err.message.clone());
                let event = record.metrics.clone().map(|metrics| LifecycleEvent::Failed {
                    task_id,
                    error_kind: err.kind,
                    error_message: err.message,
                    detail: err.detail,
                    metrics,
                });
                (transition, event)
            }
            CallOutcome::DeadlineExceeded => {
                let transition = record.time_out(now);
                let event = record.metrics.clone().map(|metrics| LifecycleEvent::TimedOut {
                    task_id,
                    limit: self.task_time_limit,
                    metrics,
                });
                (transition, event)
            }
        };

        if let Err(err) = transition {
            tracing::error!(worker_id, %task_id, error = %err, "cannot finish task");
            self.ack(worker_id, tag).await;
            return;
        }

        if self.finish(worker_id, record).await
            && let Some(event) = event
        {
            self.events.emit(&event);
        }
        self.ack(worker_id, tag).await;
    }

    /// The record was left in `processing` by a worker that never acked.
    async fn close_lost(&self, worker_id: usize, mut record: TaskRecord, tag: DeliveryTag) {
        let task_id = record.id;
        if record
            .fail(self.clock.now(), WORKER_LOST_ERROR_KIND, WORKER_LOST_MESSAGE)
            .is_ok()
            && self.finish(worker_id, record).await
        {
            self.events.emit(&LifecycleEvent::WorkerLost { task_id });
        }
        self.ack(worker_id, tag).await;
    }

    /// Terminal write. Returns whether this worker's write won.
    async fn finish(&self, worker_id: usize, record: TaskRecord) -> bool {
        let task_id = record.id;
        match self
            .store
            .compare_and_put(TaskStatus::Processing, record)
            .await
        {
            Ok(()) => true,
            Err(StoreError::Conflict { found, .. }) => {
                tracing::warn!(worker_id, %task_id, ?found, "task already closed elsewhere, dropping result");
                false
            }
            Err(err) => {
                tracing::error!(worker_id, %task_id, error = %err, "cannot persist terminal state");
                false
            }
        }
    }

    /// Run the backend in its own task and stop waiting at the deadline.
    ///
    /// On expiry the spawned task is detached, not aborted: the call runs to
    /// completion on its own and its result is discarded.
    async fn call_with_deadline(&self, record: &TaskRecord) -> CallOutcome {
        let backend = Arc::clone(&self.backend);
        let prompt = record.prompt.clone();
        let params = record.params;
        let call: JoinHandle<Result<Generation, BackendError>> =
            tokio::spawn(async move { backend.generate(&prompt, &params).await });

        match tokio::time::timeout(self.task_time_limit, call).await {
            Ok(Ok(Ok(generation))) => CallOutcome::Generated(generation),
            Ok(Ok(Err(err))) => CallOutcome::Failed(err),
            Ok(Err(join_err)) => CallOutcome::Failed(join_failure(join_err)),
            Err(_elapsed) => CallOutcome::DeadlineExceeded,
        }
    }

    async fn ack(&self, worker_id: usize, tag: DeliveryTag) {
        match self.queue.ack(tag).await {
            Ok(()) => {}
            Err(QueueError::UnknownDelivery(_)) => {
                tracing::debug!(worker_id, tag = tag.0, "lease already expired, ack ignored");
            }
            Err(err) => tracing::warn!(worker_id, tag = tag.0, error = %err, "ack failed"),
        }
    }
}

fn join_failure(err: JoinError) -> BackendError {
    if err.is_panic() {
        let detail = panic_message(err.into_panic());
        BackendError::new(BACKEND_PANIC_KIND, "backend panicked").with_detail(detail)
    } else {
        BackendError::new(BACKEND_CANCELLED_KIND, "backend call was cancelled")
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Worker group handle.
/// - `request_shutdown` stops every worker from taking new leases
/// - `shutdown_and_join` also waits for in-flight tasks to finish
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers sharing one `WorkerLoop`.
    pub fn spawn(n: usize, worker: Arc<WorkerLoop>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let joins = (0..n)
            .map(|worker_id| {
                let worker = Arc::clone(&worker);
                let rx = shutdown_rx.clone();
                tokio::spawn(async move { worker.run(worker_id, rx).await })
            })
            .collect();

        Self { shutdown_tx, joins }
    }

    /// Number of spawned workers.
    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Stop taking new leases; returns without waiting.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Request shutdown and wait for every worker to leave its loop.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(err) = join.await {
                tracing::error!(error = %err, "worker task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GenerationParams, TaskId, Usage};
    use crate::domain::record::{TIMEOUT_ERROR_KIND, TIMEOUT_ERROR_MESSAGE};
    use crate::impls::{EchoBackend, InMemoryBrokerQueue, InMemoryResultStore};
    use crate::ports::{QueueDepth, SystemClock};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use ulid::Ulid;

    #[derive(Default)]
    struct Recorded(Mutex<Vec<LifecycleEvent>>);

    impl EventSink for Recorded {
        fn emit(&self, event: &LifecycleEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    impl Recorded {
        fn last(&self) -> LifecycleEvent {
            self.0.lock().unwrap().last().cloned().unwrap()
        }
    }

    struct Scripted(Result<&'static str, &'static str>);

    #[async_trait]
    impl GenerationBackend for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(
            &self,
            _prompt: &str,
            _params: &GenerationParams,
        ) -> Result<Generation, BackendError> {
            match self.0 {
                Ok(text) => Ok(Generation::new(text).with_usage(Usage {
                    prompt_tokens: 1,
                    completion_tokens: 1,
                })),
                Err(kind) => Err(BackendError::new(kind, "scripted failure").with_detail("trace")),
            }
        }
    }

    struct Panicking;

    #[async_trait]
    impl GenerationBackend for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn generate(
            &self,
            _prompt: &str,
            _params: &GenerationParams,
        ) -> Result<Generation, BackendError> {
            panic!("model exploded")
        }
    }

    struct Harness {
        worker: WorkerLoop,
        store: Arc<InMemoryResultStore<SystemClock>>,
        queue: Arc<InMemoryBrokerQueue>,
        events: Arc<Recorded>,
    }

    fn harness(backend: Arc<dyn GenerationBackend>, limit: Duration) -> Harness {
        let store = Arc::new(InMemoryResultStore::new(
            Duration::from_secs(3600),
            SystemClock,
        ));
        let queue = Arc::new(InMemoryBrokerQueue::new(limit + Duration::from_secs(30)));
        let events = Arc::new(Recorded::default());
        let worker = WorkerLoop::new(
            store.clone(),
            queue.clone(),
            backend,
            Arc::new(SystemClock),
            events.clone(),
            limit,
            Duration::from_millis(50),
        );
        Harness {
            worker,
            store,
            queue,
            events,
        }
    }

    async fn enqueue(h: &Harness) -> TaskId {
        let record = TaskRecord::new(
            TaskId::from_ulid(Ulid::new()),
            "anonymous",
            "2+2=",
            GenerationParams::default(),
            SystemClock.now(),
        );
        h.store.put(record.clone()).await.unwrap();
        h.queue.push(record.clone()).await.unwrap();
        record.id
    }

    async fn lease_and_handle(h: &Harness) {
        let delivery = h.queue.lease(Duration::ZERO).await.unwrap().unwrap();
        h.worker.handle(0, delivery).await;
    }

    #[tokio::test]
    async fn success_completes_and_acks() {
        let h = harness(Arc::new(Scripted(Ok("4"))), Duration::from_secs(5));
        let id = enqueue(&h).await;

        lease_and_handle(&h).await;

        let record = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.result_text.as_deref(), Some("4"));
        assert_eq!(h.queue.depth().await.unwrap(), QueueDepth::default());
    }

    #[tokio::test]
    async fn backend_error_is_captured() {
        let h = harness(
            Arc::new(Scripted(Err("ConnectionError"))),
            Duration::from_secs(5),
        );
        let id = enqueue(&h).await;

        lease_and_handle(&h).await;

        let record = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        let error = record.error.unwrap();
        assert_eq!(error.kind, "ConnectionError");
        assert_eq!(error.message, "scripted failure");
        assert!(record.result_text.is_none());

        // The log line gets the operator detail and the same timings as the record.
        let LifecycleEvent::Failed {
            detail, metrics, ..
        } = h.events.last()
        else {
            panic!("expected a failed event, got {:?}", h.events.last());
        };
        assert_eq!(detail.as_deref(), Some("trace"));
        assert_eq!(Some(metrics), record.metrics);
    }

    #[tokio::test]
    async fn panic_is_captured_as_failure() {
        let h = harness(Arc::new(Panicking), Duration::from_secs(5));
        let id = enqueue(&h).await;

        lease_and_handle(&h).await;

        let record = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error.unwrap().kind, BACKEND_PANIC_KIND);
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let backend = EchoBackend::new().with_latency(Duration::from_secs(30));
        let h = harness(Arc::new(backend), Duration::from_millis(200));
        let id = enqueue(&h).await;

        let started = tokio::time::Instant::now();
        lease_and_handle(&h).await;
        assert!(started.elapsed() < Duration::from_secs(5));

        let record = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::TimedOut);
        let error = record.error.unwrap();
        assert_eq!(error.kind, TIMEOUT_ERROR_KIND);
        assert_eq!(error.message, TIMEOUT_ERROR_MESSAGE);

        let LifecycleEvent::TimedOut { limit, metrics, .. } = h.events.last() else {
            panic!("expected a timed_out event, got {:?}", h.events.last());
        };
        assert_eq!(limit, Duration::from_millis(200));
        assert!(metrics.processing_time >= 0.19);
        assert!(metrics.total_time >= metrics.processing_time);
        assert_eq!(Some(metrics), record.metrics);
    }

    #[tokio::test]
    async fn duplicate_delivery_of_finished_task_is_skipped() {
        let h = harness(Arc::new(Scripted(Ok("4"))), Duration::from_secs(5));
        let id = enqueue(&h).await;
        lease_and_handle(&h).await;
        let finished = h.store.get(id).await.unwrap().unwrap();

        // Same message delivered again, e.g. after a lost ack.
        h.queue.push(finished.clone()).await.unwrap();
        lease_and_handle(&h).await;

        assert_eq!(h.store.get(id).await.unwrap().unwrap(), finished);
        assert_eq!(h.queue.depth().await.unwrap(), QueueDepth::default());
    }

    #[tokio::test]
    async fn redelivered_processing_task_is_closed_as_worker_lost() {
        let h = harness(Arc::new(Scripted(Ok("4"))), Duration::from_secs(5));
        let id = enqueue(&h).await;

        // Simulate a worker that marked processing and then died.
        let mut record = h.store.get(id).await.unwrap().unwrap();
        record.start_processing(SystemClock.now()).unwrap();
        h.store
            .compare_and_put(TaskStatus::Queued, record)
            .await
            .unwrap();

        lease_and_handle(&h).await;

        let record = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error.unwrap().kind, WORKER_LOST_ERROR_KIND);
    }

    #[tokio::test]
    async fn group_shuts_down_when_idle() {
        let h = harness(Arc::new(Scripted(Ok("4"))), Duration::from_secs(5));
        let group = WorkerGroup::spawn(2, Arc::new(h.worker));
        assert_eq!(group.len(), 2);

        tokio::time::timeout(Duration::from_secs(2), group.shutdown_and_join())
            .await
            .unwrap();
    }
}
