//! SubmissionGateway - admission of new generation tasks.
//!
//! # Flow
//! 1. Validate prompt and params (pure)
//! 2. Take a token from the caller's bucket
//! 3. Allocate an id, write the `queued` record, push it on the broker
//! 4. Return the id without waiting for any processing
//!
//! A failure in 1 or 2 leaves no trace in the store or the queue.

use std::sync::Arc;

use crate::app::rate_limit::RateLimiter;
use crate::domain::{
    GenerationParams, ParamLimits, SubmitError, SubmitReceipt, TaskRecord, TaskStatus,
};
use crate::ports::{BrokerQueue, Clock, EventSink, IdGenerator, LifecycleEvent, ResultStore};

pub const DEFAULT_CALLER_ID: &str = "anonymous";
pub const ENQUEUE_ERROR_KIND: &str = "EnqueueError";

/// Admission point shared by every submitter.
pub struct SubmissionGateway {
    store: Arc<dyn ResultStore>,
    queue: Arc<dyn BrokerQueue>,
    limiter: Arc<RateLimiter<Arc<dyn Clock>>>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    limits: ParamLimits,
}

impl SubmissionGateway {
    pub fn new(
        store: Arc<dyn ResultStore>,
        queue: Arc<dyn BrokerQueue>,
        limiter: Arc<RateLimiter<Arc<dyn Clock>>>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
        limits: ParamLimits,
    ) -> Self {
        Self {
            store,
            queue,
            limiter,
            ids,
            clock,
            events,
            limits,
        }
    }

    /// Admission bounds applied by `submit`.
    pub fn limits(&self) -> &ParamLimits {
        &self.limits
    }

    /// Admit one task. `caller_id` defaults to `"anonymous"`.
    pub async fn submit(
        &self,
        caller_id: Option<&str>,
        prompt: &str,
        params: GenerationParams,
    ) -> Result<SubmitReceipt, SubmitError> {
        let caller_id = caller_id
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CALLER_ID);

        if let Err(err) = self.limits.validate(prompt, &params) {
            self.reject(caller_id, "validation");
            return Err(err.into());
        }

        if let Err(err) = self.limiter.try_acquire(caller_id).await {
            self.reject(caller_id, "rate_limited");
            return Err(err.into());
        }

        let record = TaskRecord::new(
            self.ids.generate_task_id(),
            caller_id,
            prompt,
            params,
            self.clock.now(),
        );
        let task_id = record.id;

        self.store.put(record.clone()).await?;

        if let Err(err) = self.queue.push(record.clone()).await {
            self.close_unqueued(record, &err.to_string()).await;
            return Err(err.into());
        }

        self.events.emit(&LifecycleEvent::Submitted {
            task_id,
            caller_id: caller_id.to_string(),
        });

        Ok(SubmitReceipt {
            task_id,
            status: TaskStatus::Queued,
        })
    }

    fn reject(&self, caller_id: &str, reason: &str) {
        self.events.emit(&LifecycleEvent::Rejected {
            caller_id: caller_id.to_string(),
            reason: reason.to_string(),
        });
    }

    /// The record is already visible but no worker will ever see it; close
    /// it so pollers get an answer.
    async fn close_unqueued(&self, mut record: TaskRecord, reason: &str) {
        let task_id = record.id;
        if record
            .fail(self.clock.now(), ENQUEUE_ERROR_KIND, reason)
            .is_err()
        {
            return;
        }

        match self.store.compare_and_put(TaskStatus::Queued, record).await {
            Ok(()) => self.events.emit(&LifecycleEvent::EnqueueFailed {
                task_id,
                error_message: reason.to_string(),
            }),
            Err(err) => {
                tracing::error!(%task_id, error = %err, "could not close record after enqueue failure");
            }
        }
    }
}
