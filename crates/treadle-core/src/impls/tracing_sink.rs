//! EventSink that turns lifecycle events into structured log lines.

use crate::ports::{EventSink, LifecycleEvent};

/// Logs every lifecycle event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::Submitted { task_id, caller_id } => {
                tracing::info!(%task_id, %caller_id, "task submitted");
            }
            LifecycleEvent::Rejected { caller_id, reason } => {
                tracing::info!(%caller_id, %reason, "submission rejected");
            }
            LifecycleEvent::Started {
                task_id,
                queue_wait,
            } => {
                tracing::info!(%task_id, queue_wait_ms = queue_wait.as_millis() as u64, "task started");
            }
            LifecycleEvent::Completed { task_id, metrics } => {
                tracing::info!(
                    %task_id,
                    queue_wait_time = metrics.queue_wait_time,
                    processing_time = metrics.processing_time,
                    total_time = metrics.total_time,
                    completion_tokens = metrics.completion_tokens,
                    tokens_per_second = metrics.tokens_per_second,
                    estimated = metrics.estimated,
                    "task completed"
                );
            }
            LifecycleEvent::Failed {
                task_id,
                error_kind,
                error_message,
                detail,
                metrics,
            } => {
                tracing::error!(
                    %task_id,
                    %error_kind,
                    %error_message,
                    detail = detail.as_deref().unwrap_or(""),
                    queue_wait_time = metrics.queue_wait_time,
                    processing_time = metrics.processing_time,
                    total_time = metrics.total_time,
                    "task failed"
                );
            }
            LifecycleEvent::TimedOut {
                task_id,
                limit,
                metrics,
            } => {
                tracing::warn!(
                    %task_id,
                    limit_secs = limit.as_secs_f64(),
                    queue_wait_time = metrics.queue_wait_time,
                    processing_time = metrics.processing_time,
                    total_time = metrics.total_time,
                    "task exceeded time limit"
                );
            }
            LifecycleEvent::EnqueueFailed {
                task_id,
                error_message,
            } => {
                tracing::error!(%task_id, %error_message, "broker rejected task, closed as failed");
            }
            LifecycleEvent::DuplicateDelivery { task_id } => {
                tracing::debug!(%task_id, "duplicate delivery of finished task, acking");
            }
            LifecycleEvent::WorkerLost { task_id } => {
                tracing::warn!(%task_id, "redelivered task was still processing, marking failed");
            }
        }
    }
}
