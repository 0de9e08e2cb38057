//! EventSink port - lifecycle event reporting.
//!
//! # Implementations
//! - **TracingEventSink**: structured log line per event
//! - **StatsCollector**: in-process counters
//! - **FanoutSink**: forwards to several sinks
//!
//! Emitting is synchronous and infallible. A sink must never slow down or
//! fail the task it reports on.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::domain::{TaskId, TaskMetrics};

/// Something that happened to a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Submitted {
        task_id: TaskId,
        caller_id: String,
    },
    Rejected {
        caller_id: String,
        reason: String,
    },
    Started {
        task_id: TaskId,
        queue_wait: Duration,
    },
    Completed {
        task_id: TaskId,
        metrics: TaskMetrics,
    },
    Failed {
        task_id: TaskId,
        error_kind: String,
        error_message: String,
        /// Operator-only diagnostics, never stored in the record.
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        metrics: TaskMetrics,
    },
    TimedOut {
        task_id: TaskId,
        limit: Duration,
        metrics: TaskMetrics,
    },
    /// The record was stored but the broker refused it; it was closed
    /// without ever reaching a worker.
    EnqueueFailed {
        task_id: TaskId,
        error_message: String,
    },
    /// A redelivered message whose record was already terminal.
    DuplicateDelivery {
        task_id: TaskId,
    },
    /// A redelivered message whose record was still processing.
    WorkerLost {
        task_id: TaskId,
    },
}

impl LifecycleEvent {
    /// Stable snake_case name, the same as the serialized `event` tag.
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::Submitted { .. } => "submitted",
            LifecycleEvent::Rejected { .. } => "rejected",
            LifecycleEvent::Started { .. } => "started",
            LifecycleEvent::Completed { .. } => "completed",
            LifecycleEvent::Failed { .. } => "failed",
            LifecycleEvent::TimedOut { .. } => "timed_out",
            LifecycleEvent::EnqueueFailed { .. } => "enqueue_failed",
            LifecycleEvent::DuplicateDelivery { .. } => "duplicate_delivery",
            LifecycleEvent::WorkerLost { .. } => "worker_lost",
        }
    }
}

/// Receiver of lifecycle events. Called inline on the emitting task.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &LifecycleEvent);
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn emit(&self, event: &LifecycleEvent) {
        (**self).emit(event)
    }
}

/// Forwards each event to every inner sink, in order.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sink; events reach sinks in the order they were added.
    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Number of inner sinks.
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &LifecycleEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use ulid::Ulid;

    #[derive(Default)]
    struct Recording(Mutex<Vec<&'static str>>);

    impl EventSink for Recording {
        fn emit(&self, event: &LifecycleEvent) {
            self.0.lock().unwrap().push(event.name());
        }
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let a = Arc::new(Recording::default());
        let b = Arc::new(Recording::default());
        let fanout = FanoutSink::new().with(a.clone()).with(b.clone());

        let task_id = TaskId::from_ulid(Ulid::new());
        fanout.emit(&LifecycleEvent::DuplicateDelivery { task_id });

        assert_eq!(*a.0.lock().unwrap(), vec!["duplicate_delivery"]);
        assert_eq!(*b.0.lock().unwrap(), vec!["duplicate_delivery"]);
    }

    #[test]
    fn events_serialize_with_tag() {
        let event = LifecycleEvent::Rejected {
            caller_id: "alice".to_string(),
            reason: "rate_limited".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "rejected");
        assert_eq!(json["caller_id"], "alice");
    }
}
