//! Task record: inputs + lifecycle state + outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::TransitionError;
use super::ids::TaskId;
use super::metrics::{TaskMetrics, Usage};
use super::params::GenerationParams;
use super::state::TaskStatus;

pub const TIMEOUT_ERROR_KIND: &str = "TimeoutError";
pub const TIMEOUT_ERROR_MESSAGE: &str = "exceeded time limit";
pub const WORKER_LOST_ERROR_KIND: &str = "WorkerLost";

/// Failure summary stored on a failed or timed-out record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: String,
    pub message: String,
}

/// One generation request and its evolving outcome.
///
/// Design:
/// - The result store holds the current record; every write replaces it.
/// - Inputs are fixed at creation. Each timestamp is written once, by the
///   transition that owns it.
/// - Transition methods check the state machine and leave the record
///   untouched when they refuse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub caller_id: String,
    pub prompt: String,
    pub params: GenerationParams,

    pub status: TaskStatus,

    pub enqueue_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<TaskMetrics>,
}

impl TaskRecord {
    /// A fresh `queued` record stamped with `enqueue_time`.
    pub fn new(
        id: TaskId,
        caller_id: impl Into<String>,
        prompt: impl Into<String>,
        params: GenerationParams,
        enqueue_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            caller_id: caller_id.into(),
            prompt: prompt.into(),
            params,
            status: TaskStatus::Queued,
            enqueue_time,
            start_time: None,
            end_time: None,
            result_text: None,
            error: None,
            metrics: None,
        }
    }

    /// Whether the record has reached its final state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Queued -> Processing.
    pub fn start_processing(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.check(TaskStatus::Processing)?;
        self.status = TaskStatus::Processing;
        self.start_time = Some(now.max(self.enqueue_time));
        Ok(())
    }

    /// Processing -> Completed.
    ///
    /// Token counts come from `usage` when the backend reported them and are
    /// estimated from the texts otherwise.
    pub fn complete(
        &mut self,
        now: DateTime<Utc>,
        text: String,
        usage: Option<Usage>,
    ) -> Result<(), TransitionError> {
        self.check(TaskStatus::Completed)?;
        let (usage, estimated) = match usage {
            Some(usage) => (usage, false),
            None => (Usage::estimate(&self.prompt, &text), true),
        };
        let end = self.close(TaskStatus::Completed, now);
        self.metrics = Some(self.timing(end).with_usage(usage, estimated));
        self.result_text = Some(text);
        Ok(())
    }

    /// Queued or Processing -> Failed.
    pub fn fail(
        &mut self,
        now: DateTime<Utc>,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<(), TransitionError> {
        self.check(TaskStatus::Failed)?;
        let end = self.close(TaskStatus::Failed, now);
        self.metrics = Some(self.timing(end));
        self.error = Some(TaskError {
            kind: kind.into(),
            message: message.into(),
        });
        Ok(())
    }

    /// Processing -> TimedOut.
    pub fn time_out(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.check(TaskStatus::TimedOut)?;
        let end = self.close(TaskStatus::TimedOut, now);
        self.metrics = Some(self.timing(end));
        self.error = Some(TaskError {
            kind: TIMEOUT_ERROR_KIND.to_string(),
            message: TIMEOUT_ERROR_MESSAGE.to_string(),
        });
        Ok(())
    }

    fn check(&self, next: TaskStatus) -> Result<(), TransitionError> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(TransitionError {
                from: self.status,
                to: next,
            })
        }
    }

    /// Move to a terminal status and stamp the end time. A record that
    /// never started (enqueue failure) gets `start_time == end_time`.
    fn close(&mut self, status: TaskStatus, now: DateTime<Utc>) -> DateTime<Utc> {
        let start = *self.start_time.get_or_insert(now.max(self.enqueue_time));
        let end = now.max(start);
        self.end_time = Some(end);
        self.status = status;
        end
    }

    fn timing(&self, end: DateTime<Utc>) -> TaskMetrics {
        let start = self.start_time.unwrap_or(end);
        TaskMetrics::timing(self.enqueue_time, start, end)
    }
}
