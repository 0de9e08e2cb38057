//! Serializable views handed to callers.

use serde::{Deserialize, Serialize};

use super::ids::TaskId;
use super::metrics::TaskMetrics;
use super::record::TaskRecord;
use super::state::TaskStatus;

/// Returned by a successful submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub task_id: TaskId,
    pub status: TaskStatus,
}

/// What a poll or stream reports for one task.
///
/// Example shapes:
/// `{"status":"processing","task_id":"task-01H..."}`,
/// `{"status":"completed","task_id":"...","result_text":"4","metrics":{...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskView {
    Queued {
        task_id: TaskId,
    },
    Processing {
        task_id: TaskId,
    },
    Completed {
        task_id: TaskId,
        result_text: String,
        metrics: Option<TaskMetrics>,
    },
    Failed {
        task_id: TaskId,
        error_kind: String,
        error_message: String,
    },
    TimedOut {
        task_id: TaskId,
        error_kind: String,
        error_message: String,
    },
}

impl TaskView {
    /// Status the view was taken in.
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskView::Queued { .. } => TaskStatus::Queued,
            TaskView::Processing { .. } => TaskStatus::Processing,
            TaskView::Completed { .. } => TaskStatus::Completed,
            TaskView::Failed { .. } => TaskStatus::Failed,
            TaskView::TimedOut { .. } => TaskStatus::TimedOut,
        }
    }
}

impl From<&TaskRecord> for TaskView {
    fn from(record: &TaskRecord) -> Self {
        let task_id = record.id;
        let (error_kind, error_message) = record
            .error
            .as_ref()
            .map(|e| (e.kind.clone(), e.message.clone()))
            .unwrap_or_default();

        match record.status {
            TaskStatus::Queued => TaskView::Queued { task_id },
            TaskStatus::Processing => TaskView::Processing { task_id },
            TaskStatus::Completed => TaskView::Completed {
                task_id,
                result_text: record.result_text.clone().unwrap_or_default(),
                metrics: record.metrics.clone(),
            },
            TaskStatus::Failed => TaskView::Failed {
                task_id,
                error_kind,
                error_message,
            },
            TaskStatus::TimedOut => TaskView::TimedOut {
                task_id,
                error_kind,
                error_message,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::GenerationParams;
    use chrono::Utc;
    use ulid::Ulid;

    fn record() -> TaskRecord {
        TaskRecord::new(
            TaskId::from_ulid(Ulid::new()),
            "anonymous",
            "2+2=",
            GenerationParams::default(),
            Utc::now(),
        )
    }

    #[test]
    fn queued_view_has_no_payload() {
        let view = TaskView::from(&record());
        let v = serde_json::to_value(&view).unwrap();
        assert_eq!(v["status"], "queued");
        assert!(v.get("result_text").is_none());
    }

    #[test]
    fn completed_view_carries_result_and_metrics() {
        let mut r = record();
        let now = Utc::now();
        r.start_processing(now).unwrap();
        r.complete(now, "4".to_string(), None).unwrap();

        let v = serde_json::to_value(TaskView::from(&r)).unwrap();
        assert_eq!(v["status"], "completed");
        assert_eq!(v["result_text"], "4");
        assert!(v["metrics"]["total_time"].is_number());
    }

    #[test]
    fn timed_out_view_carries_error_fields() {
        let mut r = record();
        let now = Utc::now();
        r.start_processing(now).unwrap();
        r.time_out(now).unwrap();

        let view = TaskView::from(&r);
        assert_eq!(view.status(), TaskStatus::TimedOut);
        let v = serde_json::to_value(view).unwrap();
        assert_eq!(v["status"], "timed_out");
        assert_eq!(v["error_message"], "exceeded time limit");
    }
}
