//! Status views returned on the status boundary.

use crate::state::{JobId, JobRecord, JobState, TaskRecord, TaskState};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Remaining-time estimate broken into clock components for display.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct EstimatedTime {
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
}

impl EstimatedTime {
    /// Splits a second count into hours, minutes and seconds.
    pub fn from_seconds(total: u64) -> Self {
        Self {
            hours: total / 3600,
            minutes: (total / 60) % 60,
            seconds: total % 60,
        }
    }
}

/// Caller-facing view of one task.
#[derive(Clone, Debug, Serialize)]
pub struct TaskStatusView {
    pub task_id: u32,
    pub state: TaskState,
    pub requested_primaries: u64,
    pub simulated_primaries: u64,

    /// Present only while the task is non-terminal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time: Option<EstimatedTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    pub last_update_time: DateTime<Utc>,
}

impl From<&TaskRecord> for TaskStatusView {
    fn from(task: &TaskRecord) -> Self {
        let estimated_time = if task.state.is_terminal() {
            None
        } else {
            task.estimated_seconds.map(EstimatedTime::from_seconds)
        };
        Self {
            task_id: task.task_id,
            state: task.state,
            requested_primaries: task.requested_primaries,
            simulated_primaries: task.simulated_primaries,
            estimated_time,
            start_time: task.start_time,
            end_time: task.end_time,
            last_update_time: task.last_update_time,
        }
    }
}

/// Caller-facing view of a job and its tasks.
#[derive(Clone, Debug, Serialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub title: String,
    pub job_state: JobState,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    pub tasks: Vec<TaskStatusView>,
}

impl JobStatusView {
    pub fn new(job: &JobRecord, tasks: &[TaskRecord]) -> Self {
        Self {
            job_id: job.job_id.clone(),
            title: job.title.clone(),
            job_state: job.state,
            end_time: job.end_time,
            tasks: tasks.iter().map(TaskStatusView::from).collect(),
        }
    }
}
