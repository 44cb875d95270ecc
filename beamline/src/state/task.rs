//! Per-task state and the partial-update transition rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution state of a single worker task.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Waiting for a worker to pick the task up.
    #[default]
    Pending,

    /// A worker is running the simulation for this task.
    Running,

    /// The simulation finished and produced its full set of primaries.
    Completed,

    /// The worker exited abnormally, its log never appeared, or the
    /// simulator reported a timeout.
    Failed,

    /// Terminated on external request before completion.
    Canceled,
}

impl TaskState {
    /// Returns true if no further transitions are permitted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// Returns true if the task may still make progress.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Canceled => write!(f, "CANCELED"),
        }
    }
}

/// Partial update for a task record.
///
/// Every field is optional; absent fields leave the record untouched.
/// This is the `update` payload carried inside an update envelope.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<TaskState>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_primaries: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulated_primaries: Option<u64>,

    /// Estimated remaining run time in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_seconds: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl TaskUpdate {
    /// Update marking the task as running, as emitted when the simulator
    /// logs its requested primary count.
    pub fn started(requested_primaries: u64, at: DateTime<Utc>) -> Self {
        Self {
            state: Some(TaskState::Running),
            requested_primaries: Some(requested_primaries),
            simulated_primaries: Some(0),
            start_time: Some(at),
            ..Self::default()
        }
    }

    /// Progress update with the current primary count and remaining-time
    /// estimate.
    pub fn progress(simulated_primaries: u64, estimated_seconds: u64) -> Self {
        Self {
            simulated_primaries: Some(simulated_primaries),
            estimated_seconds: Some(estimated_seconds),
            ..Self::default()
        }
    }

    /// Terminal update for the given state, stamping the end time.
    pub fn finished(state: TaskState, at: DateTime<Utc>) -> Self {
        Self {
            state: Some(state),
            end_time: Some(at),
            ..Self::default()
        }
    }
}

/// State of one worker task within a job.
///
/// Tasks are identified by their job-scoped ordinal (1-based, matching the
/// array index used on batch clusters). The record is only ever mutated
/// through [`TaskRecord::apply`], which enforces the transition rules.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Job-scoped ordinal of this task.
    pub task_id: u32,

    pub state: TaskState,

    /// Total number of primaries assigned to this task.
    pub requested_primaries: u64,

    /// Progress counter; non-decreasing while the task is alive.
    pub simulated_primaries: u64,

    /// Estimated remaining run time in seconds. Cleared once `end_time`
    /// is set.
    pub estimated_seconds: Option<u64>,

    pub start_time: Option<DateTime<Utc>>,

    pub end_time: Option<DateTime<Utc>>,

    pub last_update_time: DateTime<Utc>,
}

impl TaskRecord {
    /// Creates a pending task record.
    pub fn new(task_id: u32) -> Self {
        Self {
            task_id,
            state: TaskState::Pending,
            requested_primaries: 0,
            simulated_primaries: 0,
            estimated_seconds: None,
            start_time: None,
            end_time: None,
            last_update_time: Utc::now(),
        }
    }

    /// Applies a partial update to this record.
    ///
    /// Once the task is terminal this is a no-op, which makes late or
    /// duplicated envelopes harmless. Otherwise each present field is
    /// applied under its own rule:
    ///
    /// - primary counters only when changed, and `simulated_primaries`
    ///   never backwards;
    /// - on a transition to [`TaskState::Completed`] the progress counter
    ///   snaps to the requested count;
    /// - `estimated_seconds` only while the end time is unset;
    /// - `start_time` / `end_time` first-write-wins; setting the end time
    ///   clears the remaining-time estimate;
    /// - `last_update_time` is always refreshed.
    pub fn apply(&mut self, update: &TaskUpdate) {
        if self.state.is_terminal() {
            return;
        }

        if let Some(requested) = update.requested_primaries {
            if requested != self.requested_primaries {
                self.requested_primaries = requested;
            }
        }

        // A restarted monitor re-reads the log from the top and may replay
        // stale counts; progress must never regress.
        if let Some(simulated) = update.simulated_primaries {
            if simulated > self.simulated_primaries {
                self.simulated_primaries = simulated;
            }
        }

        if let Some(state) = update.state {
            if state != self.state {
                self.state = state;
                if state == TaskState::Completed {
                    self.simulated_primaries = self.requested_primaries;
                }
            }
        }

        if let Some(estimated) = update.estimated_seconds {
            if self.end_time.is_none() && self.estimated_seconds != Some(estimated) {
                self.estimated_seconds = Some(estimated);
            }
        }

        if let Some(start) = update.start_time {
            if self.start_time.is_none() {
                self.start_time = Some(start);
            }
        }

        if let Some(end) = update.end_time {
            if self.end_time.is_none() {
                self.end_time = Some(end);
                self.estimated_seconds = None;
            }
        }

        self.last_update_time = Utc::now();
    }
}
