//! Per-job state, platform tagging and job-state derivation.

use super::task::TaskState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Unique identifier for a simulation job.
///
/// Job IDs are opaque strings; [`JobId::generate`] produces a random one at
/// submission time.
#[derive(Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Creates a job ID from an existing string value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random job ID.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the string value of this job ID.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobId({})", self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Where the job's workers execute.
///
/// This is a plain tag: platform-specific data lives in optional fields on
/// the job record and the dispatch layer branches on the tag, rather than
/// specializing the record type per platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Platform {
    /// Workers run as processes on the local pool.
    Local,
    /// Workers run as elements of a scheduler array job on a cluster.
    Batch,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "LOCAL"),
            Self::Batch => write!(f, "BATCH"),
        }
    }
}

/// Which simulator binary the workers run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimulatorKind {
    ShieldHit,
    Topas,
    Fluka,
    /// Scriptable stand-in used by tests and dry runs.
    Dummy,
}

impl fmt::Display for SimulatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShieldHit => write!(f, "shieldhit"),
            Self::Topas => write!(f, "topas"),
            Self::Fluka => write!(f, "fluka"),
            Self::Dummy => write!(f, "dummy"),
        }
    }
}

/// Execution state of a job.
///
/// The merging phases sit between "all workers done" and the final state:
/// they are entered explicitly by the merge step, never inferred from the
/// task states alone.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// All tasks are waiting for execution.
    #[default]
    Pending,

    /// At least one task is running.
    Running,

    /// All workers have finished; the merge step is queued.
    MergingQueued,

    /// The merge step is combining replica outputs.
    MergingRunning,

    /// Merged results are available.
    Completed,

    /// Every task failed, or the merge step produced nothing.
    Failed,

    /// Terminated on external request.
    Canceled,
}

impl JobState {
    /// Returns true if no further transitions are permitted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// Returns true if the job may still change state.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::MergingQueued => write!(f, "MERGING_QUEUED"),
            Self::MergingRunning => write!(f, "MERGING_RUNNING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Canceled => write!(f, "CANCELED"),
        }
    }
}

/// External execution handles for batch-platform jobs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchHandles {
    /// Scheduler ID of the worker array job.
    pub array_id: Option<u64>,
    /// Scheduler ID of the dependent collect job.
    pub collect_id: Option<u64>,
    /// Remote directory the job runs in.
    pub job_dir: Option<String>,
}

/// Partial update for a job record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JobUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<JobState>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub array_id: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub collect_id: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_dir: Option<String>,
}

impl JobUpdate {
    /// Update moving the job to the given state.
    pub fn state(state: JobState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    /// Terminal update stamping the end time.
    pub fn finished(state: JobState, at: DateTime<Utc>) -> Self {
        Self {
            state: Some(state),
            end_time: Some(at),
            ..Self::default()
        }
    }
}

/// One submitted simulation job.
///
/// Created at submission with its full complement of task records and
/// mutated only through [`JobRecord::apply`] and the derivation rule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,

    /// Human-readable title for logs and status output.
    pub title: String,

    pub platform: Platform,

    pub sim_type: SimulatorKind,

    /// SHA-256 digest of the per-job update key. Writers on the update
    /// boundary present the key itself; only the digest is stored.
    pub update_key_digest: String,

    /// Declared number of parallel tasks; fixed at submission.
    pub ntasks: u32,

    pub state: JobState,

    pub start_time: DateTime<Utc>,

    /// Set exactly once, by the merge step or the cancellation path.
    pub end_time: Option<DateTime<Utc>>,

    /// Scheduler handles; only populated for [`Platform::Batch`] jobs.
    pub batch: BatchHandles,
}

impl JobRecord {
    /// Creates a pending job record. The update key is supplied in clear
    /// and stored as a digest.
    pub fn new(
        job_id: JobId,
        title: impl Into<String>,
        platform: Platform,
        sim_type: SimulatorKind,
        update_key: &str,
        ntasks: u32,
    ) -> Self {
        Self {
            job_id,
            title: title.into(),
            platform,
            sim_type,
            update_key_digest: digest_update_key(update_key),
            ntasks,
            state: JobState::Pending,
            start_time: Utc::now(),
            end_time: None,
            batch: BatchHandles::default(),
        }
    }

    /// Verifies a presented update key against the stored digest.
    pub fn check_update_key(&self, update_key: &str) -> bool {
        digest_update_key(update_key) == self.update_key_digest
    }

    /// Applies a partial update to this record.
    ///
    /// A no-op once the job is terminal. Returns true when any field
    /// actually changed, so callers can skip a persistence round-trip for
    /// redundant updates.
    pub fn apply(&mut self, update: &JobUpdate) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        let mut changed = false;

        if let Some(state) = update.state {
            if state != self.state {
                self.state = state;
                changed = true;
            }
        }
        if let Some(end) = update.end_time {
            if self.end_time.is_none() {
                self.end_time = Some(end);
                changed = true;
            }
        }
        if let Some(array_id) = update.array_id {
            if self.batch.array_id != Some(array_id) {
                self.batch.array_id = Some(array_id);
                changed = true;
            }
        }
        if let Some(collect_id) = update.collect_id {
            if self.batch.collect_id != Some(collect_id) {
                self.batch.collect_id = Some(collect_id);
                changed = true;
            }
        }
        if let Some(ref job_dir) = update.job_dir {
            if self.batch.job_dir.as_deref() != Some(job_dir.as_str()) {
                self.batch.job_dir = Some(job_dir.clone());
                changed = true;
            }
        }

        changed
    }
}

fn digest_update_key(update_key: &str) -> String {
    let digest = Sha256::digest(update_key.as_bytes());
    format!("{digest:x}")
}

/// Derives the job state implied by the current task states.
///
/// Pure function of the task-state multiset:
///
/// - all tasks pending → the job is pending;
/// - all tasks failed → the job failed;
/// - any task running → the job is running;
/// - otherwise `None`: the job state is left alone. In particular, "all
///   tasks completed" does not complete the job; only the merge step may
///   finalize it.
pub fn derive_job_state(task_states: &[TaskState]) -> Option<JobState> {
    if task_states.is_empty() {
        return None;
    }
    if task_states.iter().all(|s| *s == TaskState::Pending) {
        return Some(JobState::Pending);
    }
    if task_states.iter().all(|s| *s == TaskState::Failed) {
        return Some(JobState::Failed);
    }
    if task_states.iter().any(|s| *s == TaskState::Running) {
        return Some(JobState::Running);
    }
    None
}
