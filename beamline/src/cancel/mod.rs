//! Cooperative cancellation of in-flight jobs.
//!
//! Cancellation is requested through the execution backend's own
//! termination mechanism (token for local workers, a scheduler
//! cancellation for batch jobs) and is not instantaneous: a unit is
//! marked canceled once the request is acknowledged, without waiting for
//! the worker to actually exit. Units that already reached a terminal
//! state are left untouched and reported as such; a failure to cancel one
//! unit never aborts the rest.

use crate::dispatch::{BatchScheduler, LocalExecutor};
use crate::runtime::StatusRegistry;
use crate::state::{JobId, JobState, JobUpdate, Platform, TaskState, TaskUpdate};
use crate::store::{JobStore, StoreError};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// What happened to one unit (task or merge step) during cancellation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnitOutcome {
    /// Termination was requested and acknowledged; the unit is now
    /// canceled.
    Canceled,

    /// The unit was already in the given terminal state and was left
    /// untouched.
    AlreadyTerminal(String),

    /// The termination request failed; the unit's state is unchanged.
    RequestFailed(String),
}

impl UnitOutcome {
    fn already(state: impl ToString) -> Self {
        Self::AlreadyTerminal(state.to_string())
    }
}

/// Per-unit report of one cancellation call.
#[derive(Clone, Debug)]
pub struct CancelReport {
    pub job_id: JobId,

    /// Aggregate job state after the cancellation pass.
    pub job_state: JobState,

    /// Outcome per task, in ordinal order.
    pub tasks: Vec<(u32, UnitOutcome)>,

    /// Outcome for the merge / collect step.
    pub merge: UnitOutcome,
}

/// Requests termination of a job's tasks and merge step.
pub struct CancellationCoordinator {
    store: Arc<dyn JobStore>,
    registry: Arc<StatusRegistry>,
    local: Arc<LocalExecutor>,
    scheduler: Option<Arc<dyn BatchScheduler>>,
}

impl CancellationCoordinator {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<StatusRegistry>,
        local: Arc<LocalExecutor>,
        scheduler: Option<Arc<dyn BatchScheduler>>,
    ) -> Self {
        Self {
            store,
            registry,
            local,
            scheduler,
        }
    }

    /// Cancels a job: every non-terminal task and the merge step.
    ///
    /// Partial failures are reported per unit. The job's aggregate state
    /// is recomputed at the end from whatever mix of canceled and
    /// unchanged units resulted.
    pub async fn cancel(&self, job_id: &JobId) -> Result<CancelReport, StoreError> {
        let job = self.store.fetch_job(job_id)?;
        let tasks = self.store.fetch_tasks(job_id)?;

        info!(%job_id, platform = %job.platform, "Cancellation requested");

        let task_outcomes = match job.platform {
            Platform::Local => self.cancel_local_tasks(job_id, &tasks),
            Platform::Batch => self.cancel_batch_tasks(job_id, job.batch.array_id, &tasks).await,
        };

        let merge_outcome = if job.state.is_terminal() {
            UnitOutcome::already(job.state)
        } else {
            match job.platform {
                Platform::Local => match self.local.cancel_merge(job_id) {
                    Ok(()) => UnitOutcome::Canceled,
                    Err(error) => UnitOutcome::RequestFailed(error.to_string()),
                },
                Platform::Batch => self.cancel_scheduler_unit(job.batch.collect_id).await,
            }
        };

        let any_canceled = merge_outcome == UnitOutcome::Canceled
            || task_outcomes
                .iter()
                .any(|(_, outcome)| *outcome == UnitOutcome::Canceled);

        if any_canceled {
            let updated = self
                .store
                .persist_job(job_id, &JobUpdate::finished(JobState::Canceled, Utc::now()))?;
            self.registry.publish(job_id, updated.state);
        }

        let job_state = self.store.fetch_job(job_id)?.state;
        info!(%job_id, state = %job_state, "Cancellation pass finished");

        Ok(CancelReport {
            job_id: job_id.clone(),
            job_state,
            tasks: task_outcomes,
            merge: merge_outcome,
        })
    }

    /// Cancels local tasks one token at a time.
    fn cancel_local_tasks(
        &self,
        job_id: &JobId,
        tasks: &[crate::state::TaskRecord],
    ) -> Vec<(u32, UnitOutcome)> {
        tasks
            .iter()
            .map(|task| {
                if task.state.is_terminal() {
                    return (task.task_id, UnitOutcome::already(task.state));
                }
                match self.local.cancel_task(job_id, task.task_id) {
                    Ok(()) => {
                        self.mark_task_canceled(job_id, task.task_id);
                        (task.task_id, UnitOutcome::Canceled)
                    }
                    Err(error) => {
                        warn!(%job_id, task_id = task.task_id, %error, "Task cancellation failed");
                        (task.task_id, UnitOutcome::RequestFailed(error.to_string()))
                    }
                }
            })
            .collect()
    }

    /// Cancels batch tasks with a single array-job termination request.
    async fn cancel_batch_tasks(
        &self,
        job_id: &JobId,
        array_id: Option<u64>,
        tasks: &[crate::state::TaskRecord],
    ) -> Vec<(u32, UnitOutcome)> {
        let live: Vec<_> = tasks.iter().filter(|task| !task.state.is_terminal()).collect();
        let array_outcome = if live.is_empty() {
            None
        } else {
            Some(self.cancel_scheduler_unit(array_id).await)
        };

        tasks
            .iter()
            .map(|task| {
                if task.state.is_terminal() {
                    return (task.task_id, UnitOutcome::already(task.state));
                }
                let outcome = array_outcome
                    .clone()
                    .unwrap_or_else(|| UnitOutcome::RequestFailed("array not cancelled".into()));
                if outcome == UnitOutcome::Canceled {
                    self.mark_task_canceled(job_id, task.task_id);
                }
                (task.task_id, outcome)
            })
            .collect()
    }

    /// Requests termination of one scheduler job.
    async fn cancel_scheduler_unit(&self, scheduler_id: Option<u64>) -> UnitOutcome {
        let Some(scheduler) = self.scheduler.as_ref() else {
            return UnitOutcome::RequestFailed("no batch scheduler configured".into());
        };
        let Some(id) = scheduler_id else {
            return UnitOutcome::RequestFailed("scheduler id not recorded".into());
        };
        match scheduler.cancel(id).await {
            Ok(()) => UnitOutcome::Canceled,
            Err(error) => {
                warn!(scheduler_id = id, %error, "Scheduler termination request failed");
                UnitOutcome::RequestFailed(error.to_string())
            }
        }
    }

    /// Transitions an acknowledged task to canceled. The terminal guard
    /// makes this safe against races with a final log event.
    fn mark_task_canceled(&self, job_id: &JobId, task_id: u32) {
        let update = TaskUpdate::finished(TaskState::Canceled, Utc::now());
        if let Err(error) = self.store.persist_task(job_id, task_id, &update) {
            warn!(%job_id, task_id, %error, "Failed to persist canceled task");
        }
    }
}
