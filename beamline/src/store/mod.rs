//! Persistence boundary for job and task records.
//!
//! The storage engine proper is outside this crate; the orchestration layer
//! talks to it exclusively through the narrow [`JobStore`] trait (fetch and
//! persist by id, nothing else). [`MemoryStore`] is the in-process
//! implementation used by the orchestrator and the test suite.
//!
//! Concurrency contract: the update consumer is the single writer of task
//! and job state, so implementations need no row-level locking on the
//! update path; reads may happen concurrently from the status boundary.

use crate::merge::Estimator;
use crate::state::{JobId, JobRecord, JobUpdate, TaskRecord, TaskUpdate};
use dashmap::DashMap;
use thiserror::Error;

/// Errors from the persistence boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job {0} does not exist")]
    JobNotFound(JobId),

    #[error("Task {task_id} of job {job_id} does not exist")]
    TaskNotFound { job_id: JobId, task_id: u32 },

    #[error("Job {0} already exists")]
    DuplicateJob(JobId),

    #[error("Results for job {0} are unavailable")]
    ResultsUnavailable(JobId),
}

/// Narrow persistence interface consumed by the orchestration layer.
pub trait JobStore: Send + Sync + 'static {
    /// Inserts a new job together with its task records.
    fn insert_job(&self, job: JobRecord, tasks: Vec<TaskRecord>) -> Result<(), StoreError>;

    /// Fetches a snapshot of a job record.
    fn fetch_job(&self, job_id: &JobId) -> Result<JobRecord, StoreError>;

    /// Applies a partial update to a job record. Returns the resulting
    /// snapshot.
    fn persist_job(&self, job_id: &JobId, update: &JobUpdate) -> Result<JobRecord, StoreError>;

    /// Fetches a snapshot of one task record.
    fn fetch_task(&self, job_id: &JobId, task_id: u32) -> Result<TaskRecord, StoreError>;

    /// Applies a partial update to a task record. Returns the resulting
    /// snapshot.
    fn persist_task(
        &self,
        job_id: &JobId,
        task_id: u32,
        update: &TaskUpdate,
    ) -> Result<TaskRecord, StoreError>;

    /// Fetches snapshots of all task records of a job, in ordinal order.
    fn fetch_tasks(&self, job_id: &JobId) -> Result<Vec<TaskRecord>, StoreError>;

    /// Stores the merged estimators for a job.
    fn insert_results(&self, job_id: &JobId, estimators: Vec<Estimator>) -> Result<(), StoreError>;

    /// Fetches the merged estimators for a job, if any were stored.
    fn fetch_results(&self, job_id: &JobId) -> Result<Vec<Estimator>, StoreError>;
}

/// All persisted state of one job under a single entry.
struct JobEntry {
    job: JobRecord,
    tasks: Vec<TaskRecord>,
    results: Option<Vec<Estimator>>,
}

/// In-memory [`JobStore`] backed by a concurrent map.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<JobId, JobEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryStore {
    fn insert_job(&self, job: JobRecord, tasks: Vec<TaskRecord>) -> Result<(), StoreError> {
        let job_id = job.job_id.clone();
        if self.entries.contains_key(&job_id) {
            return Err(StoreError::DuplicateJob(job_id));
        }
        self.entries.insert(
            job_id,
            JobEntry {
                job,
                tasks,
                results: None,
            },
        );
        Ok(())
    }

    fn fetch_job(&self, job_id: &JobId) -> Result<JobRecord, StoreError> {
        self.entries
            .get(job_id)
            .map(|entry| entry.job.clone())
            .ok_or_else(|| StoreError::JobNotFound(job_id.clone()))
    }

    fn persist_job(&self, job_id: &JobId, update: &JobUpdate) -> Result<JobRecord, StoreError> {
        let mut entry = self
            .entries
            .get_mut(job_id)
            .ok_or_else(|| StoreError::JobNotFound(job_id.clone()))?;
        entry.job.apply(update);
        Ok(entry.job.clone())
    }

    fn fetch_task(&self, job_id: &JobId, task_id: u32) -> Result<TaskRecord, StoreError> {
        let entry = self
            .entries
            .get(job_id)
            .ok_or_else(|| StoreError::JobNotFound(job_id.clone()))?;
        entry
            .tasks
            .iter()
            .find(|task| task.task_id == task_id)
            .cloned()
            .ok_or(StoreError::TaskNotFound {
                job_id: job_id.clone(),
                task_id,
            })
    }

    fn persist_task(
        &self,
        job_id: &JobId,
        task_id: u32,
        update: &TaskUpdate,
    ) -> Result<TaskRecord, StoreError> {
        let mut entry = self
            .entries
            .get_mut(job_id)
            .ok_or_else(|| StoreError::JobNotFound(job_id.clone()))?;
        let task = entry
            .tasks
            .iter_mut()
            .find(|task| task.task_id == task_id)
            .ok_or(StoreError::TaskNotFound {
                job_id: job_id.clone(),
                task_id,
            })?;
        task.apply(update);
        Ok(task.clone())
    }

    fn fetch_tasks(&self, job_id: &JobId) -> Result<Vec<TaskRecord>, StoreError> {
        self.entries
            .get(job_id)
            .map(|entry| entry.tasks.clone())
            .ok_or_else(|| StoreError::JobNotFound(job_id.clone()))
    }

    fn insert_results(&self, job_id: &JobId, estimators: Vec<Estimator>) -> Result<(), StoreError> {
        let mut entry = self
            .entries
            .get_mut(job_id)
            .ok_or_else(|| StoreError::JobNotFound(job_id.clone()))?;
        entry.results = Some(estimators);
        Ok(())
    }

    fn fetch_results(&self, job_id: &JobId) -> Result<Vec<Estimator>, StoreError> {
        let entry = self
            .entries
            .get(job_id)
            .ok_or_else(|| StoreError::JobNotFound(job_id.clone()))?;
        entry
            .results
            .clone()
            .ok_or_else(|| StoreError::ResultsUnavailable(job_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::Page;
    use crate::state::{JobState, Platform, SimulatorKind, TaskState};

    fn store_with_job(ntasks: u32) -> (MemoryStore, JobId) {
        let store = MemoryStore::new();
        let job_id = JobId::new("job-s");
        let job = JobRecord::new(
            job_id.clone(),
            "test",
            Platform::Local,
            SimulatorKind::Dummy,
            "key",
            ntasks,
        );
        let tasks = (1..=ntasks).map(TaskRecord::new).collect();
        store.insert_job(job, tasks).unwrap();
        (store, job_id)
    }

    #[test]
    fn test_insert_and_fetch() {
        let (store, job_id) = store_with_job(3);
        let job = store.fetch_job(&job_id).unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(store.fetch_tasks(&job_id).unwrap().len(), 3);
        assert_eq!(store.fetch_task(&job_id, 2).unwrap().task_id, 2);
    }

    #[test]
    fn test_duplicate_job_rejected() {
        let (store, job_id) = store_with_job(1);
        let duplicate = JobRecord::new(
            job_id.clone(),
            "again",
            Platform::Local,
            SimulatorKind::Dummy,
            "key",
            1,
        );
        assert!(matches!(
            store.insert_job(duplicate, vec![]),
            Err(StoreError::DuplicateJob(_))
        ));
    }

    #[test]
    fn test_unknown_ids() {
        let (store, job_id) = store_with_job(1);
        assert!(matches!(
            store.fetch_job(&JobId::new("nope")),
            Err(StoreError::JobNotFound(_))
        ));
        assert!(matches!(
            store.fetch_task(&job_id, 99),
            Err(StoreError::TaskNotFound { task_id: 99, .. })
        ));
    }

    #[test]
    fn test_persist_task_applies_rules() {
        let (store, job_id) = store_with_job(1);
        let task = store
            .persist_task(&job_id, 1, &TaskUpdate::progress(100, 30))
            .unwrap();
        assert_eq!(task.simulated_primaries, 100);
        assert_eq!(task.state, TaskState::Pending);
    }

    #[test]
    fn test_results_lifecycle() {
        let (store, job_id) = store_with_job(1);
        assert!(matches!(
            store.fetch_results(&job_id),
            Err(StoreError::ResultsUnavailable(_))
        ));

        let estimators = vec![Estimator::new(
            "dose",
            vec![Page::new(0, "Dose", "Gy", vec![1.0])],
        )];
        store.insert_results(&job_id, estimators.clone()).unwrap();
        assert_eq!(store.fetch_results(&job_id).unwrap(), estimators);
    }
}
