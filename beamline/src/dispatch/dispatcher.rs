//! Job submission: decomposition into tasks and platform fan-out.

use super::batch::{submit_batch_job, BatchError, BatchScheduler};
use super::local::{LocalError, LocalExecutor};
use crate::runtime::{JobHandle, StatusRegistry};
use crate::state::{JobId, JobRecord, JobUpdate, Platform, SimulatorKind, TaskRecord};
use crate::store::{JobStore, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// Errors from job submission.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Invalid submission: {0}")]
    Invalid(String),

    #[error("No batch scheduler is configured")]
    BatchUnavailable,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Local(#[from] LocalError),

    #[error(transparent)]
    Batch(#[from] BatchError),
}

/// One job submission as received on the submission boundary.
#[derive(Clone, Debug)]
pub struct SubmitRequest {
    /// Human-readable job title.
    pub title: String,

    /// Simulator input files by name.
    pub input_files: HashMap<String, Vec<u8>>,

    /// Number of parallel worker tasks.
    pub ntasks: u32,

    pub sim_type: SimulatorKind,

    pub platform: Platform,
}

/// Turns submissions into persisted jobs with running workers.
///
/// `submit` creates the job and its `ntasks` pending task records, wires
/// the status handle, and hands execution to the platform backend. It
/// returns as soon as the work is in flight; completion is observed
/// through the handle or the status boundary.
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    registry: Arc<StatusRegistry>,
    local: Arc<LocalExecutor>,
    scheduler: Option<Arc<dyn BatchScheduler>>,
    callback_url: String,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<StatusRegistry>,
        local: Arc<LocalExecutor>,
        scheduler: Option<Arc<dyn BatchScheduler>>,
        callback_url: String,
    ) -> Self {
        Self {
            store,
            registry,
            local,
            scheduler,
            callback_url,
        }
    }

    /// Submits a job and returns its handle immediately.
    pub async fn submit(&self, request: SubmitRequest) -> Result<JobHandle, SubmitError> {
        if request.ntasks == 0 {
            return Err(SubmitError::Invalid("ntasks must be at least 1".into()));
        }
        if request.platform == Platform::Batch && self.scheduler.is_none() {
            return Err(SubmitError::BatchUnavailable);
        }

        let job_id = JobId::generate();
        let update_key = Uuid::new_v4().to_string();
        let job = JobRecord::new(
            job_id.clone(),
            request.title.clone(),
            request.platform,
            request.sim_type,
            &update_key,
            request.ntasks,
        );
        let tasks = (1..=request.ntasks).map(TaskRecord::new).collect();

        let state_rx = self.registry.register(job_id.clone());
        self.store.insert_job(job.clone(), tasks)?;

        info!(
            %job_id,
            title = %request.title,
            platform = %request.platform,
            sim_type = %request.sim_type,
            ntasks = request.ntasks,
            "Job submitted"
        );

        match request.platform {
            Platform::Local => {
                self.local
                    .spawn_job(&job, &update_key, &request.input_files)
                    .await?;
            }
            Platform::Batch => {
                // Checked above; scheduler is present on this path.
                let scheduler = self.scheduler.as_ref().ok_or(SubmitError::BatchUnavailable)?;
                let submission =
                    submit_batch_job(scheduler.as_ref(), &job, &update_key, &self.callback_url)
                        .await?;
                self.store.persist_job(
                    &job_id,
                    &JobUpdate {
                        array_id: Some(submission.array_id),
                        collect_id: Some(submission.collect_id),
                        ..JobUpdate::default()
                    },
                )?;
            }
        }

        Ok(JobHandle::new(job_id, state_rx))
    }
}
