//! Batch-scheduler submission path.

use super::templates::{render_template, ARRAY_SCRIPT, COLLECT_SCRIPT};
use crate::state::JobRecord;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tracing::info;

/// Errors from the batch scheduler backend.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Array job submission failed: {0}")]
    ArraySubmission(String),

    #[error("Collect job submission failed: {0}")]
    CollectSubmission(String),

    #[error("Termination request for scheduler job {id} failed: {reason}")]
    Cancellation { id: u64, reason: String },
}

/// Scheduler handles returned by a successful batch submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchSubmission {
    pub array_id: u64,
    pub collect_id: u64,
}

/// External array-job scheduler.
///
/// The transport to the cluster (SSH, REST, a site-specific gateway) is
/// someone else's problem; this trait is the full extent of what the
/// orchestration layer asks of it. Submissions return the scheduler's
/// numeric job id (the `--parsable` output of `sbatch`-style tooling).
pub trait BatchScheduler: Send + Sync + 'static {
    /// Submits an `ntasks`-element array job running `script`.
    fn submit_array<'a>(
        &'a self,
        script: String,
        ntasks: u32,
    ) -> Pin<Box<dyn Future<Output = Result<u64, BatchError>> + Send + 'a>>;

    /// Submits a job running `script` that starts only after the given
    /// job has exited, regardless of its exit status
    /// (`--dependency=afterany`).
    fn submit_after_any<'a>(
        &'a self,
        script: String,
        after: u64,
    ) -> Pin<Box<dyn Future<Output = Result<u64, BatchError>> + Send + 'a>>;

    /// Requests termination of a scheduler job. Returning `Ok` means the
    /// request was acknowledged, not that the job has already exited.
    fn cancel<'a>(
        &'a self,
        id: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), BatchError>> + Send + 'a>>;

    /// Scheduler name for logging.
    fn name(&self) -> &str;
}

/// Renders the job's scripts and submits the array plus its dependent
/// collect job.
pub(crate) async fn submit_batch_job(
    scheduler: &dyn BatchScheduler,
    job: &JobRecord,
    update_key: &str,
    callback_url: &str,
) -> Result<BatchSubmission, BatchError> {
    let vars = [
        ("job_id", job.job_id.as_str()),
        ("update_key", update_key),
        ("callback_url", callback_url),
        ("sim_executable", job.sim_type.executable()),
    ];
    let array_script = render_template(ARRAY_SCRIPT, &vars);
    let collect_script = render_template(COLLECT_SCRIPT, &vars);

    let array_id = scheduler.submit_array(array_script, job.ntasks).await?;
    // The collect step must run exactly once whatever the array elements
    // do, hence after-any rather than after-ok.
    let collect_id = scheduler.submit_after_any(collect_script, array_id).await?;

    info!(
        job_id = %job.job_id,
        scheduler = scheduler.name(),
        array_id,
        collect_id,
        ntasks = job.ntasks,
        "Batch job submitted"
    );

    Ok(BatchSubmission {
        array_id,
        collect_id,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    /// In-memory scheduler recording submissions and cancellations.
    #[derive(Default)]
    pub struct FakeScheduler {
        next_id: AtomicU64,
        pub submitted: Mutex<Vec<(String, u32)>>,
        pub dependencies: Mutex<Vec<(u64, u64)>>,
        pub cancelled: Mutex<Vec<u64>>,
        pub fail_cancel: bool,
    }

    impl FakeScheduler {
        pub fn new() -> Self {
            Self {
                next_id: AtomicU64::new(1000),
                ..Self::default()
            }
        }

        /// A scheduler whose termination requests always fail.
        pub fn with_failing_cancel() -> Self {
            Self {
                fail_cancel: true,
                ..Self::new()
            }
        }
    }

    impl BatchScheduler for FakeScheduler {
        fn submit_array<'a>(
            &'a self,
            script: String,
            ntasks: u32,
        ) -> Pin<Box<dyn Future<Output = Result<u64, BatchError>> + Send + 'a>> {
            Box::pin(async move {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                self.submitted.lock().unwrap().push((script, ntasks));
                Ok(id)
            })
        }

        fn submit_after_any<'a>(
            &'a self,
            script: String,
            after: u64,
        ) -> Pin<Box<dyn Future<Output = Result<u64, BatchError>> + Send + 'a>> {
            Box::pin(async move {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                self.submitted.lock().unwrap().push((script, 1));
                self.dependencies.lock().unwrap().push((id, after));
                Ok(id)
            })
        }

        fn cancel<'a>(
            &'a self,
            id: u64,
        ) -> Pin<Box<dyn Future<Output = Result<(), BatchError>> + Send + 'a>> {
            Box::pin(async move {
                if self.fail_cancel {
                    return Err(BatchError::Cancellation {
                        id,
                        reason: "scheduler unreachable".into(),
                    });
                }
                self.cancelled.lock().unwrap().push(id);
                Ok(())
            })
        }

        fn name(&self) -> &str {
            "fake"
        }
    }
}
