//! The orchestration facade.

use super::handle::{JobHandle, StatusRegistry};
use super::status::JobStatusView;
use crate::cancel::{CancelReport, CancellationCoordinator};
use crate::config::OrchestratorConfig;
use crate::dispatch::{
    BatchScheduler, Dispatcher, LocalExecutor, SimulatorRunner, SubmitError, SubmitRequest,
};
use crate::merge::Estimator;
use crate::state::{JobId, JobState};
use crate::store::{JobStore, MemoryStore, StoreError};
use crate::updates::{QueueWatchdog, UpdateConsumer, UpdateQueue, UpdateSender};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Owns the orchestration engine and exposes its boundaries.
///
/// ```ignore
/// use beamline::runtime::Orchestrator;
/// use beamline::dispatch::{ProcessRunner, SubmitRequest};
///
/// let orchestrator = Orchestrator::builder()
///     .runner(Arc::new(ProcessRunner::new()))
///     .start();
///
/// let mut handle = orchestrator.submit(request).await?;
/// let final_state = handle.wait().await;
/// let status = orchestrator.job_status(handle.id())?;
/// ```
pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    registry: Arc<StatusRegistry>,
    queue: UpdateQueue,
    dispatcher: Dispatcher,
    coordinator: CancellationCoordinator,
    shutdown: CancellationToken,
    consumer_task: JoinHandle<()>,
    watchdog_task: JoinHandle<()>,
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    runner: Option<Arc<dyn SimulatorRunner>>,
    scheduler: Option<Arc<dyn BatchScheduler>>,
    store: Option<Arc<dyn JobStore>>,
}

impl OrchestratorBuilder {
    /// Overrides the default configuration.
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the simulator runner for local jobs. Required.
    pub fn runner(mut self, runner: Arc<dyn SimulatorRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Enables the batch platform with the given scheduler.
    pub fn scheduler(mut self, scheduler: Arc<dyn BatchScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Overrides the in-memory store with an external implementation.
    pub fn store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Wires everything together and starts the drain consumer and
    /// watchdog.
    ///
    /// # Panics
    ///
    /// Panics if no runner was provided.
    pub fn start(self) -> Orchestrator {
        let runner = self.runner.expect("Orchestrator requires a simulator runner");
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn JobStore>);
        let registry = Arc::new(StatusRegistry::new());
        let queue = UpdateQueue::new();
        let shutdown = CancellationToken::new();

        let consumer = UpdateConsumer::new(
            queue.clone(),
            Arc::clone(&store),
            Arc::clone(&registry),
            self.config.consumer.clone(),
        );
        let watchdog = QueueWatchdog::new(queue.clone(), consumer.last_drain_ms());
        let consumer_task = tokio::spawn(consumer.run(shutdown.clone()));
        let watchdog_task = tokio::spawn(watchdog.run(shutdown.clone()));

        let local = Arc::new(LocalExecutor::new(
            runner,
            Arc::clone(&store),
            Arc::clone(&registry),
            queue.clone(),
            self.config.clone(),
        ));

        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&local),
            self.scheduler.clone(),
            self.config.callback_url.clone(),
        );

        let coordinator = CancellationCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            local,
            self.scheduler,
        );

        info!("Orchestrator started");

        Orchestrator {
            store,
            registry,
            queue,
            dispatcher,
            coordinator,
            shutdown,
            consumer_task,
            watchdog_task,
        }
    }
}

impl Orchestrator {
    /// Starts building an orchestrator.
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder {
            config: OrchestratorConfig::default(),
            runner: None,
            scheduler: None,
            store: None,
        }
    }

    /// Submission boundary: creates and starts a job, returning its
    /// handle immediately.
    pub async fn submit(&self, request: SubmitRequest) -> Result<JobHandle, SubmitError> {
        self.dispatcher.submit(request).await
    }

    /// Update boundary: the handle workers and monitors push envelopes
    /// through. Out-of-process writers feed the same queue with
    /// [`UpdateSender::send_raw`].
    pub fn update_sender(&self) -> UpdateSender {
        self.queue.sender()
    }

    /// Status boundary: the job's state plus per-task status.
    pub fn job_status(&self, job_id: &JobId) -> Result<JobStatusView, StoreError> {
        let job = self.store.fetch_job(job_id)?;
        let tasks = self.store.fetch_tasks(job_id)?;
        Ok(JobStatusView::new(&job, &tasks))
    }

    /// Results boundary: merged estimators, available only once the job
    /// completed.
    pub fn job_results(&self, job_id: &JobId) -> Result<Vec<Estimator>, StoreError> {
        let job = self.store.fetch_job(job_id)?;
        if job.state != JobState::Completed {
            return Err(StoreError::ResultsUnavailable(job_id.clone()));
        }
        self.store.fetch_results(job_id)
    }

    /// Cancel boundary: requests termination of the job's units and
    /// reports per-unit outcomes.
    pub async fn cancel(&self, job_id: &JobId) -> Result<CancelReport, StoreError> {
        self.coordinator.cancel(job_id).await
    }

    /// Re-subscribes to a job submitted earlier in this process.
    pub fn subscribe(&self, job_id: &JobId) -> Option<JobHandle> {
        self.registry
            .subscribe(job_id)
            .map(|rx| JobHandle::new(job_id.clone(), rx))
    }

    /// Stops the drain consumer (after a final drain) and the watchdog.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.consumer_task.await;
        let _ = self.watchdog_task.await;
        info!("Orchestrator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ScriptedRunner;
    use crate::state::{Platform, SimulatorKind};
    use std::collections::HashMap;

    fn request(ntasks: u32) -> SubmitRequest {
        SubmitRequest {
            title: "facade test".into(),
            input_files: HashMap::new(),
            ntasks,
            sim_type: SimulatorKind::Dummy,
            platform: Platform::Local,
        }
    }

    #[tokio::test]
    #[should_panic(expected = "requires a simulator runner")]
    async fn test_builder_requires_runner() {
        let _ = Orchestrator::builder().start();
    }

    #[tokio::test]
    async fn test_status_of_unknown_job() {
        let orchestrator = Orchestrator::builder()
            .runner(Arc::new(ScriptedRunner::new(1)))
            .start();
        assert!(orchestrator.job_status(&JobId::new("ghost")).is_err());
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_results_unavailable_before_completion() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::builder()
            .runner(Arc::new(ScriptedRunner::new(1)))
            .config(OrchestratorConfig {
                work_root: dir.path().to_path_buf(),
                ..OrchestratorConfig::default()
            })
            .start();

        let handle = orchestrator.submit(request(1)).await.unwrap();
        assert!(matches!(
            orchestrator.job_results(handle.id()),
            Err(StoreError::ResultsUnavailable(_))
        ));
        orchestrator.shutdown().await;
    }
}
