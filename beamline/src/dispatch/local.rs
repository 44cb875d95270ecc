//! Local worker pool and the per-job merge supervisor.

use super::simulator::{SimulatorRunner, WorkerContext};
use crate::config::OrchestratorConfig;
use crate::merge::{Estimator, MergeAccumulator};
use crate::progress::TaskMonitor;
use crate::runtime::StatusRegistry;
use crate::state::{JobId, JobRecord, JobState, JobUpdate, TaskState, TaskUpdate};
use crate::store::JobStore;
use crate::updates::{UpdateEnvelope, UpdateQueue};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Errors from the local execution pool.
#[derive(Debug, Error)]
pub enum LocalError {
    #[error("Failed to prepare workspace: {0}")]
    Workspace(#[from] std::io::Error),

    #[error("Job {0} is not executing on the local pool")]
    NotTracked(JobId),
}

/// Cancellation handles of one local job.
struct JobControl {
    /// One token per task, indexed by ordinal - 1.
    task_tokens: Vec<CancellationToken>,
    /// Token covering the merge supervisor.
    merge_token: CancellationToken,
}

/// Runs jobs as worker tasks on the local runtime.
///
/// For each submitted job the pool spawns `ntasks` workers (bounded by a
/// shared semaphore) and one supervisor. Every worker pairs the simulator
/// invocation with a log monitor; the supervisor waits for all workers to
/// finish, whatever their outcome, and then performs the merge step
/// exactly once.
pub struct LocalExecutor {
    runner: Arc<dyn SimulatorRunner>,
    store: Arc<dyn JobStore>,
    registry: Arc<StatusRegistry>,
    queue: UpdateQueue,
    config: OrchestratorConfig,
    worker_permits: Arc<Semaphore>,
    controls: Arc<DashMap<JobId, JobControl>>,
}

impl LocalExecutor {
    pub fn new(
        runner: Arc<dyn SimulatorRunner>,
        store: Arc<dyn JobStore>,
        registry: Arc<StatusRegistry>,
        queue: UpdateQueue,
        config: OrchestratorConfig,
    ) -> Self {
        let worker_permits = Arc::new(Semaphore::new(config.local_worker_limit.max(1)));
        Self {
            runner,
            store,
            registry,
            queue,
            config,
            worker_permits,
            controls: Arc::new(DashMap::new()),
        }
    }

    /// Fans a job out into workers plus one merge supervisor.
    ///
    /// Workspaces are materialized before anything is spawned; the call
    /// returns as soon as the workers are in flight.
    pub async fn spawn_job(
        &self,
        job: &JobRecord,
        update_key: &str,
        input_files: &HashMap<String, Vec<u8>>,
    ) -> Result<(), LocalError> {
        let job_dir = self.config.work_root.join(job.job_id.as_str());
        let task_tokens: Vec<_> = (0..job.ntasks).map(|_| CancellationToken::new()).collect();
        let merge_token = CancellationToken::new();

        let mut workers = JoinSet::new();
        for task_id in 1..=job.ntasks {
            let workspace = job_dir.join(format!("task_{task_id:04}"));
            prepare_workspace(&workspace, input_files).await?;

            let ctx = WorkerContext {
                job_id: job.job_id.clone(),
                task_id,
                sim_type: job.sim_type,
                workspace,
                cancel: task_tokens[(task_id - 1) as usize].clone(),
            };
            workers.spawn(self.run_worker(ctx, update_key.to_string()));
        }

        self.controls.insert(
            job.job_id.clone(),
            JobControl {
                task_tokens,
                merge_token: merge_token.clone(),
            },
        );

        info!(
            job_id = %job.job_id,
            ntasks = job.ntasks,
            sim_type = %job.sim_type,
            "Local job fanned out"
        );

        tokio::spawn(self.clone_parts().supervise(job.job_id.clone(), workers, merge_token));
        Ok(())
    }

    /// Requests termination of one task. Acknowledged as soon as the
    /// task's cancellation token is fired.
    pub fn cancel_task(&self, job_id: &JobId, task_id: u32) -> Result<(), LocalError> {
        let control = self
            .controls
            .get(job_id)
            .ok_or_else(|| LocalError::NotTracked(job_id.clone()))?;
        let token = control
            .task_tokens
            .get((task_id.saturating_sub(1)) as usize)
            .ok_or_else(|| LocalError::NotTracked(job_id.clone()))?;
        token.cancel();
        Ok(())
    }

    /// Requests termination of the merge supervisor.
    pub fn cancel_merge(&self, job_id: &JobId) -> Result<(), LocalError> {
        let control = self
            .controls
            .get(job_id)
            .ok_or_else(|| LocalError::NotTracked(job_id.clone()))?;
        control.merge_token.cancel();
        Ok(())
    }

    fn clone_parts(&self) -> SupervisorParts {
        SupervisorParts {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            controls: Arc::clone(&self.controls),
        }
    }

    /// One worker: acquire a pool slot, start the log monitor, run the
    /// simulator, and report the replica output.
    ///
    /// Returns `None` when the run produced no usable replica. Worker
    /// failures are reported through the update queue like any other
    /// observation; the terminal-state rules make that idempotent against
    /// whatever the monitor saw in the log.
    fn run_worker(
        &self,
        ctx: WorkerContext,
        update_key: String,
    ) -> impl std::future::Future<Output = Option<Vec<Estimator>>> + Send + 'static {
        let runner = Arc::clone(&self.runner);
        let permits = Arc::clone(&self.worker_permits);
        let sender = self.queue.sender();
        let monitor_config = self.config.monitor.clone();

        async move {
            let Ok(_permit) = permits.acquire().await else {
                return None;
            };
            if ctx.cancel.is_cancelled() {
                return None;
            }

            let monitor = TaskMonitor::new(
                ctx.job_id.clone(),
                ctx.task_id,
                update_key.clone(),
                ctx.log_path(),
                sender.clone(),
                monitor_config,
                ctx.cancel.clone(),
            );
            tokio::spawn(monitor.run());

            debug!(job_id = %ctx.job_id, task_id = ctx.task_id, "Worker started");

            match runner.run(&ctx).await {
                Ok(outcome) if outcome.exit_success => {
                    if outcome.estimators.is_empty() {
                        warn!(
                            job_id = %ctx.job_id,
                            task_id = ctx.task_id,
                            "Worker exited cleanly but produced no estimators"
                        );
                        None
                    } else {
                        Some(outcome.estimators)
                    }
                }
                Ok(_) => {
                    if !ctx.cancel.is_cancelled() {
                        sender.send(&UpdateEnvelope::new(
                            ctx.job_id.clone(),
                            ctx.task_id,
                            update_key,
                            TaskUpdate::finished(TaskState::Failed, Utc::now()),
                        ));
                    }
                    None
                }
                Err(error) => {
                    error!(
                        job_id = %ctx.job_id,
                        task_id = ctx.task_id,
                        %error,
                        "Worker failed"
                    );
                    sender.send(&UpdateEnvelope::new(
                        ctx.job_id.clone(),
                        ctx.task_id,
                        update_key,
                        TaskUpdate::finished(TaskState::Failed, Utc::now()),
                    ));
                    None
                }
            }
        }
    }
}

/// The pieces of the executor the supervisor takes with it.
struct SupervisorParts {
    store: Arc<dyn JobStore>,
    registry: Arc<StatusRegistry>,
    controls: Arc<DashMap<JobId, JobControl>>,
}

impl SupervisorParts {
    /// Waits for every worker, then runs the merge step exactly once.
    async fn supervise(
        self,
        job_id: JobId,
        mut workers: JoinSet<Option<Vec<Estimator>>>,
        merge_token: CancellationToken,
    ) {
        let mut replicas: Vec<Vec<Estimator>> = Vec::new();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Some(estimators)) => replicas.push(estimators),
                Ok(None) => {}
                Err(error) => warn!(%job_id, %error, "Worker task panicked"),
            }
        }

        if merge_token.is_cancelled() {
            debug!(%job_id, "Merge step cancelled before it started");
            self.controls.remove(&job_id);
            return;
        }

        self.merge(&job_id, replicas).await;
        self.controls.remove(&job_id);
    }

    async fn merge(&self, job_id: &JobId, replicas: Vec<Vec<Estimator>>) {
        match self.store.fetch_job(job_id) {
            Ok(job) if job.state.is_terminal() => {
                debug!(%job_id, state = %job.state, "Skipping merge for terminal job");
                return;
            }
            Ok(_) => {}
            Err(error) => {
                warn!(%job_id, %error, "Merge step found no job record");
                return;
            }
        }

        self.set_state(job_id, JobUpdate::state(JobState::MergingQueued));
        self.set_state(job_id, JobUpdate::state(JobState::MergingRunning));

        let replica_count = replicas.len();
        let mut accumulator = MergeAccumulator::new();
        for replica in replicas {
            accumulator.fold(replica);
        }

        if accumulator.is_empty() {
            // No replica produced output: the job failed as a whole and
            // there are no estimators to store.
            warn!(%job_id, "No replica produced output, failing job");
            self.set_state(job_id, JobUpdate::finished(JobState::Failed, Utc::now()));
            return;
        }

        let estimators = accumulator.into_estimators();
        info!(
            %job_id,
            replicas = replica_count,
            estimators = estimators.len(),
            "Merged replica outputs"
        );

        if let Err(error) = self.store.insert_results(job_id, estimators) {
            warn!(%job_id, %error, "Failed to store merged results");
            self.set_state(job_id, JobUpdate::finished(JobState::Failed, Utc::now()));
            return;
        }

        self.set_state(job_id, JobUpdate::finished(JobState::Completed, Utc::now()));
    }

    fn set_state(&self, job_id: &JobId, update: JobUpdate) {
        match self.store.persist_job(job_id, &update) {
            Ok(job) => self.registry.publish(job_id, job.state),
            Err(error) => warn!(%job_id, %error, "Failed to persist job state"),
        }
    }
}

/// Creates a task workspace and writes the input files into it.
async fn prepare_workspace(
    workspace: &Path,
    input_files: &HashMap<String, Vec<u8>>,
) -> Result<(), std::io::Error> {
    tokio::fs::create_dir_all(workspace).await?;
    for (name, content) in input_files {
        tokio::fs::write(workspace.join(name), content).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::dispatch::simulator::{ScriptedOutcome, ScriptedRunner};
    use crate::merge::Page;
    use crate::state::{Platform, SimulatorKind, TaskRecord};
    use crate::store::MemoryStore;
    use crate::updates::UpdateConsumer;
    use std::path::PathBuf;
    use std::time::Duration;

    fn fast_config(work_root: PathBuf) -> OrchestratorConfig {
        OrchestratorConfig {
            monitor: MonitorConfig {
                poll_interval: Duration::from_millis(5),
                file_wait_attempts: 10,
                silence_timeout: Duration::from_millis(300),
                progress_min_interval: Duration::from_millis(1),
            },
            work_root,
            ..OrchestratorConfig::default()
        }
    }

    struct Fixture {
        executor: LocalExecutor,
        store: Arc<MemoryStore>,
        registry: Arc<StatusRegistry>,
        consumer: UpdateConsumer,
        job: JobRecord,
        _dir: tempfile::TempDir,
    }

    fn fixture(runner: ScriptedRunner, ntasks: u32) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(StatusRegistry::new());
        let queue = UpdateQueue::new();
        let config = fast_config(dir.path().to_path_buf());

        let job = JobRecord::new(
            JobId::generate(),
            "local test",
            Platform::Local,
            SimulatorKind::Dummy,
            "key",
            ntasks,
        );
        registry.register(job.job_id.clone());
        store
            .insert_job(job.clone(), (1..=ntasks).map(TaskRecord::new).collect())
            .unwrap();

        let consumer = UpdateConsumer::new(
            queue.clone(),
            Arc::clone(&store) as Arc<dyn JobStore>,
            Arc::clone(&registry),
            config.consumer.clone(),
        );

        let executor = LocalExecutor::new(
            Arc::new(runner),
            Arc::clone(&store) as Arc<dyn JobStore>,
            Arc::clone(&registry),
            queue,
            config,
        );

        Fixture {
            executor,
            store,
            registry,
            consumer,
            job,
            _dir: dir,
        }
    }

    async fn wait_terminal(fixture: &Fixture) -> JobState {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            fixture.consumer.drain_once();
            let job = fixture.store.fetch_job(&fixture.job.job_id).unwrap();
            if job.state.is_terminal() {
                return job.state;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job never reached a terminal state (state: {})",
                job.state
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Lets straggling monitor envelopes land before asserting on task
    /// records.
    async fn settle(fixture: &Fixture) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        fixture.consumer.drain_once();
    }

    fn sample_estimators(value: f64) -> Vec<Estimator> {
        vec![Estimator::new(
            "dose",
            vec![Page::new(0, "Dose", "Gy", vec![value, value * 2.0])],
        )]
    }

    #[tokio::test]
    async fn test_job_completes_and_merges_results() {
        let runner = ScriptedRunner::new(100)
            .with_step_delay(Duration::from_millis(2))
            .with_task_estimators(1, sample_estimators(1.0))
            .with_task_estimators(2, sample_estimators(3.0));
        let fixture = fixture(runner, 2);

        fixture
            .executor
            .spawn_job(&fixture.job, "key", &HashMap::new())
            .await
            .unwrap();

        assert_eq!(wait_terminal(&fixture).await, JobState::Completed);
        settle(&fixture).await;

        let job = fixture.store.fetch_job(&fixture.job.job_id).unwrap();
        assert!(job.end_time.is_some());

        let results = fixture.store.fetch_results(&fixture.job.job_id).unwrap();
        assert_eq!(results.len(), 1);
        assert!((results[0].pages[0].values[0] - 2.0).abs() < 1e-12);
        assert!((results[0].pages[0].values[1] - 4.0).abs() < 1e-12);

        let tasks = fixture.store.fetch_tasks(&fixture.job.job_id).unwrap();
        assert!(tasks.iter().all(|t| t.state == TaskState::Completed));
        assert!(tasks.iter().all(|t| t.simulated_primaries == 100));
    }

    #[tokio::test]
    async fn test_partial_failure_still_completes_from_surviving_replicas() {
        let runner = ScriptedRunner::new(100)
            .with_step_delay(Duration::from_millis(2))
            .with_estimators(sample_estimators(2.0))
            .with_outcome(2, ScriptedOutcome::SimulatorTimeout);
        let fixture = fixture(runner, 3);

        fixture
            .executor
            .spawn_job(&fixture.job, "key", &HashMap::new())
            .await
            .unwrap();

        assert_eq!(wait_terminal(&fixture).await, JobState::Completed);
        settle(&fixture).await;

        let tasks = fixture.store.fetch_tasks(&fixture.job.job_id).unwrap();
        assert_eq!(tasks[1].state, TaskState::Failed);
        assert_eq!(tasks[0].state, TaskState::Completed);

        // Two surviving replicas with identical values average to the
        // same values.
        let results = fixture.store.fetch_results(&fixture.job.job_id).unwrap();
        assert!((results[0].pages[0].values[0] - 2.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_all_failed_job_fails_without_results() {
        let runner = ScriptedRunner::new(100)
            .with_step_delay(Duration::from_millis(2))
            .with_outcome(1, ScriptedOutcome::SimulatorTimeout)
            .with_outcome(2, ScriptedOutcome::NoLog);
        let fixture = fixture(runner, 2);

        fixture
            .executor
            .spawn_job(&fixture.job, "key", &HashMap::new())
            .await
            .unwrap();

        assert_eq!(wait_terminal(&fixture).await, JobState::Failed);
        assert!(fixture.store.fetch_results(&fixture.job.job_id).is_err());
    }

    #[tokio::test]
    async fn test_input_files_land_in_every_workspace() {
        let runner = ScriptedRunner::new(10)
            .with_step_delay(Duration::from_millis(1))
            .with_estimators(sample_estimators(1.0));
        let fixture = fixture(runner, 2);

        let mut input_files = HashMap::new();
        input_files.insert("beam.dat".to_string(), b"BEAM 1".to_vec());

        fixture
            .executor
            .spawn_job(&fixture.job, "key", &input_files)
            .await
            .unwrap();
        wait_terminal(&fixture).await;

        for task_id in 1..=2 {
            let path = fixture
                ._dir
                .path()
                .join(fixture.job.job_id.as_str())
                .join(format!("task_{task_id:04}"))
                .join("beam.dat");
            assert!(path.exists(), "missing input copy for task {task_id}");
        }
    }

    #[tokio::test]
    async fn test_cancel_task_interrupts_hung_worker() {
        let runner = ScriptedRunner::new(100)
            .with_step_delay(Duration::from_millis(2))
            .with_estimators(sample_estimators(1.0))
            .with_outcome(2, ScriptedOutcome::Hang);
        let fixture = fixture(runner, 2);

        fixture
            .executor
            .spawn_job(&fixture.job, "key", &HashMap::new())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        fixture.executor.cancel_task(&fixture.job.job_id, 2).unwrap();

        // Task 1 still completes, so the merge proceeds from its replica.
        assert_eq!(wait_terminal(&fixture).await, JobState::Completed);
    }

    #[tokio::test]
    async fn test_cancel_unknown_job_errors() {
        let runner = ScriptedRunner::new(10);
        let fixture = fixture(runner, 1);
        assert!(matches!(
            fixture.executor.cancel_task(&JobId::new("ghost"), 1),
            Err(LocalError::NotTracked(_))
        ));
    }

    #[tokio::test]
    async fn test_handles_observe_completion() {
        let runner = ScriptedRunner::new(10)
            .with_step_delay(Duration::from_millis(1))
            .with_estimators(sample_estimators(1.0));
        let fixture = fixture(runner, 1);
        let mut rx = fixture.registry.subscribe(&fixture.job.job_id).unwrap();

        fixture
            .executor
            .spawn_job(&fixture.job, "key", &HashMap::new())
            .await
            .unwrap();
        assert_eq!(wait_terminal(&fixture).await, JobState::Completed);

        // The registry published the terminal state to subscribers.
        assert_eq!(*rx.borrow_and_update(), JobState::Completed);
    }
}
