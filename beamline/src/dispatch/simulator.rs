//! Simulator invocation: command conventions and the runner seam.
//!
//! Installing and locating simulator binaries is outside this crate; the
//! executor only needs something that can "run task N of this job in this
//! workspace and say how it went". That contract is [`SimulatorRunner`].
//! [`ProcessRunner`] is the real implementation (binary resolved from
//! `PATH`); [`ScriptedRunner`] drives the dummy simulator for tests and
//! dry runs.

use crate::merge::Estimator;
use crate::progress::task_log_file;
use crate::state::{JobId, SimulatorKind};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// File the simulator (or its output converter) leaves the replica's
/// estimators in, ready for the merge step.
pub const ESTIMATOR_OUTPUT_FILE: &str = "estimators.json";

impl SimulatorKind {
    /// Executable name, resolved from `PATH` by the process runner.
    pub fn executable(&self) -> &'static str {
        match self {
            Self::ShieldHit => "shieldhit",
            Self::Topas => "topas",
            Self::Fluka => "rfluka",
            Self::Dummy => "dummy",
        }
    }

    /// Command-line arguments for running one task in `workspace`.
    ///
    /// The task ordinal doubles as the RNG seed so that replicas draw
    /// independent random sequences.
    pub fn arguments(&self, workspace: &Path, task_id: u32) -> Vec<String> {
        let workspace = workspace.display().to_string();
        match self {
            Self::ShieldHit => vec!["-N".into(), task_id.to_string(), workspace],
            Self::Topas => vec![workspace],
            Self::Fluka => vec!["-M".into(), "1".into(), workspace],
            Self::Dummy => vec!["-N".into(), task_id.to_string(), workspace],
        }
    }

    /// Name of the log file a task of this simulator writes.
    pub fn log_file(&self, task_id: u32) -> String {
        task_log_file(self.executable(), task_id)
    }
}

/// Errors from running a simulator worker.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Failed to launch {executable}: {source}")]
    Launch {
        executable: String,
        source: std::io::Error,
    },

    #[error("Worker I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// What one worker invocation produced.
#[derive(Debug, Default)]
pub struct RunOutcome {
    /// Whether the simulator process exited cleanly.
    pub exit_success: bool,

    /// The replica's estimator output; empty when the run produced none.
    pub estimators: Vec<Estimator>,
}

/// Everything a runner needs to execute one task.
#[derive(Clone, Debug)]
pub struct WorkerContext {
    pub job_id: JobId,
    pub task_id: u32,
    pub sim_type: SimulatorKind,
    /// Per-task directory holding the input files; the log file and any
    /// output are written here.
    pub workspace: PathBuf,
    /// Fires when the task is cancelled; runners must stop promptly.
    pub cancel: CancellationToken,
}

impl WorkerContext {
    /// Path of the log file this task's monitor tails.
    pub fn log_path(&self) -> PathBuf {
        self.workspace.join(self.sim_type.log_file(self.task_id))
    }
}

/// Executes one simulation task to completion.
pub trait SimulatorRunner: Send + Sync + 'static {
    /// Runs the task described by `ctx` and reports the outcome.
    ///
    /// Cancellation is cooperative: implementations watch `ctx.cancel`
    /// and terminate the underlying work when it fires.
    fn run<'a>(
        &'a self,
        ctx: &'a WorkerContext,
    ) -> Pin<Box<dyn Future<Output = Result<RunOutcome, RunnerError>> + Send + 'a>>;

    /// Runner name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Process runner
// ============================================================================

/// Runs the real simulator binary as a child process.
///
/// Stdout is redirected into the conventional log file so the task monitor
/// can follow it; after a clean exit the replica's estimator output is
/// read from [`ESTIMATOR_OUTPUT_FILE`] if present.
#[derive(Debug, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

impl SimulatorRunner for ProcessRunner {
    fn run<'a>(
        &'a self,
        ctx: &'a WorkerContext,
    ) -> Pin<Box<dyn Future<Output = Result<RunOutcome, RunnerError>> + Send + 'a>> {
        Box::pin(async move {
            let executable = ctx.sim_type.executable();
            let log_file = std::fs::File::create(ctx.log_path())?;

            let mut child = tokio::process::Command::new(executable)
                .args(ctx.sim_type.arguments(&ctx.workspace, ctx.task_id))
                .current_dir(&ctx.workspace)
                .stdout(Stdio::from(log_file))
                .stderr(Stdio::null())
                .spawn()
                .map_err(|source| RunnerError::Launch {
                    executable: executable.to_string(),
                    source,
                })?;

            let status = tokio::select! {
                status = child.wait() => status?,
                _ = ctx.cancel.cancelled() => {
                    debug!(
                        job_id = %ctx.job_id,
                        task_id = ctx.task_id,
                        "Terminating simulator process on cancellation"
                    );
                    child.start_kill()?;
                    child.wait().await?
                }
            };

            let estimators = if status.success() {
                read_estimator_output(&ctx.workspace).await
            } else {
                Vec::new()
            };

            Ok(RunOutcome {
                exit_success: status.success(),
                estimators,
            })
        })
    }

    fn name(&self) -> &str {
        "process"
    }
}

/// Reads the replica's estimator output, tolerating its absence.
async fn read_estimator_output(workspace: &Path) -> Vec<Estimator> {
    let path = workspace.join(ESTIMATOR_OUTPUT_FILE);
    match tokio::fs::read(&path).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(estimators) => estimators,
            Err(error) => {
                warn!(path = %path.display(), %error, "Unreadable estimator output");
                Vec::new()
            }
        },
        Err(_) => Vec::new(),
    }
}

// ============================================================================
// Scripted runner
// ============================================================================

/// Per-task behavior of the scripted runner.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ScriptedOutcome {
    /// Log the full requested/progress/complete sequence and deliver
    /// estimators.
    #[default]
    Complete,

    /// Log a start, then the simulator's own timeout marker; no output.
    SimulatorTimeout,

    /// Exit without ever creating a log file; no output.
    NoLog,

    /// Log a start, then block until cancelled; no output.
    Hang,
}

/// Drives the dummy simulator: writes scripted log lines instead of
/// running a binary.
///
/// Tests and dry runs configure one outcome per task ordinal (defaulting
/// to [`ScriptedOutcome::Complete`]) plus the estimator output completed
/// replicas deliver.
pub struct ScriptedRunner {
    requested_primaries: u64,
    step_delay: Duration,
    outcomes: HashMap<u32, ScriptedOutcome>,
    estimators: HashMap<u32, Vec<Estimator>>,
    default_estimators: Vec<Estimator>,
}

impl ScriptedRunner {
    pub fn new(requested_primaries: u64) -> Self {
        Self {
            requested_primaries,
            step_delay: Duration::from_millis(20),
            outcomes: HashMap::new(),
            estimators: HashMap::new(),
            default_estimators: Vec::new(),
        }
    }

    /// Sets the pause between scripted log lines.
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Overrides the outcome for one task ordinal.
    pub fn with_outcome(mut self, task_id: u32, outcome: ScriptedOutcome) -> Self {
        self.outcomes.insert(task_id, outcome);
        self
    }

    /// Estimators every completing task delivers unless overridden.
    pub fn with_estimators(mut self, estimators: Vec<Estimator>) -> Self {
        self.default_estimators = estimators;
        self
    }

    /// Estimators one specific task delivers on completion.
    pub fn with_task_estimators(mut self, task_id: u32, estimators: Vec<Estimator>) -> Self {
        self.estimators.insert(task_id, estimators);
        self
    }

    fn outcome_for(&self, task_id: u32) -> ScriptedOutcome {
        self.outcomes.get(&task_id).cloned().unwrap_or_default()
    }

    fn estimators_for(&self, task_id: u32) -> Vec<Estimator> {
        self.estimators
            .get(&task_id)
            .cloned()
            .unwrap_or_else(|| self.default_estimators.clone())
    }

    async fn append_line(path: &Path, line: &str) -> Result<(), RunnerError> {
        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(format!("{line}\n").as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

impl SimulatorRunner for ScriptedRunner {
    fn run<'a>(
        &'a self,
        ctx: &'a WorkerContext,
    ) -> Pin<Box<dyn Future<Output = Result<RunOutcome, RunnerError>> + Send + 'a>> {
        Box::pin(async move {
            let outcome = self.outcome_for(ctx.task_id);
            let log = ctx.log_path();

            if outcome == ScriptedOutcome::NoLog {
                tokio::time::sleep(self.step_delay).await;
                return Ok(RunOutcome::default());
            }

            Self::append_line(
                &log,
                &format!(
                    "Requested number of primaries NSTAT: {}",
                    self.requested_primaries
                ),
            )
            .await?;

            match outcome {
                ScriptedOutcome::Complete => {
                    for step in 1..=2u64 {
                        tokio::time::sleep(self.step_delay).await;
                        let simulated = self.requested_primaries * step / 2;
                        Self::append_line(
                            &log,
                            &format!(
                                "Primary particle no. {simulated} ETR: 0 hour(s) 0 minute(s) 5 second(s)"
                            ),
                        )
                        .await?;
                    }
                    Self::append_line(&log, "Run time: 0 hour(s) 0 minute(s) 10 second(s)")
                        .await?;
                    Ok(RunOutcome {
                        exit_success: true,
                        estimators: self.estimators_for(ctx.task_id),
                    })
                }
                ScriptedOutcome::SimulatorTimeout => {
                    tokio::time::sleep(self.step_delay).await;
                    Self::append_line(&log, "Timeout occured").await?;
                    Ok(RunOutcome::default())
                }
                ScriptedOutcome::Hang => {
                    ctx.cancel.cancelled().await;
                    Ok(RunOutcome::default())
                }
                ScriptedOutcome::NoLog => unreachable!("handled above"),
            }
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::Page;

    fn context(dir: &Path, task_id: u32) -> WorkerContext {
        WorkerContext {
            job_id: JobId::new("job-r"),
            task_id,
            sim_type: SimulatorKind::Dummy,
            workspace: dir.to_path_buf(),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn test_command_conventions() {
        assert_eq!(SimulatorKind::ShieldHit.executable(), "shieldhit");
        let args = SimulatorKind::ShieldHit.arguments(Path::new("/work"), 7);
        assert_eq!(args, vec!["-N", "7", "/work"]);
        assert_eq!(SimulatorKind::ShieldHit.log_file(7), "shieldhit_0007.log");
    }

    #[tokio::test]
    async fn test_scripted_complete_writes_full_log() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(1000)
            .with_step_delay(Duration::from_millis(1))
            .with_estimators(vec![Estimator::new(
                "dose",
                vec![Page::new(0, "Dose", "Gy", vec![1.0])],
            )]);

        let ctx = context(dir.path(), 1);
        let outcome = runner.run(&ctx).await.unwrap();

        assert!(outcome.exit_success);
        assert_eq!(outcome.estimators.len(), 1);

        let log = std::fs::read_to_string(ctx.log_path()).unwrap();
        assert!(log.contains("Requested number of primaries NSTAT: 1000"));
        assert!(log.contains("Run time:"));
    }

    #[tokio::test]
    async fn test_scripted_timeout_produces_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(1000)
            .with_step_delay(Duration::from_millis(1))
            .with_outcome(1, ScriptedOutcome::SimulatorTimeout);

        let ctx = context(dir.path(), 1);
        let outcome = runner.run(&ctx).await.unwrap();

        assert!(!outcome.exit_success);
        assert!(outcome.estimators.is_empty());
        let log = std::fs::read_to_string(ctx.log_path()).unwrap();
        assert!(log.contains("Timeout occured"));
    }

    #[tokio::test]
    async fn test_scripted_no_log_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(1000)
            .with_step_delay(Duration::from_millis(1))
            .with_outcome(1, ScriptedOutcome::NoLog);

        let ctx = context(dir.path(), 1);
        let outcome = runner.run(&ctx).await.unwrap();

        assert!(!outcome.exit_success);
        assert!(!ctx.log_path().exists());
    }

    #[tokio::test]
    async fn test_scripted_hang_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let runner =
            ScriptedRunner::new(1000).with_outcome(1, ScriptedOutcome::Hang);

        let ctx = context(dir.path(), 1);
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let outcome = tokio::time::timeout(Duration::from_secs(1), runner.run(&ctx))
            .await
            .unwrap()
            .unwrap();
        assert!(!outcome.exit_success);
    }

    #[tokio::test]
    async fn test_read_estimator_output_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_estimator_output(dir.path()).await.is_empty());
    }
}
