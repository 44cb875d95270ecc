//! Per-task log monitor.

use super::event::ProgressEvent;
use super::patterns::parse_progress_line;
use super::tailer::{LogTailer, TailLine};
use crate::config::MonitorConfig;
use crate::state::JobId;
use crate::updates::{UpdateEnvelope, UpdateSender};
use chrono::Utc;
use std::path::PathBuf;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Watches one task's log file and forwards progress as update envelopes.
///
/// The monitor owns the full observation path for a task: waiting for the
/// log to appear, scraping lines, rate-limiting progress, and emitting at
/// most one terminal event. It never touches task state itself; every
/// observation goes through the update queue.
pub struct TaskMonitor {
    job_id: JobId,
    task_id: u32,
    update_key: String,
    log_path: PathBuf,
    sender: UpdateSender,
    config: MonitorConfig,
    cancel: CancellationToken,
}

impl TaskMonitor {
    pub fn new(
        job_id: JobId,
        task_id: u32,
        update_key: impl Into<String>,
        log_path: impl Into<PathBuf>,
        sender: UpdateSender,
        config: MonitorConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            job_id,
            task_id,
            update_key: update_key.into(),
            log_path: log_path.into(),
            sender,
            config,
            cancel,
        }
    }

    /// Runs the monitor to completion.
    ///
    /// Terminates when a terminal event has been emitted, the log goes
    /// silent past the configured window, or the cancellation token fires.
    pub async fn run(self) {
        debug!(
            job_id = %self.job_id,
            task_id = self.task_id,
            path = %self.log_path.display(),
            "Task monitor started"
        );

        let mut tailer = LogTailer::new(&self.log_path, &self.config, self.cancel.clone());

        if !tailer.wait_for_file().await {
            if self.cancel.is_cancelled() {
                return;
            }
            warn!(
                job_id = %self.job_id,
                task_id = self.task_id,
                "Log file never appeared, marking task failed"
            );
            self.emit(ProgressEvent::TimedOut);
            return;
        }

        let mut last_progress: Option<Instant> = None;

        loop {
            match tailer.next_line().await {
                TailLine::Line(line) => {
                    let Some(event) = parse_progress_line(&line) else {
                        continue;
                    };

                    if let ProgressEvent::Progress { .. } = event {
                        let now = Instant::now();
                        let too_soon = last_progress.is_some_and(|previous| {
                            now.duration_since(previous) < self.config.progress_min_interval
                        });
                        if too_soon {
                            continue;
                        }
                        last_progress = Some(now);
                    }

                    let terminal = event.is_terminal();
                    self.emit(event);
                    if terminal {
                        return;
                    }
                }
                TailLine::SilenceTimeout => {
                    warn!(
                        job_id = %self.job_id,
                        task_id = self.task_id,
                        "No log activity within the silence window, marking task failed"
                    );
                    self.emit(ProgressEvent::TimedOut);
                    return;
                }
                TailLine::Stopped => return,
            }
        }
    }

    fn emit(&self, event: ProgressEvent) {
        if event.is_terminal() {
            info!(
                job_id = %self.job_id,
                task_id = self.task_id,
                event = ?event,
                "Task reached a terminal log event"
            );
        } else {
            debug!(
                job_id = %self.job_id,
                task_id = self.task_id,
                event = ?event,
                "Task progress"
            );
        }

        let update = event.into_update(Utc::now());
        self.sender.send(&UpdateEnvelope::new(
            self.job_id.clone(),
            self.task_id,
            self.update_key.clone(),
            update,
        ));
    }
}

/// Conventional log file name for a task, matching the simulator's own
/// zero-padded output naming.
pub(crate) fn task_log_file(sim_name: &str, task_id: u32) -> String {
    format!("{sim_name}_{task_id:04}.log")
}
