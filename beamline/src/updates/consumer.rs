//! The single-writer drain consumer.

use super::channel::UpdateQueue;
use super::envelope::UpdateEnvelope;
use crate::config::ConsumerConfig;
use crate::runtime::StatusRegistry;
use crate::state::{derive_job_state, JobUpdate};
use crate::store::JobStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Drains the update queue in batches and applies envelopes to the store.
///
/// This is the only writer of task and job records. It runs on a fixed
/// interval, takes a bounded batch, reverses it (the queue hands batches
/// out newest-first), and applies each payload independently: a malformed
/// or unauthorized envelope is dropped with a warning and never aborts the
/// rest of the batch.
///
/// After each applied task update the job state is re-derived from the
/// task-state multiset and persisted if it changed.
pub struct UpdateConsumer {
    queue: UpdateQueue,
    store: Arc<dyn JobStore>,
    registry: Arc<StatusRegistry>,
    config: ConsumerConfig,
    /// Milliseconds-since-epoch of the last drain, shared with the
    /// watchdog.
    last_drain_ms: Arc<AtomicU64>,
}

impl UpdateConsumer {
    pub fn new(
        queue: UpdateQueue,
        store: Arc<dyn JobStore>,
        registry: Arc<StatusRegistry>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            queue,
            store,
            registry,
            config,
            last_drain_ms: Arc::new(AtomicU64::new(now_ms())),
        }
    }

    /// Shared drain timestamp for the stall watchdog.
    pub fn last_drain_ms(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.last_drain_ms)
    }

    /// Runs the drain loop until the token fires, then drains once more so
    /// already-enqueued updates are not lost on shutdown.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.drain_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            interval_ms = self.config.drain_interval.as_millis() as u64,
            batch_size = self.config.drain_batch_size,
            "Update consumer started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.drain_once();
                    info!("Update consumer stopped");
                    return;
                }
                _ = interval.tick() => {
                    self.drain_once();
                }
            }
        }
    }

    /// Performs one drain cycle. Public for deterministic use in tests and
    /// by embedders that drive their own schedule.
    pub fn drain_once(&self) {
        self.last_drain_ms.store(now_ms(), Ordering::Relaxed);

        let mut batch = self.queue.drain(self.config.drain_batch_size);
        if batch.is_empty() {
            return;
        }
        let started = Instant::now();

        // The queue yields newest-first; apply oldest-first so multiple
        // updates for one task land in submission order.
        batch.reverse();

        let received = batch.len();
        let mut applied = 0usize;
        for payload in &batch {
            if self.apply_payload(payload) {
                applied += 1;
            }
        }

        debug!(
            received,
            applied,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Drained update batch"
        );
    }

    /// Validates and applies one payload. Returns true if a task record
    /// was updated.
    fn apply_payload(&self, payload: &str) -> bool {
        let envelope: UpdateEnvelope = match serde_json::from_str(payload) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!(%error, "Dropping malformed update payload");
                return false;
            }
        };

        let job = match self.store.fetch_job(&envelope.job_id) {
            Ok(job) => job,
            Err(_) => {
                warn!(job_id = %envelope.job_id, "Dropping update for unknown job");
                return false;
            }
        };

        if !job.check_update_key(&envelope.update_key) {
            warn!(
                job_id = %envelope.job_id,
                task_id = envelope.task_id,
                "Dropping update with invalid key"
            );
            return false;
        }

        if let Err(error) =
            self.store
                .persist_task(&envelope.job_id, envelope.task_id, &envelope.update)
        {
            warn!(%error, "Dropping unappliable task update");
            return false;
        }

        self.refresh_job_state(&envelope);
        true
    }

    /// Re-derives the job state from the task states and persists it when
    /// it changed. Terminal jobs are left alone by the record itself.
    fn refresh_job_state(&self, envelope: &UpdateEnvelope) {
        let Ok(tasks) = self.store.fetch_tasks(&envelope.job_id) else {
            return;
        };
        let states: Vec<_> = tasks.iter().map(|task| task.state).collect();
        let Some(derived) = derive_job_state(&states) else {
            return;
        };

        let Ok(job) = self.store.fetch_job(&envelope.job_id) else {
            return;
        };
        if job.state == derived || job.state.is_terminal() {
            return;
        }

        match self
            .store
            .persist_job(&envelope.job_id, &JobUpdate::state(derived))
        {
            Ok(updated) => {
                debug!(job_id = %envelope.job_id, state = %updated.state, "Job state derived");
                self.registry.publish(&envelope.job_id, updated.state);
            }
            Err(error) => warn!(%error, "Failed to persist derived job state"),
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
