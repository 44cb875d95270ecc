//! Stall detection for the drain consumer.

use super::channel::UpdateQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default stall detection threshold (30 seconds).
pub const STALL_DETECTION_THRESHOLD_MS: u64 = 30_000;

/// Default watchdog check interval (10 seconds).
pub const STALL_WATCHDOG_INTERVAL_SECS: u64 = 10;

/// Watches the drain consumer for stalls.
///
/// Periodically compares the consumer's last-drain timestamp against the
/// queue depth: queued payloads with no drain activity past the threshold
/// means updates are piling up unprocessed, which surfaces as frozen task
/// progress to every caller.
pub struct QueueWatchdog {
    queue: UpdateQueue,

    /// Shared timestamp of the consumer's last drain.
    last_drain_ms: Arc<AtomicU64>,

    /// Stall threshold in milliseconds.
    threshold_ms: u64,

    /// Check interval.
    interval: Duration,
}

impl QueueWatchdog {
    /// Creates a watchdog with default thresholds.
    pub fn new(queue: UpdateQueue, last_drain_ms: Arc<AtomicU64>) -> Self {
        Self {
            queue,
            last_drain_ms,
            threshold_ms: STALL_DETECTION_THRESHOLD_MS,
            interval: Duration::from_secs(STALL_WATCHDOG_INTERVAL_SECS),
        }
    }

    /// Runs the watchdog until cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => self.check_health(),
            }
        }
    }

    fn check_health(&self) {
        let elapsed_ms = self.elapsed_since_last_drain();
        let queued = self.queue.len();

        match (elapsed_ms > self.threshold_ms, queued > 0) {
            (true, true) => {
                warn!(
                    elapsed_ms,
                    queued,
                    threshold_ms = self.threshold_ms,
                    "STALL DETECTED: {} updates queued but no drain for {}s",
                    queued,
                    elapsed_ms / 1000
                );
            }
            (true, false) => {
                debug!(elapsed_ms, "Queue watchdog: consumer idle (queue empty)");
            }
            (false, _) => {
                debug!(elapsed_ms, queued, "Queue watchdog: consumer healthy");
            }
        }
    }

    fn elapsed_since_last_drain(&self) -> u64 {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        now_ms.saturating_sub(self.last_drain_ms.load(Ordering::Relaxed))
    }
}
