//! The shared update queue and its producer handle.

use super::envelope::UpdateEnvelope;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Shared queue of serialized update payloads.
///
/// Modelled on a broker list: producers push at the head, the consumer
/// also drains from the head. A drained batch therefore comes out
/// newest-first and must be reversed before applying, so that multiple
/// updates for the same task that accumulated between drains apply in
/// submission order.
///
/// Payloads are opaque JSON strings; producers on the far side of a
/// process boundary feed the same queue through the update boundary, and
/// the consumer validates every payload on the way out.
#[derive(Clone, Default)]
pub struct UpdateQueue {
    inner: Arc<Mutex<VecDeque<String>>>,
}

impl UpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a producer handle for this queue.
    pub fn sender(&self) -> UpdateSender {
        UpdateSender {
            queue: self.clone(),
        }
    }

    /// Pushes a raw payload at the head of the queue.
    pub fn push(&self, payload: String) {
        if let Ok(mut queue) = self.inner.lock() {
            queue.push_front(payload);
        } else {
            warn!("Update queue lock poisoned, dropping payload");
        }
    }

    /// Pops up to `max` payloads from the head of the queue, newest first.
    ///
    /// Callers must reverse the batch before applying it.
    pub fn drain(&self, max: usize) -> Vec<String> {
        let Ok(mut queue) = self.inner.lock() else {
            warn!("Update queue lock poisoned, draining nothing");
            return Vec::new();
        };
        let take = queue.len().min(max);
        queue.drain(..take).collect()
    }

    /// Number of payloads currently queued.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|queue| queue.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fire-and-forget producer handle.
///
/// Sending never blocks and never fails from the producer's point of
/// view: a progress update that cannot be delivered is logged and lost,
/// which must not abort a running simulation.
#[derive(Clone)]
pub struct UpdateSender {
    queue: UpdateQueue,
}

impl UpdateSender {
    /// Serializes and enqueues an envelope, best-effort.
    pub fn send(&self, envelope: &UpdateEnvelope) {
        match serde_json::to_string(envelope) {
            Ok(payload) => self.queue.push(payload),
            Err(error) => {
                warn!(
                    job_id = %envelope.job_id,
                    task_id = envelope.task_id,
                    %error,
                    "Dropping undeliverable task update"
                );
            }
        }
    }

    /// Enqueues an already-serialized payload, as received on the update
    /// boundary from out-of-process writers.
    pub fn send_raw(&self, payload: String) {
        self.queue.push(payload);
    }
}
