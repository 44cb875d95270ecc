//! Job handles and the job-state broadcast registry.

use crate::state::{JobId, JobState};
use dashmap::DashMap;
use tokio::sync::watch;

/// Handle to a submitted job.
///
/// Returned by `submit()` immediately, before any worker has started. The
/// handle is cloneable; all clones observe the same job.
#[derive(Clone)]
pub struct JobHandle {
    job_id: JobId,
    state_rx: watch::Receiver<JobState>,
}

impl JobHandle {
    pub(crate) fn new(job_id: JobId, state_rx: watch::Receiver<JobState>) -> Self {
        Self { job_id, state_rx }
    }

    /// Returns the job's identifier.
    pub fn id(&self) -> &JobId {
        &self.job_id
    }

    /// Returns the most recently published job state without waiting.
    pub fn state(&self) -> JobState {
        *self.state_rx.borrow()
    }

    /// Waits until the job reaches a terminal state and returns it.
    pub async fn wait(&mut self) -> JobState {
        loop {
            let state = self.state();
            if state.is_terminal() {
                return state;
            }
            if self.state_rx.changed().await.is_err() {
                // Publisher dropped; the last observed state is final.
                return self.state();
            }
        }
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("job_id", &self.job_id)
            .field("state", &self.state())
            .finish()
    }
}

/// Registry of per-job state publishers.
///
/// Whoever changes a job's persisted state (the drain consumer, the merge
/// supervisor, the cancellation coordinator) publishes the new state here
/// so that handles observe it without polling the store.
#[derive(Default)]
pub struct StatusRegistry {
    senders: DashMap<JobId, watch::Sender<JobState>>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a job and returns the receiver for its handle.
    pub fn register(&self, job_id: JobId) -> watch::Receiver<JobState> {
        let (tx, rx) = watch::channel(JobState::Pending);
        self.senders.insert(job_id, tx);
        rx
    }

    /// Publishes a state change for a job. Unknown jobs are ignored; a
    /// terminal state also drops the publisher so waiting handles unblock
    /// even if they missed the last send.
    pub fn publish(&self, job_id: &JobId, state: JobState) {
        if let Some(sender) = self.senders.get(job_id) {
            let _ = sender.send(state);
        }
        if state.is_terminal() {
            self.senders.remove(job_id);
        }
    }

    /// Returns a receiver for an already-registered job.
    pub fn subscribe(&self, job_id: &JobId) -> Option<watch::Receiver<JobState>> {
        self.senders.get(job_id).map(|sender| sender.subscribe())
    }
}
