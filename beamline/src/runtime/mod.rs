//! Orchestrator runtime: wiring, handles and the caller-facing boundaries.
//!
//! [`Orchestrator`] owns the long-lived pieces (store, update queue, drain
//! consumer, watchdog, dispatcher, cancellation coordinator) and exposes
//! the four boundaries callers interact with: submit, status, results and
//! cancel, plus the update boundary used by workers and monitors.

mod handle;
mod orchestrator;
mod status;

pub use handle::{JobHandle, StatusRegistry};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use status::{EstimatedTime, JobStatusView, TaskStatusView};
