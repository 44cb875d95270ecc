//! Task and job state machines.
//!
//! This module is the data model of the orchestration engine: per-task and
//! per-job records, the partial updates applied to them, and the rules that
//! make those updates safe under duplicate, late, or reordered delivery.
//!
//! # Core Concepts
//!
//! - **Terminal states**: once a task or job reaches Completed, Failed or
//!   Canceled, no further update touches it. Every apply path checks this
//!   first.
//!
//! - **First-write-wins fields**: `start_time` and `end_time` can be set
//!   exactly once. A task's estimated remaining time is meaningless once
//!   its end time is known and is cleared at that point.
//!
//! - **Monotonic progress**: `simulated_primaries` never decreases while a
//!   task is alive, so a restarted monitor cannot roll progress backwards.
//!
//! - **Derived job state**: the job-level state is computed from the set of
//!   task states, never written directly by a task update. The merging
//!   phases are driven explicitly by the merge step.
//!
//! These rules together give the idempotence the update pipeline relies on:
//! applying the same envelope twice, or applying two envelopes for the same
//! task in either order and then enforcing the terminal guard, converges to
//! the same record.

mod job;
mod task;

pub use job::{
    derive_job_state, BatchHandles, JobId, JobRecord, JobState, JobUpdate, Platform, SimulatorKind,
};
pub use task::{TaskRecord, TaskState, TaskUpdate};
