//! Job decomposition and worker fan-out.
//!
//! The dispatcher turns one submission into a job record plus exactly
//! `ntasks` task records, then hands the work to a platform backend:
//!
//! - **Local**: `ntasks` worker invocations on the in-process pool, each
//!   paired with a log monitor, plus one supervisor that runs the merge
//!   step after every worker has finished (successfully or not).
//! - **Batch**: an `ntasks`-element array job plus a dependent collect job
//!   submitted to an external scheduler; both scripts embed the job id,
//!   update key and callback address so the remote side can push updates
//!   through the update boundary.
//!
//! Either way `submit()` returns a handle immediately and never waits for
//! completion.

mod batch;
mod dispatcher;
mod local;
mod simulator;
mod templates;

pub use batch::{BatchError, BatchScheduler, BatchSubmission};
#[cfg(test)]
pub(crate) use batch::testing;
pub use dispatcher::{Dispatcher, SubmitError, SubmitRequest};
pub use local::{LocalError, LocalExecutor};
pub use simulator::{
    ProcessRunner, RunOutcome, RunnerError, ScriptedOutcome, ScriptedRunner, SimulatorRunner,
    WorkerContext, ESTIMATOR_OUTPUT_FILE,
};
pub use templates::{render_template, ARRAY_SCRIPT, COLLECT_SCRIPT};
