//! Beamline - orchestration engine for fanned-out particle transport
//! simulation jobs.
//!
//! A submitted job is decomposed into N independent worker tasks plus one
//! merge step, executed on a local worker pool or an external batch
//! scheduler. Running tasks are observed by tailing their simulator logs;
//! every observation flows through a single update channel into one drain
//! consumer that owns all task and job state. Completed replicas are
//! statistically merged into one result set.
//!
//! # High-Level API
//!
//! The [`runtime::Orchestrator`] facade wires everything together:
//!
//! ```ignore
//! use beamline::dispatch::{ProcessRunner, SubmitRequest};
//! use beamline::runtime::Orchestrator;
//! use beamline::state::{Platform, SimulatorKind};
//!
//! let orchestrator = Orchestrator::builder()
//!     .runner(Arc::new(ProcessRunner::new()))
//!     .start();
//!
//! let mut handle = orchestrator
//!     .submit(SubmitRequest {
//!         title: "proton head phantom".into(),
//!         input_files,
//!         ntasks: 8,
//!         sim_type: SimulatorKind::ShieldHit,
//!         platform: Platform::Local,
//!     })
//!     .await?;
//!
//! let final_state = handle.wait().await;
//! let results = orchestrator.job_results(handle.id())?;
//! ```

pub mod cancel;
pub mod config;
pub mod dispatch;
pub mod logging;
pub mod merge;
pub mod progress;
pub mod runtime;
pub mod state;
pub mod store;
pub mod updates;

/// Version of the beamline library and CLI.
///
/// This is synchronized across all components in the workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
