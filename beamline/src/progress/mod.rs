//! Live progress extraction from simulator log files.
//!
//! Simulators report progress only through their text logs, so each running
//! task gets a monitor that tails its log file and turns matching lines
//! into progress events:
//!
//! ```text
//! simulator process          TaskMonitor                 update queue
//!      │                          │                           │
//!      │ writes log lines         │                           │
//!      ├─────────────────────────►│                           │
//!      │                          │ Started / Progress /      │
//!      │                          │ Completed / TimedOut      │
//!      │                          ├──────────────────────────►│
//! ```
//!
//! The scraping is brittle by construction (it matches the simulator's
//! human-oriented output), so everything pattern-shaped is confined to
//! [`patterns`]; a structured progress protocol could replace this module
//! without touching the state machines.

mod event;
mod monitor;
mod patterns;
mod tailer;

pub use event::ProgressEvent;
pub(crate) use monitor::task_log_file;
pub use monitor::TaskMonitor;
pub use patterns::parse_progress_line;
pub use tailer::{LogTailer, TailLine};
