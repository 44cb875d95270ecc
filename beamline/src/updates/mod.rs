//! The update-delivery path from workers and monitors to the aggregation
//! consumer.
//!
//! Producers (worker processes, log monitors, the batch collect step) are
//! decoupled from the trusted aggregation side, so every update travels as
//! a self-authenticating envelope: the per-job update key is checked at the
//! drain boundary, not trusted from the caller.
//!
//! ```text
//! monitors / workers           UpdateQueue              UpdateConsumer
//!       │                          │                          │
//!       │ send(envelope)           │                          │
//!       ├─────────────────────────►│                          │
//!       │   (fire-and-forget)      │   drain ≤ 1000 / 2 s     │
//!       │                          │◄─────────────────────────┤
//!       │                          │  reverse, validate,      │
//!       │                          │  apply, derive job state │
//! ```
//!
//! The consumer is the only writer of task and job records; producers never
//! touch persisted state directly, which removes any need for row locking
//! on the hot update path.

mod channel;
mod consumer;
mod envelope;
mod watchdog;

pub use channel::{UpdateQueue, UpdateSender};
pub use consumer::UpdateConsumer;
pub use envelope::UpdateEnvelope;
pub use watchdog::QueueWatchdog;
