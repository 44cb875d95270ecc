//! Progress events extracted from a task's log.

use crate::state::{TaskState, TaskUpdate};
use chrono::{DateTime, Utc};

/// One observation scraped from a task's log output.
///
/// Events exist only on the way from a monitor to the update queue; they
/// are converted into partial task updates before leaving the process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    /// The simulator announced its requested primary count; the task is
    /// now running.
    Started { requested_primaries: u64 },

    /// A per-primary progress line with the remaining-time estimate.
    Progress {
        simulated_primaries: u64,
        eta_seconds: u64,
    },

    /// The simulator finished its run. Terminal.
    Completed,

    /// The simulator stalled and reported a timeout, or the log went
    /// silent past the configured window. Terminal.
    TimedOut,
}

impl ProgressEvent {
    /// Returns true if this event ends the task's monitoring.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::TimedOut)
    }

    /// Converts the event into the task update it implies.
    pub fn into_update(self, now: DateTime<Utc>) -> TaskUpdate {
        match self {
            Self::Started {
                requested_primaries,
            } => TaskUpdate::started(requested_primaries, now),
            Self::Progress {
                simulated_primaries,
                eta_seconds,
            } => TaskUpdate::progress(simulated_primaries, eta_seconds),
            Self::Completed => TaskUpdate::finished(TaskState::Completed, now),
            Self::TimedOut => TaskUpdate::finished(TaskState::Failed, now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_events() {
        assert!(ProgressEvent::Completed.is_terminal());
        assert!(ProgressEvent::TimedOut.is_terminal());
        assert!(!ProgressEvent::Started {
            requested_primaries: 10
        }
        .is_terminal());
        assert!(!ProgressEvent::Progress {
            simulated_primaries: 5,
            eta_seconds: 1
        }
        .is_terminal());
    }

    #[test]
    fn test_started_update() {
        let now = Utc::now();
        let update = ProgressEvent::Started {
            requested_primaries: 2000,
        }
        .into_update(now);
        assert_eq!(update.state, Some(TaskState::Running));
        assert_eq!(update.requested_primaries, Some(2000));
        assert_eq!(update.simulated_primaries, Some(0));
        assert_eq!(update.start_time, Some(now));
    }

    #[test]
    fn test_timed_out_marks_failed() {
        let now = Utc::now();
        let update = ProgressEvent::TimedOut.into_update(now);
        assert_eq!(update.state, Some(TaskState::Failed));
        assert_eq!(update.end_time, Some(now));
    }
}
