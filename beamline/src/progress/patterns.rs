//! Log-line patterns for the supported simulators.
//!
//! The SHIELD-HIT12A family prints progress in a handful of fixed English
//! phrases; these patterns pick them apart. Line shapes:
//!
//! ```text
//! Requested number of primaries NSTAT: 10000
//! Primary particle no.       2500  ETR:      0 hour(s)      2 minute(s)     30 second(s)
//! Run time:      0 hour(s)      5 minute(s)     12 second(s)
//! Timeout occured
//! ```
//!
//! ("Timeout occured" is the simulator's own spelling.)

use super::event::ProgressEvent;
use regex::Regex;
use std::sync::OnceLock;

fn requested_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\bRequested number of primaries NSTAT\s*:\s*(\d+)").unwrap()
    })
}

fn progress_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"\bPrimary particle no\.\s*(\d+)\s*ETR:\s*(\d+)\s*hour\D*(\d+)\s*minute\D*(\d+)\s*second",
        )
        .unwrap()
    })
}

fn complete_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\bRun time:\s*\d+\s*hour").unwrap())
}

fn timeout_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\bTimeout occured").unwrap())
}

/// Matches one log line against the progress patterns, in order:
/// requested-primaries, per-primary progress, run-complete, timeout.
///
/// Returns `None` for lines that carry no progress information, including
/// matching lines whose numeric fields fail to parse.
pub fn parse_progress_line(line: &str) -> Option<ProgressEvent> {
    if let Some(captures) = requested_pattern().captures(line) {
        let requested_primaries = captures[1].parse().ok()?;
        return Some(ProgressEvent::Started {
            requested_primaries,
        });
    }

    if let Some(captures) = progress_pattern().captures(line) {
        let simulated_primaries = captures[1].parse().ok()?;
        let hours: u64 = captures[2].parse().ok()?;
        let minutes: u64 = captures[3].parse().ok()?;
        let seconds: u64 = captures[4].parse().ok()?;
        return Some(ProgressEvent::Progress {
            simulated_primaries,
            eta_seconds: hours * 3600 + minutes * 60 + seconds,
        });
    }

    if complete_pattern().is_match(line) {
        return Some(ProgressEvent::Completed);
    }

    if timeout_pattern().is_match(line) {
        return Some(ProgressEvent::TimedOut);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requested_primaries_line() {
        let event = parse_progress_line("Requested number of primaries NSTAT: 10000");
        assert_eq!(
            event,
            Some(ProgressEvent::Started {
                requested_primaries: 10000
            })
        );
    }

    #[test]
    fn test_progress_line() {
        let line = "Primary particle no.       2500  ETR:      1 hour(s)      2 minute(s)     30 second(s)";
        let event = parse_progress_line(line);
        assert_eq!(
            event,
            Some(ProgressEvent::Progress {
                simulated_primaries: 2500,
                eta_seconds: 3600 + 120 + 30,
            })
        );
    }

    #[test]
    fn test_complete_line() {
        let line = "Run time:      0 hour(s)      5 minute(s)     12 second(s)";
        assert_eq!(parse_progress_line(line), Some(ProgressEvent::Completed));
    }

    #[test]
    fn test_timeout_line() {
        assert_eq!(
            parse_progress_line("Timeout occured"),
            Some(ProgressEvent::TimedOut)
        );
    }

    #[test]
    fn test_unrelated_lines_are_ignored() {
        assert_eq!(parse_progress_line(""), None);
        assert_eq!(parse_progress_line("Reading beam.dat..."), None);
        assert_eq!(parse_progress_line("NSTAT mentioned without the phrase"), None);
    }

    #[test]
    fn test_requested_beats_progress_ordering() {
        // A pathological line matching both phrases resolves to Started,
        // per the documented match order.
        let line = "Requested number of primaries NSTAT: 5 Primary particle no. 1 ETR: 0 hour(s) 0 minute(s) 1 second(s)";
        assert!(matches!(
            parse_progress_line(line),
            Some(ProgressEvent::Started {
                requested_primaries: 5
            })
        ));
    }
}
