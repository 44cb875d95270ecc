//! Asynchronous `tail -f` over a log file that may not exist yet.

use crate::config::MonitorConfig;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Outcome of one poll for the next log line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TailLine {
    /// A complete line, without its trailing newline.
    Line(String),

    /// No new line arrived within the configured silence window.
    SilenceTimeout,

    /// The tailer was cancelled.
    Stopped,
}

/// Follows a growing log file, yielding appended lines.
///
/// The file is allowed to not exist yet: [`LogTailer::wait_for_file`]
/// polls for its creation under a bounded attempt budget. Once open,
/// [`LogTailer::next_line`] behaves like an infinite line stream that
/// sleeps between polls (never a busy loop) and terminates itself after
/// a configurable window of silence.
///
/// Partially written lines (no trailing newline yet) are buffered until
/// the writer finishes them, so a line is never split across two reads.
pub struct LogTailer {
    path: PathBuf,
    poll_interval: Duration,
    file_wait_attempts: u32,
    max_silent_polls: u32,
    cancel: CancellationToken,
    reader: Option<BufReader<File>>,
    pending: String,
    silent_polls: u32,
}

impl LogTailer {
    /// Creates a tailer for `path` with the given monitor configuration.
    pub fn new(path: impl Into<PathBuf>, config: &MonitorConfig, cancel: CancellationToken) -> Self {
        Self {
            path: path.into(),
            poll_interval: config.poll_interval,
            file_wait_attempts: config.file_wait_attempts,
            max_silent_polls: config.max_silent_polls(),
            cancel,
            reader: None,
            pending: String::new(),
            silent_polls: 0,
        }
    }

    /// Waits for the log file to appear, polling up to the attempt budget.
    ///
    /// Returns true once the file is open and false if the budget expires
    /// or the tailer is cancelled first.
    pub async fn wait_for_file(&mut self) -> bool {
        for attempt in 0..self.file_wait_attempts {
            if self.cancel.is_cancelled() {
                return false;
            }
            match File::open(&self.path).await {
                Ok(file) => {
                    debug!(path = %self.path.display(), attempt, "Log file opened");
                    self.reader = Some(BufReader::new(file));
                    return true;
                }
                Err(_) => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => return false,
                        _ = sleep(self.poll_interval) => {}
                    }
                }
            }
        }
        debug!(
            path = %self.path.display(),
            attempts = self.file_wait_attempts,
            "Log file never appeared"
        );
        false
    }

    /// Returns the next complete log line, or the reason the stream ended.
    ///
    /// Must be called after [`LogTailer::wait_for_file`] succeeded.
    pub async fn next_line(&mut self) -> TailLine {
        let Some(reader) = self.reader.as_mut() else {
            return TailLine::Stopped;
        };

        loop {
            if self.cancel.is_cancelled() {
                return TailLine::Stopped;
            }

            let mut chunk = String::new();
            match reader.read_line(&mut chunk).await {
                Ok(0) => {
                    self.silent_polls += 1;
                    if self.silent_polls >= self.max_silent_polls {
                        return TailLine::SilenceTimeout;
                    }
                    tokio::select! {
                        _ = self.cancel.cancelled() => return TailLine::Stopped,
                        _ = sleep(self.poll_interval) => {}
                    }
                }
                Ok(_) => {
                    self.pending.push_str(&chunk);
                    // New bytes count as activity even mid-line.
                    self.silent_polls = 0;
                    if self.pending.ends_with('\n') {
                        let line = self.pending.trim_end_matches(['\n', '\r']).to_string();
                        self.pending.clear();
                        return TailLine::Line(line);
                    }
                }
                Err(error) => {
                    warn!(path = %self.path.display(), %error, "Log read failed");
                    self.silent_polls += 1;
                    if self.silent_polls >= self.max_silent_polls {
                        return TailLine::SilenceTimeout;
                    }
                    tokio::select! {
                        _ = self.cancel.cancelled() => return TailLine::Stopped,
                        _ = sleep(self.poll_interval) => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fast_config() -> MonitorConfig {
        MonitorConfig {
            poll_interval: Duration::from_millis(10),
            file_wait_attempts: 5,
            silence_timeout: Duration::from_millis(50),
            ..MonitorConfig::default()
        }
    }

    #[tokio::test]
    async fn test_wait_for_missing_file_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let mut tailer = LogTailer::new(
            dir.path().join("never.log"),
            &fast_config(),
            CancellationToken::new(),
        );
        assert!(!tailer.wait_for_file().await);
    }

    #[tokio::test]
    async fn test_wait_for_file_that_appears_late() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("late.log");

        let path_clone = path.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            std::fs::write(&path_clone, "hello\n").unwrap();
        });

        let mut tailer = LogTailer::new(path, &fast_config(), CancellationToken::new());
        assert!(tailer.wait_for_file().await);
        assert_eq!(tailer.next_line().await, TailLine::Line("hello".into()));
    }

    #[tokio::test]
    async fn test_reads_appended_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grow.log");
        std::fs::write(&path, "first\n").unwrap();

        let mut tailer = LogTailer::new(&path, &fast_config(), CancellationToken::new());
        assert!(tailer.wait_for_file().await);
        assert_eq!(tailer.next_line().await, TailLine::Line("first".into()));

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "second").unwrap();
        file.flush().unwrap();

        assert_eq!(tailer.next_line().await, TailLine::Line("second".into()));
    }

    #[tokio::test]
    async fn test_partial_line_is_buffered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.log");
        std::fs::write(&path, "incomp").unwrap();

        let mut tailer = LogTailer::new(&path, &fast_config(), CancellationToken::new());
        assert!(tailer.wait_for_file().await);

        let path_clone = path.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&path_clone)
                .unwrap();
            writeln!(file, "lete").unwrap();
        });

        assert_eq!(tailer.next_line().await, TailLine::Line("incomplete".into()));
    }

    #[tokio::test]
    async fn test_silence_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("silent.log");
        std::fs::write(&path, "only\n").unwrap();

        let mut tailer = LogTailer::new(&path, &fast_config(), CancellationToken::new());
        assert!(tailer.wait_for_file().await);
        assert_eq!(tailer.next_line().await, TailLine::Line("only".into()));
        assert_eq!(tailer.next_line().await, TailLine::SilenceTimeout);
    }

    #[tokio::test]
    async fn test_cancellation_stops_tailer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cancel.log");
        std::fs::write(&path, "").unwrap();

        let cancel = CancellationToken::new();
        let mut tailer = LogTailer::new(&path, &fast_config(), cancel.clone());
        assert!(tailer.wait_for_file().await);

        cancel.cancel();
        assert_eq!(tailer.next_line().await, TailLine::Stopped);
    }
}
