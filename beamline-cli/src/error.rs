//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use beamline::dispatch::SubmitError;
use std::fmt;
use std::process;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Input directory unreadable or empty
    Input { path: String, reason: String },
    /// Job submission failed
    Submit(SubmitError),
    /// Failed to write the results file
    FileWrite { path: String, error: std::io::Error },
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        if let CliError::Submit(SubmitError::BatchUnavailable) = self {
            eprintln!();
            eprintln!("The batch platform needs a scheduler backend; this CLI only runs local jobs.");
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Input { path, reason } => {
                write!(f, "Cannot read input files from '{}': {}", path, reason)
            }
            CliError::Submit(e) => write!(f, "Failed to submit job: {}", e),
            CliError::FileWrite { path, error } => {
                write!(f, "Failed to write '{}': {}", path, error)
            }
        }
    }
}
