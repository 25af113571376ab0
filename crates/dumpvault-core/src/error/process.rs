//! External process failures.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    #[error("failed to start '{program}': {message}")]
    SpawnFailed { program: String, message: String },

    #[error("'{program}' exited with {exit}: {stderr}", exit = exit_label(.code))]
    NonZeroExit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("'{program}' reported an error: {line}")]
    FatalDiagnostic { program: String, line: String },

    #[error("stream error on '{program}': {message}")]
    Stream { program: String, message: String },

    #[error("{0}")]
    Aborted(AbortReason),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

/// Why a running operation was torn down before it finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    Cancelled,
    TimedOut(Duration),
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Cancelled => write!(f, "cancelled by user"),
            AbortReason::TimedOut(limit) => {
                write!(f, "timed out after {}", humantime::format_duration(*limit))
            }
        }
    }
}
