//! Error Types
//!
//! Every fallible dumpvault operation returns [`VaultError`]. The variants
//! mirror the categories callers react to differently:
//! - `Validation`, `Conflict` and `NotFound` are returned before any job row
//!   is touched
//! - `Process`, `Filesystem` and `Parse` happen inside a registered operation
//!   and end with the job marked failed
//! - `Store` and `Config` come from the persisted record store and from
//!   configuration loading
//!
//! Each category has its own detail type in a focused submodule.

mod config;
mod fs;
mod lookup;
mod process;
mod store;
mod validation;

pub use config::ConfigError;
pub use fs::{FilesystemError, FsOperation};
pub use lookup::{ConflictError, NotFoundError, ParseError};
pub use process::{AbortReason, ProcessError};
pub use store::{StoreBackend, StoreError};
pub use validation::ValidationError;

use thiserror::Error;

/// Top-level error for engine operations.
#[derive(Error, Debug, Clone)]
pub enum VaultError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("process failed: {0}")]
    Process(#[from] ProcessError),

    #[error("filesystem error: {0}")]
    Filesystem(#[from] FilesystemError),

    #[error("conflict: {0}")]
    Conflict(#[from] ConflictError),

    #[error("not found: {0}")]
    NotFound(#[from] NotFoundError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type VaultResult<T> = Result<T, VaultError>;

impl VaultError {
    /// Short stable label, used as a metrics tag and in CLI exit messages.
    pub fn category(&self) -> &'static str {
        match self {
            VaultError::Validation(_) => "validation",
            VaultError::Process(_) => "process",
            VaultError::Filesystem(_) => "filesystem",
            VaultError::Conflict(_) => "conflict",
            VaultError::NotFound(_) => "not_found",
            VaultError::Parse(_) => "parse",
            VaultError::Store(_) => "store",
            VaultError::Config(_) => "config",
        }
    }

    /// Text recorded on a failed job.
    ///
    /// Aborted operations record the bare reason ("cancelled by user") so the
    /// persisted diagnostic reads the same regardless of the error wrapping.
    pub fn diagnostic(&self) -> String {
        match self {
            VaultError::Process(ProcessError::Aborted(reason)) => reason.to_string(),
            other => other.to_string(),
        }
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, VaultError::Process(ProcessError::Aborted(_)))
    }

    /// True for the errors that are rejected before any job row is mutated.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            VaultError::Validation(_) | VaultError::Conflict(_) | VaultError::NotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::JobId;
    use crate::status::OperationKind;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_cancel_diagnostic_is_bare_reason() {
        let err: VaultError = ProcessError::Aborted(AbortReason::Cancelled).into();
        assert_eq!(err.diagnostic(), "cancelled by user");
        assert!(err.is_abort());
    }

    #[test]
    fn test_timeout_diagnostic_mentions_duration() {
        let err: VaultError =
            ProcessError::Aborted(AbortReason::TimedOut(Duration::from_secs(300))).into();
        assert_eq!(err.diagnostic(), "timed out after 5m");
    }

    #[test]
    fn test_process_diagnostic_carries_stderr() {
        let err: VaultError = ProcessError::NonZeroExit {
            program: "mysqldump".to_string(),
            code: Some(2),
            stderr: "Access denied".to_string(),
        }
        .into();
        let text = err.diagnostic();
        assert!(text.contains("mysqldump"));
        assert!(text.contains("Access denied"));
        assert_eq!(err.category(), "process");
        assert!(!err.is_precondition());
    }

    #[test]
    fn test_precondition_categories() {
        let conflict: VaultError = ConflictError::OperationActive {
            job: JobId::new(7),
            operation: OperationKind::Restore,
        }
        .into();
        assert!(conflict.is_precondition());
        assert!(conflict.to_string().contains("job 7"));

        let missing: VaultError = NotFoundError::Job(JobId::new(3)).into();
        assert!(missing.is_precondition());
        assert_eq!(missing.category(), "not_found");

        let fs: VaultError = FilesystemError::ArtifactMissing {
            path: PathBuf::from("/tmp/a.sql.gz"),
        }
        .into();
        assert!(!fs.is_precondition());
    }
}
