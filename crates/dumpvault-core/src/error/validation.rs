//! Input and precondition validation errors.

use thiserror::Error;

use crate::identifiers::JobId;
use crate::model::BackupStatus;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("database name is required")]
    MissingDatabase,

    #[error("a table name is required for {0}")]
    MissingTable(&'static str),

    #[error("{0} takes exactly one table")]
    SingleTable(&'static str),

    #[error("invalid {kind} '{value}': {reason}")]
    InvalidIdentifier {
        kind: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("unknown backup kind '{0}'")]
    UnknownKind(String),

    #[error("unknown backup status '{0}'")]
    UnknownStatus(String),

    #[error("backup kind '{0}' cannot be used here")]
    UnsupportedKind(String),

    #[error("no baseline backup for database '{database}'")]
    NoBaseline { database: String },

    #[error("job {job} cannot move from {from} to {to}")]
    IllegalTransition {
        job: JobId,
        from: BackupStatus,
        to: BackupStatus,
    },

    #[error("job {job} is {status}, expected a completed backup")]
    NotCompleted { job: JobId, status: BackupStatus },

    #[error("no running {operation} for job {job}")]
    NotRunning { job: JobId, operation: &'static str },
}
