//! Conflict, lookup and dump parsing errors.

use std::path::PathBuf;

use thiserror::Error;

use crate::identifiers::{JobId, ScheduleId};
use crate::status::OperationKind;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConflictError {
    #[error("a {operation} operation is already active for job {job}")]
    OperationActive { job: JobId, operation: OperationKind },

    #[error("cancellation already requested for job {0}")]
    CancelPending(JobId),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotFoundError {
    #[error("backup job {0} does not exist")]
    Job(JobId),

    #[error("schedule {0} does not exist")]
    Schedule(ScheduleId),

    #[error("table '{table}' does not exist in database '{database}'")]
    Table { database: String, table: String },

    #[error("column '{column}' does not exist in table '{table}'")]
    Column { table: String, column: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("none of the requested tables [{names}] were found in '{shown}'", names = .requested.join(", "), shown = .dump.display())]
    NoMatchingTables {
        dump: PathBuf,
        requested: Vec<String>,
    },

    #[error("unrecognised output from '{source_name}': {message}")]
    UnrecognizedOutput {
        source_name: String,
        message: String,
    },
}
