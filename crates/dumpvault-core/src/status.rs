//! Caller-facing progress snapshots for backup and restore operations.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identifiers::{DatabaseName, JobId, TableName};

/// Which lane of the operation registry an entry occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Backup,
    Restore,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Backup => "backup",
            OperationKind::Restore => "restore",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationState {
    Idle,
    Running,
    Completed,
    Failed,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, OperationState::Completed | OperationState::Failed)
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationState::Idle => "idle",
            OperationState::Running => "running",
            OperationState::Completed => "completed",
            OperationState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of one job's backup or restore lane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub job_id: JobId,
    pub operation: OperationKind,
    pub state: OperationState,
    /// Percentage in 0..=100, present once a byte total is known.
    pub progress: Option<u8>,
    pub current_bytes: u64,
    pub total_bytes: Option<u64>,
    pub elapsed_secs: Option<u64>,
    pub database: Option<DatabaseName>,
    pub tables: Vec<TableName>,
    pub file_size: Option<u64>,
    pub created_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl StatusSnapshot {
    pub fn idle(job_id: JobId, operation: OperationKind) -> Self {
        Self {
            job_id,
            operation,
            state: OperationState::Idle,
            progress: None,
            current_bytes: 0,
            total_bytes: None,
            elapsed_secs: None,
            database: None,
            tables: Vec::new(),
            file_size: None,
            created_at: None,
            completed_at: None,
            error: None,
        }
    }
}

/// Progress percentage of `current` over `total`, scaled and capped at 100.
///
/// `scale` lets callers inflate the raw ratio when `current` counts something
/// smaller than the true amount of work (compressed input feeding a
/// decompressor, for instance).
pub fn progress_percent(current: u64, total: u64, scale: f64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (current as f64 / total as f64) * scale;
    pct.round().clamp(0.0, 100.0) as u8
}
