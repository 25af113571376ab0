//! Persisted domain records: backup jobs and schedule definitions.
//!
//! Status changes go through [`BackupJob::apply`], which is the single place
//! the `pending → running → {completed | failed}` lifecycle is enforced. Store
//! backends call it instead of writing status columns directly, so terminal
//! states stay immutable whatever the backend.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cron_expr::CronExpression;
use crate::error::ValidationError;
use crate::identifiers::{DatabaseName, JobId, ScheduleId, TableName};

/// What produced a backup, which also decides where it lives and whether
/// retention cleanup may delete it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BackupKind {
    #[serde(rename = "full-daily", alias = "daily")]
    FullDaily,
    #[serde(rename = "full-weekly", alias = "weekly")]
    FullWeekly,
    #[serde(rename = "full-monthly", alias = "monthly")]
    FullMonthly,
    #[serde(rename = "full-manual", alias = "manual")]
    FullManual,
    #[serde(rename = "incremental")]
    Incremental,
}

impl BackupKind {
    pub const ALL: [BackupKind; 5] = [
        BackupKind::FullDaily,
        BackupKind::FullWeekly,
        BackupKind::FullMonthly,
        BackupKind::FullManual,
        BackupKind::Incremental,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BackupKind::FullDaily => "full-daily",
            BackupKind::FullWeekly => "full-weekly",
            BackupKind::FullMonthly => "full-monthly",
            BackupKind::FullManual => "full-manual",
            BackupKind::Incremental => "incremental",
        }
    }

    /// Directory under the backup root holding artifacts of this kind.
    pub fn folder(self) -> &'static str {
        match self {
            BackupKind::FullDaily => "daily",
            BackupKind::FullWeekly => "weekly",
            BackupKind::FullMonthly => "monthly",
            BackupKind::FullManual => "manual",
            BackupKind::Incremental => "incremental",
        }
    }

    /// Human label used in notifications.
    pub fn label(self) -> &'static str {
        match self {
            BackupKind::FullDaily => "Daily full backup",
            BackupKind::FullWeekly => "Weekly full backup",
            BackupKind::FullMonthly => "Monthly full backup",
            BackupKind::FullManual => "Manual backup",
            BackupKind::Incremental => "Incremental backup",
        }
    }

    pub fn is_full(self) -> bool {
        !matches!(self, BackupKind::Incremental)
    }

    /// Only scheduled full kinds age out; manual and incremental artifacts
    /// are kept until deleted explicitly.
    pub fn is_retention_managed(self) -> bool {
        matches!(
            self,
            BackupKind::FullDaily | BackupKind::FullWeekly | BackupKind::FullMonthly
        )
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full-daily" | "daily" => Ok(BackupKind::FullDaily),
            "full-weekly" | "weekly" => Ok(BackupKind::FullWeekly),
            "full-monthly" | "monthly" => Ok(BackupKind::FullMonthly),
            "full-manual" | "manual" => Ok(BackupKind::FullManual),
            "incremental" => Ok(BackupKind::Incremental),
            other => Err(ValidationError::UnknownKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl BackupStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BackupStatus::Pending => "pending",
            BackupStatus::Running => "running",
            BackupStatus::Completed => "completed",
            BackupStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BackupStatus::Completed | BackupStatus::Failed)
    }

    pub fn can_transition_to(self, next: BackupStatus) -> bool {
        matches!(
            (self, next),
            (BackupStatus::Pending, BackupStatus::Running)
                | (BackupStatus::Pending, BackupStatus::Failed)
                | (BackupStatus::Running, BackupStatus::Completed)
                | (BackupStatus::Running, BackupStatus::Failed)
        )
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(BackupStatus::Pending),
            "running" => Ok(BackupStatus::Running),
            "completed" => Ok(BackupStatus::Completed),
            "failed" => Ok(BackupStatus::Failed),
            other => Err(ValidationError::UnknownStatus(other.to_string())),
        }
    }
}

/// A status change requested by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobTransition {
    Start,
    Complete { file_size: u64 },
    Fail { error: String },
}

impl JobTransition {
    pub fn target(&self) -> BackupStatus {
        match self {
            JobTransition::Start => BackupStatus::Running,
            JobTransition::Complete { .. } => BackupStatus::Completed,
            JobTransition::Fail { .. } => BackupStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupJob {
    pub id: JobId,
    pub database: DatabaseName,
    pub kind: BackupKind,
    /// Explicit table subset; empty means the whole database.
    #[serde(default)]
    pub tables: Vec<TableName>,
    /// Final artifact location (`.sql.gz`).
    pub file_path: PathBuf,
    pub file_size: Option<u64>,
    pub remote_path: Option<String>,
    pub status: BackupStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BackupJob {
    /// Build the pending record for a freshly inserted row.
    pub fn from_new(id: JobId, new: NewBackupJob, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            database: new.database,
            kind: new.kind,
            tables: new.tables,
            file_path: new.file_path,
            file_size: None,
            remote_path: None,
            status: BackupStatus::Pending,
            error: None,
            created_at,
            completed_at: None,
        }
    }

    /// Apply a status transition, rejecting anything that would move a job
    /// backwards or out of a terminal state.
    pub fn apply(
        &mut self,
        transition: JobTransition,
        now: DateTime<Utc>,
    ) -> Result<(), ValidationError> {
        let target = transition.target();
        if !self.status.can_transition_to(target) {
            return Err(ValidationError::IllegalTransition {
                job: self.id,
                from: self.status,
                to: target,
            });
        }

        match transition {
            JobTransition::Start => {}
            JobTransition::Complete { file_size } => {
                self.file_size = Some(file_size);
                self.error = None;
                self.completed_at = Some(now);
            }
            JobTransition::Fail { error } => {
                self.error = Some(error);
                self.completed_at = Some(now);
            }
        }
        self.status = target;
        Ok(())
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_path.file_name().and_then(|n| n.to_str())
    }
}

/// Fields supplied when a job row is first inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBackupJob {
    pub database: DatabaseName,
    pub kind: BackupKind,
    pub tables: Vec<TableName>,
    pub file_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleDefinition {
    pub id: ScheduleId,
    pub database: DatabaseName,
    pub kind: BackupKind,
    pub cron: CronExpression,
    pub enabled: bool,
    #[serde(default)]
    pub tables: Vec<TableName>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleDefinition {
    pub fn from_new(id: ScheduleId, new: NewSchedule, now: DateTime<Utc>) -> Self {
        Self {
            id,
            database: new.database,
            kind: new.kind,
            cron: new.cron,
            enabled: new.enabled,
            tables: new.tables,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply(&mut self, update: ScheduleUpdate, now: DateTime<Utc>) {
        if let Some(cron) = update.cron {
            self.cron = cron;
        }
        if let Some(enabled) = update.enabled {
            self.enabled = enabled;
        }
        if let Some(tables) = update.tables {
            self.tables = tables;
        }
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSchedule {
    pub database: DatabaseName,
    pub kind: BackupKind,
    pub cron: CronExpression,
    pub enabled: bool,
    pub tables: Vec<TableName>,
}

impl NewSchedule {
    /// Incremental schedules run one pass per table, so they need at least
    /// one table.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.kind == BackupKind::Incremental && self.tables.is_empty() {
            return Err(ValidationError::MissingTable("an incremental schedule"));
        }
        Ok(())
    }
}

/// Partial edit of a schedule; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleUpdate {
    pub cron: Option<CronExpression>,
    pub enabled: Option<bool>,
    pub tables: Option<Vec<TableName>>,
}

/// Criteria for listing backup jobs. Results are newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupFilter {
    pub database: Option<DatabaseName>,
    /// Empty matches every kind.
    pub kinds: Vec<BackupKind>,
    pub status: Option<BackupStatus>,
    /// Only jobs whose `completed_at` is strictly earlier than this.
    pub completed_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl BackupFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn database(mut self, database: DatabaseName) -> Self {
        self.database = Some(database);
        self
    }

    pub fn kind(mut self, kind: BackupKind) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn status(mut self, status: BackupStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn completed_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.completed_before = Some(cutoff);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Predicate form of the filter, ignoring `limit`.
    pub fn matches(&self, job: &BackupJob) -> bool {
        if let Some(db) = &self.database
            && &job.database != db
        {
            return false;
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&job.kind) {
            return false;
        }
        if let Some(status) = self.status
            && job.status != status
        {
            return false;
        }
        if let Some(cutoff) = self.completed_before {
            match job.completed_at {
                Some(done) if done < cutoff => {}
                _ => return false,
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;
    use rstest::rstest;

    fn job() -> BackupJob {
        BackupJob::from_new(
            JobId::new(1),
            NewBackupJob {
                database: DatabaseName::new_unchecked("shopdb"),
                kind: BackupKind::FullDaily,
                tables: Vec::new(),
                file_path: PathBuf::from("/b/daily/shopdb/shopdb_2024-01-01_000000.sql.gz"),
            },
            Utc::now(),
        )
    }

    #[rstest]
    #[case("full-daily", BackupKind::FullDaily)]
    #[case("daily", BackupKind::FullDaily)]
    #[case("Weekly", BackupKind::FullWeekly)]
    #[case("full-monthly", BackupKind::FullMonthly)]
    #[case("manual", BackupKind::FullManual)]
    #[case("incremental", BackupKind::Incremental)]
    fn test_kind_parsing_accepts_legacy_forms(#[case] input: &str, #[case] kind: BackupKind) {
        assert_eq!(input.parse::<BackupKind>().unwrap(), kind);
    }

    #[test]
    fn test_kind_serde_alias() {
        let kind: BackupKind = serde_json::from_str("\"weekly\"").unwrap();
        assert_eq!(kind, BackupKind::FullWeekly);
        assert_eq!(serde_json::to_string(&kind).unwrap(), "\"full-weekly\"");
    }

    #[test]
    fn test_retention_managed_kinds() {
        let managed: Vec<_> = BackupKind::ALL
            .iter()
            .filter(|k| k.is_retention_managed())
            .collect();
        assert_eq!(
            managed,
            vec![
                &BackupKind::FullDaily,
                &BackupKind::FullWeekly,
                &BackupKind::FullMonthly
            ]
        );
    }

    #[test]
    fn test_happy_path_lifecycle() {
        let mut job = job();
        let now = Utc::now();
        job.apply(JobTransition::Start, now).unwrap();
        assert_eq!(job.status, BackupStatus::Running);
        job.apply(JobTransition::Complete { file_size: 512 }, now)
            .unwrap();
        assert_eq!(job.status, BackupStatus::Completed);
        assert_eq!(job.file_size, Some(512));
        assert_eq!(job.completed_at, Some(now));
    }

    #[test]
    fn test_pending_job_can_fail_directly() {
        let mut job = job();
        job.apply(
            JobTransition::Fail {
                error: "interrupted by engine restart".into(),
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(job.status, BackupStatus::Failed);
    }

    #[test]
    fn test_terminal_state_is_immutable() {
        let mut job = job();
        let now = Utc::now();
        job.apply(JobTransition::Start, now).unwrap();
        job.apply(JobTransition::Fail { error: "x".into() }, now)
            .unwrap();
        let err = job.apply(JobTransition::Start, now).unwrap_err();
        assert!(matches!(err, ValidationError::IllegalTransition { .. }));
        assert_eq!(job.status, BackupStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("x"));
    }

    fn transition_strategy() -> impl Strategy<Value = JobTransition> {
        prop_oneof![
            Just(JobTransition::Start),
            any::<u32>().prop_map(|n| JobTransition::Complete {
                file_size: u64::from(n)
            }),
            "[a-z]{1,8}".prop_map(|e| JobTransition::Fail { error: e }),
        ]
    }

    proptest! {
        #[test]
        fn status_never_leaves_terminal_state(
            transitions in proptest::collection::vec(transition_strategy(), 0..12)
        ) {
            let mut job = job();
            let mut terminal: Option<BackupStatus> = None;
            for t in transitions {
                let _ = job.apply(t, Utc::now());
                if let Some(done) = terminal {
                    prop_assert_eq!(job.status, done);
                } else if job.status.is_terminal() {
                    terminal = Some(job.status);
                }
            }
        }
    }

    #[test]
    fn test_filter_matches() {
        let mut job = job();
        let now = Utc::now();
        job.apply(JobTransition::Start, now).unwrap();
        job.apply(JobTransition::Complete { file_size: 1 }, now)
            .unwrap();

        assert!(BackupFilter::new().matches(&job));
        assert!(
            BackupFilter::new()
                .kind(BackupKind::FullDaily)
                .status(BackupStatus::Completed)
                .matches(&job)
        );
        assert!(!BackupFilter::new().kind(BackupKind::FullManual).matches(&job));
        assert!(
            BackupFilter::new()
                .completed_before(now + Duration::seconds(1))
                .matches(&job)
        );
        assert!(!BackupFilter::new().completed_before(now).matches(&job));
        assert!(
            !BackupFilter::new()
                .database(DatabaseName::new_unchecked("other"))
                .matches(&job)
        );
    }

    #[test]
    fn test_incremental_schedule_requires_table() {
        let schedule = NewSchedule {
            database: DatabaseName::new_unchecked("shopdb"),
            kind: BackupKind::Incremental,
            cron: CronExpression::parse("*/15 * * * *").unwrap(),
            enabled: true,
            tables: Vec::new(),
        };
        assert!(schedule.validate().is_err());
    }
}
