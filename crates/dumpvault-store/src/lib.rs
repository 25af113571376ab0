//! # dumpvault record store
//!
//! The engine persists two kinds of records: backup jobs and schedule
//! definitions. Both are reached through the async [`JobStore`] and
//! [`ScheduleStore`] traits so the engine never depends on a concrete
//! backend.
//!
//! ## Backends
//!
//! - **[InMemoryStore]**: process-local maps, used by tests and dry runs
//! - **`SqliteStore`**: SQLite file with WAL, a small connection pool and
//!   versioned migrations (requires the `sqlite` feature)

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use dumpvault_core::{
    BackupFilter, BackupJob, BackupKind, DatabaseName, JobId, JobTransition, NewBackupJob,
    NewSchedule, ScheduleDefinition, ScheduleId, ScheduleUpdate, VaultResult,
};

mod in_memory;
pub use in_memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub mod sqlite;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// Persistence for [`BackupJob`] rows.
///
/// Status changes are applied with [`JobStore::transition`], which validates
/// them through [`BackupJob::apply`] while holding the row, so two writers
/// can never interleave on one id.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job in `pending` state.
    async fn insert_job(&self, new: NewBackupJob, at: DateTime<Utc>) -> VaultResult<BackupJob>;

    async fn get_job(&self, id: JobId) -> VaultResult<Option<BackupJob>>;

    /// Apply a status transition. Fails with `NotFound` for unknown ids and
    /// with a validation error for transitions the lifecycle forbids.
    async fn transition(
        &self,
        id: JobId,
        transition: JobTransition,
        at: DateTime<Utc>,
    ) -> VaultResult<BackupJob>;

    async fn set_remote_path(&self, id: JobId, remote_path: Option<String>) -> VaultResult<()>;

    /// Jobs matching `filter`, newest first.
    async fn list_jobs(&self, filter: &BackupFilter) -> VaultResult<Vec<BackupJob>>;

    /// Remove a job row. Returns whether a row existed.
    async fn delete_job(&self, id: JobId) -> VaultResult<bool>;

    /// Latest `completed_at` among completed jobs of `database` whose kind is
    /// in `kinds`.
    async fn latest_completion(
        &self,
        database: &DatabaseName,
        kinds: &[BackupKind],
    ) -> VaultResult<Option<DateTime<Utc>>>;
}

/// Persistence for [`ScheduleDefinition`] rows.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn insert_schedule(
        &self,
        new: NewSchedule,
        at: DateTime<Utc>,
    ) -> VaultResult<ScheduleDefinition>;

    async fn get_schedule(&self, id: ScheduleId) -> VaultResult<Option<ScheduleDefinition>>;

    async fn list_schedules(&self, enabled_only: bool) -> VaultResult<Vec<ScheduleDefinition>>;

    async fn update_schedule(
        &self,
        id: ScheduleId,
        update: ScheduleUpdate,
        at: DateTime<Utc>,
    ) -> VaultResult<ScheduleDefinition>;

    async fn delete_schedule(&self, id: ScheduleId) -> VaultResult<bool>;
}

/// Everything the engine needs from persistence.
pub trait BackupStore: JobStore + ScheduleStore {}

impl<T: JobStore + ScheduleStore> BackupStore for T {}

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every backend must share, run against each implementation.

    use super::*;
    use dumpvault_core::error::{NotFoundError, ValidationError};
    use dumpvault_core::{BackupStatus, CronExpression, TableName, VaultError};
    use std::path::PathBuf;

    pub fn new_job(db: &str, kind: BackupKind) -> NewBackupJob {
        NewBackupJob {
            database: DatabaseName::new_unchecked(db),
            kind,
            tables: vec![TableName::new_unchecked("orders")],
            file_path: PathBuf::from(format!("/backups/{}/{db}/{db}.sql.gz", kind.folder())),
        }
    }

    pub async fn job_lifecycle<S: JobStore>(store: &S) {
        let now = Utc::now();
        let job = store
            .insert_job(new_job("shopdb", BackupKind::FullDaily), now)
            .await
            .unwrap();
        assert_eq!(job.status, BackupStatus::Pending);
        assert_eq!(job.tables.len(), 1);

        store
            .transition(job.id, JobTransition::Start, now)
            .await
            .unwrap();
        let done = store
            .transition(job.id, JobTransition::Complete { file_size: 99 }, now)
            .await
            .unwrap();
        assert_eq!(done.status, BackupStatus::Completed);
        assert_eq!(done.file_size, Some(99));

        let err = store
            .transition(job.id, JobTransition::Start, now)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VaultError::Validation(ValidationError::IllegalTransition { .. })
        ));

        let reloaded = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(reloaded, done);

        store
            .set_remote_path(job.id, Some("remote:daily/shopdb/x.sql.gz".into()))
            .await
            .unwrap();
        let reloaded = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(
            reloaded.remote_path.as_deref(),
            Some("remote:daily/shopdb/x.sql.gz")
        );

        assert!(store.delete_job(job.id).await.unwrap());
        assert!(!store.delete_job(job.id).await.unwrap());
        assert!(store.get_job(job.id).await.unwrap().is_none());

        let err = store
            .transition(job.id, JobTransition::Start, now)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::NotFound(NotFoundError::Job(_))));
    }

    pub async fn listing_and_baseline<S: JobStore>(store: &S) {
        let base = Utc::now() - chrono::Duration::days(10);
        let mut ids = Vec::new();
        for (i, kind) in [
            BackupKind::FullDaily,
            BackupKind::Incremental,
            BackupKind::FullManual,
        ]
        .into_iter()
        .enumerate()
        {
            let at = base + chrono::Duration::days(i as i64);
            let job = store.insert_job(new_job("shopdb", kind), at).await.unwrap();
            store
                .transition(job.id, JobTransition::Start, at)
                .await
                .unwrap();
            store
                .transition(job.id, JobTransition::Complete { file_size: 1 }, at)
                .await
                .unwrap();
            ids.push(job.id);
        }
        store
            .insert_job(new_job("crm", BackupKind::FullDaily), base)
            .await
            .unwrap();

        let all = store.list_jobs(&BackupFilter::new()).await.unwrap();
        assert_eq!(all.len(), 4);

        let shop = store
            .list_jobs(&BackupFilter::new().database(DatabaseName::new_unchecked("shopdb")))
            .await
            .unwrap();
        let listed: Vec<_> = shop.iter().map(|j| j.id).collect();
        assert_eq!(listed, vec![ids[2], ids[1], ids[0]]);

        let limited = store
            .list_jobs(
                &BackupFilter::new()
                    .status(BackupStatus::Completed)
                    .limit(1),
            )
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, ids[2]);

        let old_daily = store
            .list_jobs(
                &BackupFilter::new()
                    .kind(BackupKind::FullDaily)
                    .status(BackupStatus::Completed)
                    .completed_before(base + chrono::Duration::hours(1)),
            )
            .await
            .unwrap();
        assert_eq!(old_daily.len(), 1);
        assert_eq!(old_daily[0].id, ids[0]);

        let db = DatabaseName::new_unchecked("shopdb");
        let incremental = store
            .latest_completion(&db, &[BackupKind::Incremental])
            .await
            .unwrap();
        assert_eq!(incremental, Some(base + chrono::Duration::days(1)));

        let full = store
            .latest_completion(&db, &[BackupKind::FullDaily, BackupKind::FullManual])
            .await
            .unwrap();
        assert_eq!(full, Some(base + chrono::Duration::days(2)));

        let none = store
            .latest_completion(&DatabaseName::new_unchecked("crm"), &BackupKind::ALL)
            .await
            .unwrap();
        assert_eq!(none, None);
    }

    pub async fn schedule_crud<S: ScheduleStore>(store: &S) {
        let now = Utc::now();
        let created = store
            .insert_schedule(
                NewSchedule {
                    database: DatabaseName::new_unchecked("shopdb"),
                    kind: BackupKind::FullWeekly,
                    cron: CronExpression::parse("0 2 * * SUN").unwrap(),
                    enabled: true,
                    tables: Vec::new(),
                },
                now,
            )
            .await
            .unwrap();
        store
            .insert_schedule(
                NewSchedule {
                    database: DatabaseName::new_unchecked("shopdb"),
                    kind: BackupKind::Incremental,
                    cron: CronExpression::parse("*/30 * * * *").unwrap(),
                    enabled: false,
                    tables: vec![TableName::new_unchecked("orders")],
                },
                now,
            )
            .await
            .unwrap();

        assert_eq!(store.list_schedules(false).await.unwrap().len(), 2);
        assert_eq!(store.list_schedules(true).await.unwrap().len(), 1);

        let updated = store
            .update_schedule(
                created.id,
                ScheduleUpdate {
                    enabled: Some(false),
                    cron: Some(CronExpression::parse("0 4 * * SUN").unwrap()),
                    tables: None,
                },
                now,
            )
            .await
            .unwrap();
        assert!(!updated.enabled);
        assert_eq!(updated.cron.as_str(), "0 4 * * SUN");
        assert_eq!(store.list_schedules(true).await.unwrap().len(), 0);

        let fetched = store.get_schedule(created.id).await.unwrap().unwrap();
        assert_eq!(fetched, updated);

        assert!(store.delete_schedule(created.id).await.unwrap());
        let missing = store
            .update_schedule(created.id, ScheduleUpdate::default(), now)
            .await
            .unwrap_err();
        assert!(matches!(
            missing,
            VaultError::NotFound(NotFoundError::Schedule(_))
        ));
    }
}
