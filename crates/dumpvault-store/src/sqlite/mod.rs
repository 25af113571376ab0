//! SQLite-backed record store with WAL mode, connection pooling, and migrations
//!
//! Every call runs on the blocking thread pool. Timestamps are stored as
//! RFC 3339 text with nanosecond precision and a `Z` suffix, which keeps
//! lexicographic order equal to chronological order for range filters.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params, params_from_iter};

use dumpvault_core::error::{NotFoundError, StoreBackend, StoreError};
use dumpvault_core::{
    BackupFilter, BackupJob, BackupKind, CronExpression, DatabaseName, JobId, JobTransition,
    NewBackupJob, NewSchedule, ScheduleDefinition, ScheduleId, ScheduleUpdate, TableName,
    VaultError, VaultResult,
};

pub mod migration;
pub mod pool;

pub use migration::{Migration, MigrationEngine};
pub use pool::SqlitePool;

use crate::{JobStore, ScheduleStore};

const JOB_COLUMNS: &str = "id, database_name, kind, tables_json, file_path, file_size, \
                           remote_path, status, error, created_at, completed_at";

const SCHEDULE_COLUMNS: &str =
    "id, database_name, kind, cron_expression, enabled, tables_json, created_at, updated_at";

/// SQLite store shared across engine tasks.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Arc<SqlitePool>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::with_pool_size(path, 4)
    }

    pub fn with_pool_size(path: impl AsRef<Path>, pool_size: usize) -> Result<Self, StoreError> {
        let pool = Arc::new(SqlitePool::new(path, pool_size)?);
        pool.with_connection(|conn| MigrationEngine::new().migrate(conn, None))?;
        tracing::debug!(path = %pool.path().display(), "Opened SQLite store");
        Ok(Self { pool })
    }

    async fn blocking<T, F>(&self, f: F) -> VaultResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> VaultResult<T> + Send + 'static,
    {
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || pool.with_connection(f))
            .await
            .map_err(|e| {
                VaultError::from(StoreError::Query {
                    backend: StoreBackend::Sqlite,
                    message: format!("blocking task failed: {e}"),
                })
            })?
    }
}

fn query_err(e: rusqlite::Error) -> StoreError {
    StoreError::Query {
        backend: StoreBackend::Sqlite,
        message: e.to_string(),
    }
}

fn corrupt(message: impl Into<String>) -> StoreError {
    StoreError::Corrupt {
        backend: StoreBackend::Sqlite,
        message: message.into(),
    }
}

fn encode_ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_ts(text: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| corrupt(format!("bad timestamp '{text}': {e}")))
}

fn encode_tables(tables: &[TableName]) -> Result<String, StoreError> {
    serde_json::to_string(tables).map_err(|e| corrupt(e.to_string()))
}

fn decode_tables(text: &str) -> Result<Vec<TableName>, StoreError> {
    serde_json::from_str(text).map_err(|e| corrupt(format!("bad table list '{text}': {e}")))
}

/// Column values of one `backup_jobs` row before domain validation.
struct JobRow {
    id: i64,
    database: String,
    kind: String,
    tables: String,
    file_path: String,
    file_size: Option<i64>,
    remote_path: Option<String>,
    status: String,
    error: Option<String>,
    created_at: String,
    completed_at: Option<String>,
}

impl JobRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            database: row.get(1)?,
            kind: row.get(2)?,
            tables: row.get(3)?,
            file_path: row.get(4)?,
            file_size: row.get(5)?,
            remote_path: row.get(6)?,
            status: row.get(7)?,
            error: row.get(8)?,
            created_at: row.get(9)?,
            completed_at: row.get(10)?,
        })
    }

    fn into_job(self) -> Result<BackupJob, StoreError> {
        Ok(BackupJob {
            id: JobId::new(self.id),
            database: DatabaseName::parse(&self.database).map_err(|e| corrupt(e.to_string()))?,
            kind: self.kind.parse().map_err(|e: dumpvault_core::error::ValidationError| {
                corrupt(e.to_string())
            })?,
            tables: decode_tables(&self.tables)?,
            file_path: self.file_path.into(),
            file_size: self
                .file_size
                .map(u64::try_from)
                .transpose()
                .map_err(|e| corrupt(e.to_string()))?,
            remote_path: self.remote_path,
            status: self.status.parse().map_err(|e: dumpvault_core::error::ValidationError| {
                corrupt(e.to_string())
            })?,
            error: self.error,
            created_at: decode_ts(&self.created_at)?,
            completed_at: self.completed_at.as_deref().map(decode_ts).transpose()?,
        })
    }
}

fn load_job(conn: &Connection, id: JobId) -> Result<Option<BackupJob>, StoreError> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM backup_jobs WHERE id = ?1");
    conn.query_row(&sql, params![id.get()], JobRow::read)
        .optional()
        .map_err(query_err)?
        .map(JobRow::into_job)
        .transpose()
}

struct ScheduleRow {
    id: i64,
    database: String,
    kind: String,
    cron: String,
    enabled: bool,
    tables: String,
    created_at: String,
    updated_at: String,
}

impl ScheduleRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            database: row.get(1)?,
            kind: row.get(2)?,
            cron: row.get(3)?,
            enabled: row.get(4)?,
            tables: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_schedule(self) -> Result<ScheduleDefinition, StoreError> {
        Ok(ScheduleDefinition {
            id: ScheduleId::new(self.id),
            database: DatabaseName::parse(&self.database).map_err(|e| corrupt(e.to_string()))?,
            kind: self.kind.parse().map_err(|e: dumpvault_core::error::ValidationError| {
                corrupt(e.to_string())
            })?,
            cron: CronExpression::parse(&self.cron).map_err(|e| corrupt(e.to_string()))?,
            enabled: self.enabled,
            tables: decode_tables(&self.tables)?,
            created_at: decode_ts(&self.created_at)?,
            updated_at: decode_ts(&self.updated_at)?,
        })
    }
}

fn load_schedule(conn: &Connection, id: ScheduleId) -> Result<Option<ScheduleDefinition>, StoreError> {
    let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM backup_schedules WHERE id = ?1");
    conn.query_row(&sql, params![id.get()], ScheduleRow::read)
        .optional()
        .map_err(query_err)?
        .map(ScheduleRow::into_schedule)
        .transpose()
}

/// Translate the predicate part of a [`BackupFilter`] into a WHERE clause
/// with positional values.
fn where_clause(filter: &BackupFilter) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    if let Some(db) = &filter.database {
        values.push(Value::Text(db.as_str().to_string()));
        clauses.push(format!("database_name = ?{}", values.len()));
    }
    if !filter.kinds.is_empty() {
        let mut slots = Vec::new();
        for kind in &filter.kinds {
            values.push(Value::Text(kind.as_str().to_string()));
            slots.push(format!("?{}", values.len()));
        }
        clauses.push(format!("kind IN ({})", slots.join(", ")));
    }
    if let Some(status) = filter.status {
        values.push(Value::Text(status.as_str().to_string()));
        clauses.push(format!("status = ?{}", values.len()));
    }
    if let Some(cutoff) = filter.completed_before {
        values.push(Value::Text(encode_ts(&cutoff)));
        clauses.push(format!(
            "completed_at IS NOT NULL AND completed_at < ?{}",
            values.len()
        ));
    }

    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), values)
    }
}

/// Full listing query: predicate, newest-first ordering and optional limit.
fn list_clause(filter: &BackupFilter) -> (String, Vec<Value>) {
    let (mut sql, mut values) = where_clause(filter);
    sql.push_str(" ORDER BY created_at DESC, id DESC");
    if let Some(limit) = filter.limit {
        values.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        sql.push_str(&format!(" LIMIT ?{}", values.len()));
    }
    (sql, values)
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn insert_job(&self, new: NewBackupJob, at: DateTime<Utc>) -> VaultResult<BackupJob> {
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO backup_jobs (database_name, kind, tables_json, file_path, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, 'pending', ?5)",
                params![
                    new.database.as_str(),
                    new.kind.as_str(),
                    encode_tables(&new.tables)?,
                    new.file_path.to_string_lossy(),
                    encode_ts(&at),
                ],
            )
            .map_err(query_err)?;
            let id = JobId::new(conn.last_insert_rowid());
            Ok(BackupJob::from_new(id, new, at))
        })
        .await
    }

    async fn get_job(&self, id: JobId) -> VaultResult<Option<BackupJob>> {
        self.blocking(move |conn| Ok(load_job(conn, id)?)).await
    }

    async fn transition(
        &self,
        id: JobId,
        transition: JobTransition,
        at: DateTime<Utc>,
    ) -> VaultResult<BackupJob> {
        self.blocking(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(query_err)?;
            let mut job = load_job(&tx, id)?.ok_or(NotFoundError::Job(id))?;
            job.apply(transition, at)?;

            let file_size = job
                .file_size
                .map(i64::try_from)
                .transpose()
                .map_err(|e| corrupt(e.to_string()))?;
            tx.execute(
                "UPDATE backup_jobs
                 SET status = ?1, file_size = ?2, error = ?3, completed_at = ?4
                 WHERE id = ?5",
                params![
                    job.status.as_str(),
                    file_size,
                    job.error.as_deref(),
                    job.completed_at.as_ref().map(encode_ts),
                    id.get(),
                ],
            )
            .map_err(query_err)?;
            tx.commit().map_err(query_err)?;
            Ok(job)
        })
        .await
    }

    async fn set_remote_path(&self, id: JobId, remote_path: Option<String>) -> VaultResult<()> {
        self.blocking(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE backup_jobs SET remote_path = ?1 WHERE id = ?2",
                    params![remote_path, id.get()],
                )
                .map_err(query_err)?;
            if changed == 0 {
                return Err(NotFoundError::Job(id).into());
            }
            Ok(())
        })
        .await
    }

    async fn list_jobs(&self, filter: &BackupFilter) -> VaultResult<Vec<BackupJob>> {
        let (clause, values) = list_clause(filter);
        self.blocking(move |conn| {
            let sql = format!("SELECT {JOB_COLUMNS} FROM backup_jobs{clause}");
            let mut stmt = conn.prepare(&sql).map_err(query_err)?;
            let rows = stmt
                .query_map(params_from_iter(values), JobRow::read)
                .map_err(query_err)?;
            let mut jobs = Vec::new();
            for row in rows {
                jobs.push(row.map_err(query_err)?.into_job()?);
            }
            Ok(jobs)
        })
        .await
    }

    async fn delete_job(&self, id: JobId) -> VaultResult<bool> {
        self.blocking(move |conn| {
            let deleted = conn
                .execute("DELETE FROM backup_jobs WHERE id = ?1", params![id.get()])
                .map_err(query_err)?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn latest_completion(
        &self,
        database: &DatabaseName,
        kinds: &[BackupKind],
    ) -> VaultResult<Option<DateTime<Utc>>> {
        if kinds.is_empty() {
            return Ok(None);
        }
        let filter = BackupFilter {
            database: Some(database.clone()),
            kinds: kinds.to_vec(),
            status: Some(dumpvault_core::BackupStatus::Completed),
            ..BackupFilter::default()
        };
        let (where_part, values) = where_clause(&filter);
        self.blocking(move |conn| {
            let sql = format!("SELECT MAX(completed_at) FROM backup_jobs{where_part}");
            let latest: Option<String> = conn
                .query_row(&sql, params_from_iter(values), |row| row.get(0))
                .map_err(query_err)?;
            Ok(latest.as_deref().map(decode_ts).transpose()?)
        })
        .await
    }
}

#[async_trait]
impl ScheduleStore for SqliteStore {
    async fn insert_schedule(
        &self,
        new: NewSchedule,
        at: DateTime<Utc>,
    ) -> VaultResult<ScheduleDefinition> {
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO backup_schedules
                     (database_name, kind, cron_expression, enabled, tables_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    new.database.as_str(),
                    new.kind.as_str(),
                    new.cron.as_str(),
                    new.enabled,
                    encode_tables(&new.tables)?,
                    encode_ts(&at),
                ],
            )
            .map_err(query_err)?;
            let id = ScheduleId::new(conn.last_insert_rowid());
            Ok(ScheduleDefinition::from_new(id, new, at))
        })
        .await
    }

    async fn get_schedule(&self, id: ScheduleId) -> VaultResult<Option<ScheduleDefinition>> {
        self.blocking(move |conn| Ok(load_schedule(conn, id)?)).await
    }

    async fn list_schedules(&self, enabled_only: bool) -> VaultResult<Vec<ScheduleDefinition>> {
        self.blocking(move |conn| {
            let sql = if enabled_only {
                format!("SELECT {SCHEDULE_COLUMNS} FROM backup_schedules WHERE enabled = 1 ORDER BY id")
            } else {
                format!("SELECT {SCHEDULE_COLUMNS} FROM backup_schedules ORDER BY id")
            };
            let mut stmt = conn.prepare(&sql).map_err(query_err)?;
            let rows = stmt.query_map([], ScheduleRow::read).map_err(query_err)?;
            let mut schedules = Vec::new();
            for row in rows {
                schedules.push(row.map_err(query_err)?.into_schedule()?);
            }
            Ok(schedules)
        })
        .await
    }

    async fn update_schedule(
        &self,
        id: ScheduleId,
        update: ScheduleUpdate,
        at: DateTime<Utc>,
    ) -> VaultResult<ScheduleDefinition> {
        self.blocking(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(query_err)?;
            let mut schedule = load_schedule(&tx, id)?.ok_or(NotFoundError::Schedule(id))?;
            schedule.apply(update, at);
            tx.execute(
                "UPDATE backup_schedules
                 SET cron_expression = ?1, enabled = ?2, tables_json = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![
                    schedule.cron.as_str(),
                    schedule.enabled,
                    encode_tables(&schedule.tables)?,
                    encode_ts(&schedule.updated_at),
                    id.get(),
                ],
            )
            .map_err(query_err)?;
            tx.commit().map_err(query_err)?;
            Ok(schedule)
        })
        .await
    }

    async fn delete_schedule(&self, id: ScheduleId) -> VaultResult<bool> {
        self.blocking(move |conn| {
            let deleted = conn
                .execute("DELETE FROM backup_schedules WHERE id = ?1", params![id.get()])
                .map_err(query_err)?;
            Ok(deleted > 0)
        })
        .await
    }
}
