//! # Backup engine
//!
//! [`BackupEngine`] is the caller-facing surface: it validates requests,
//! owns the job rows through the store, claims registry lanes and runs the
//! backup and restore pipelines. Long-running work is spawned onto the
//! runtime; `create_backup` and `restore_backup` return as soon as the
//! operation is registered.
//!
//! Side effects that follow a terminal transition (remote upload,
//! notification) run on their own task after the transition has been
//! committed and never change the outcome.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{Local, Utc};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, info, info_span, warn};

use dumpvault_core::config::EngineConfig;
use dumpvault_core::error::{
    AbortReason, ConfigError, ConflictError, FilesystemError, FsOperation, NotFoundError, ProcessError,
    ValidationError,
};
use dumpvault_core::{
    BackupFilter, BackupJob, BackupKind, BackupStatus, DatabaseName, JobId, JobTransition,
    NewBackupJob, NewSchedule, OperationKind, OperationState, ScheduleDefinition, ScheduleId,
    ScheduleUpdate, StatusSnapshot, TableName, VaultError, VaultResult,
};
use dumpvault_observability::{EngineMetrics, Outcome};
use dumpvault_store::BackupStore;

use crate::cleanup::{self, CleanupReport};
use crate::commands::MysqlCommands;
use crate::extract::TableExtractor;
use crate::fsutil::{artifact_len, discard, exists, remove_if_exists};
use crate::full;
use crate::incremental::{self, IncrementalPlan};
use crate::layout::{ArtifactLayout, ArtifactPaths, dump_path_for, remote_destination};
use crate::notify::{CommandNotifier, Notification, Notifier, TracingNotifier};
use crate::process::{ProcessRunner, Supervisor, TokioProcessRunner};
use crate::registry::{CancelRequest, OperationRegistry, OperationTicket};
use crate::remote::{RcloneSync, RemoteSync};
use crate::restore::{self, RestoreOutcome};
use crate::scheduler::{Scheduler, SchedulerHandle};
use crate::source::{MysqlCliSource, SourceDatabase};

/// Diagnostic recorded on jobs found unfinished at startup.
pub const ORPHAN_REASON: &str = "interrupted by engine restart";

const MAX_NAME_ATTEMPTS: u32 = 100;
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// Kinds an incremental pass may take its baseline from when no earlier
/// incremental exists.
const FULL_KINDS: [BackupKind; 4] = [
    BackupKind::FullDaily,
    BackupKind::FullWeekly,
    BackupKind::FullMonthly,
    BackupKind::FullManual,
];

/// Backup, restore, retention and scheduling engine.
///
/// Cheap to clone; clones share the registry and collaborators.
#[derive(Clone)]
pub struct BackupEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    store: Arc<dyn BackupStore>,
    runner: Arc<dyn ProcessRunner>,
    source: Arc<dyn SourceDatabase>,
    notifier: Arc<dyn Notifier>,
    remote: Option<Arc<dyn RemoteSync>>,
    registry: OperationRegistry,
    layout: ArtifactLayout,
    commands: MysqlCommands,
    extractor: TableExtractor,
    metrics: Option<EngineMetrics>,
    claimed: Arc<Mutex<HashSet<PathBuf>>>,
    /// Uploads and notifications that outlive the operation they follow.
    background: Mutex<JoinSet<()>>,
}

/// Assembles a [`BackupEngine`]. Only the store is required; every other
/// collaborator defaults to the real implementation driven by the config.
pub struct BackupEngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn BackupStore>>,
    runner: Option<Arc<dyn ProcessRunner>>,
    source: Option<Arc<dyn SourceDatabase>>,
    notifier: Option<Arc<dyn Notifier>>,
    remote: Option<Option<Arc<dyn RemoteSync>>>,
    metrics: Option<EngineMetrics>,
}

impl BackupEngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            store: None,
            runner: None,
            source: None,
            notifier: None,
            remote: None,
            metrics: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn BackupStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn source(mut self, source: Arc<dyn SourceDatabase>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Override remote sync. `None` disables uploads even when the config
    /// names a remote base.
    pub fn remote(mut self, remote: Option<Arc<dyn RemoteSync>>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn metrics(mut self, metrics: EngineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> VaultResult<BackupEngine> {
        let config = self.config;
        config.validate()?;
        let store = self.store.ok_or_else(|| {
            ConfigError::ValidationFailed("a backup store is required".to_string())
        })?;

        let grace = config.operations.cancel_grace;
        let runner: Arc<dyn ProcessRunner> = match self.runner {
            Some(runner) => runner,
            None => Arc::new(TokioProcessRunner::new()),
        };
        let commands = MysqlCommands::new(config.tools.clone(), config.mysql.clone());
        let source: Arc<dyn SourceDatabase> = match self.source {
            Some(source) => source,
            None => Arc::new(MysqlCliSource::new(
                Arc::clone(&runner),
                commands.clone(),
                grace,
            )),
        };
        let notifier: Arc<dyn Notifier> = match (self.notifier, &config.notify.command) {
            (Some(notifier), _) => notifier,
            (None, Some(program)) => Arc::new(CommandNotifier::new(
                Arc::clone(&runner),
                program,
                &config.notify.args,
                NOTIFY_TIMEOUT,
            )),
            (None, None) => Arc::new(TracingNotifier),
        };
        let remote: Option<Arc<dyn RemoteSync>> = match self.remote {
            Some(remote) => remote,
            None => RcloneSync::from_config(
                Arc::clone(&runner),
                config.tools.rclone.clone(),
                &config.remote,
                grace,
            )
            .map(|sync| Arc::new(sync) as Arc<dyn RemoteSync>),
        };

        let mut registry = OperationRegistry::new(config.operations.status_linger);
        if let Some(metrics) = &self.metrics {
            registry = registry.with_metrics(metrics.clone());
        }
        let layout = ArtifactLayout::new(&config.storage);
        let extractor = TableExtractor::new(
            Arc::clone(&runner),
            commands.clone(),
            layout.scratch_dir(),
            grace,
        );

        info!(
            backup_dir = %layout.root().display(),
            remote = remote.is_some(),
            "backup engine ready"
        );

        Ok(BackupEngine {
            inner: Arc::new(EngineInner {
                config,
                store,
                runner,
                source,
                notifier,
                remote,
                registry,
                layout,
                commands,
                extractor,
                metrics: self.metrics,
                claimed: Arc::new(Mutex::new(HashSet::new())),
                background: Mutex::new(JoinSet::new()),
            }),
        })
    }
}

/// Holds an artifact path until the backup writing it finishes, so two
/// backups started in the same second never share a file name.
struct PathClaim {
    claimed: Arc<Mutex<HashSet<PathBuf>>>,
    path: PathBuf,
}

impl Drop for PathClaim {
    fn drop(&mut self) {
        self.claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.path);
    }
}

enum BackupWork {
    Full,
    Incremental(IncrementalPlan),
}

struct PreparedBackup {
    job: BackupJob,
    ticket: OperationTicket,
    paths: ArtifactPaths,
    work: BackupWork,
    _claim: PathClaim,
}

struct PreparedRestore {
    job: BackupJob,
    tables: Vec<TableName>,
    ticket: OperationTicket,
}

fn outcome_of(err: &VaultError) -> Outcome {
    match err {
        VaultError::Process(ProcessError::Aborted(AbortReason::Cancelled)) => Outcome::Cancelled,
        VaultError::Process(ProcessError::Aborted(AbortReason::TimedOut(_))) => Outcome::TimedOut,
        _ => Outcome::Failed,
    }
}

/// Status of a job with no registry entry, derived from its row.
fn snapshot_from_job(job: &BackupJob) -> StatusSnapshot {
    let mut snapshot = StatusSnapshot::idle(job.id, OperationKind::Backup);
    snapshot.state = match job.status {
        BackupStatus::Pending => OperationState::Idle,
        BackupStatus::Running => OperationState::Running,
        BackupStatus::Completed => OperationState::Completed,
        BackupStatus::Failed => OperationState::Failed,
    };
    if job.status == BackupStatus::Completed {
        snapshot.progress = Some(100);
    }
    snapshot.elapsed_secs = job.completed_at.and_then(|done| {
        u64::try_from((done - job.created_at).num_seconds()).ok()
    });
    snapshot.database = Some(job.database.clone());
    snapshot.tables = job.tables.clone();
    snapshot.file_size = job.file_size;
    snapshot.created_at = Some(job.created_at);
    snapshot.completed_at = job.completed_at;
    snapshot.error = job.error.clone();
    snapshot
}

impl BackupEngine {
    pub fn builder(config: EngineConfig) -> BackupEngineBuilder {
        BackupEngineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.inner.registry
    }

    pub fn store(&self) -> &Arc<dyn BackupStore> {
        &self.inner.store
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.inner.layout
    }

    pub fn metrics(&self) -> Option<&EngineMetrics> {
        self.inner.metrics.as_ref()
    }

    // ---- backups -------------------------------------------------------

    /// Validate and register a backup, then run it in the background.
    pub async fn create_backup(
        &self,
        database: DatabaseName,
        kind: BackupKind,
        tables: Vec<TableName>,
    ) -> VaultResult<JobId> {
        let prepared = self.prepare_backup(database, kind, tables).await?;
        let job_id = prepared.job.id;
        let engine = self.clone();
        tokio::spawn(async move {
            // Failures are recorded on the job and logged by the pipeline.
            let _ = engine.execute_backup(prepared).await;
        });
        Ok(job_id)
    }

    /// Run a full backup to completion.
    pub async fn run_backup(
        &self,
        database: DatabaseName,
        kind: BackupKind,
        tables: Vec<TableName>,
    ) -> VaultResult<BackupJob> {
        if kind == BackupKind::Incremental {
            return Err(ValidationError::UnsupportedKind(kind.to_string()).into());
        }
        let prepared = self.prepare_backup(database, kind, tables).await?;
        self.execute_backup(prepared).await
    }

    /// Run an incremental pass over one table to completion.
    pub async fn run_incremental(
        &self,
        database: DatabaseName,
        table: TableName,
    ) -> VaultResult<BackupJob> {
        let prepared = self
            .prepare_backup(database, BackupKind::Incremental, vec![table])
            .await?;
        self.execute_backup(prepared).await
    }

    async fn prepare_backup(
        &self,
        database: DatabaseName,
        kind: BackupKind,
        tables: Vec<TableName>,
    ) -> VaultResult<PreparedBackup> {
        let inner = &self.inner;

        let (work, stem) = if kind == BackupKind::Incremental {
            let table = match tables.as_slice() {
                [] => return Err(ValidationError::MissingTable("an incremental backup").into()),
                [table] => table.clone(),
                _ => return Err(ValidationError::SingleTable("an incremental backup").into()),
            };
            let stem = table.as_str().to_string();
            let plan = self.plan_incremental(&database, table).await?;
            (BackupWork::Incremental(plan), stem)
        } else {
            (BackupWork::Full, database.as_str().to_string())
        };

        let (paths, claim) = self.claim_paths(kind, &database, &stem).await?;
        let job = inner
            .store
            .insert_job(
                NewBackupJob {
                    database: database.clone(),
                    kind,
                    tables: tables.clone(),
                    file_path: paths.artifact.clone(),
                },
                Utc::now(),
            )
            .await?;

        let timeout = if kind == BackupKind::Incremental {
            inner.config.operations.incremental_timeout
        } else {
            inner.config.operations.backup_timeout
        };
        let ticket = match inner
            .registry
            .register(job.id, OperationKind::Backup, database, tables, timeout)
        {
            Ok(ticket) => ticket,
            Err(conflict) => {
                let err = VaultError::from(conflict);
                inner
                    .store
                    .transition(job.id, JobTransition::Fail { error: err.diagnostic() }, Utc::now())
                    .await?;
                return Err(err);
            }
        };
        let job = inner
            .store
            .transition(job.id, JobTransition::Start, Utc::now())
            .await?;
        info!(job.id = %job.id, database = %job.database, kind = %kind, "backup started");

        Ok(PreparedBackup {
            job,
            ticket,
            paths,
            work,
            _claim: claim,
        })
    }

    /// Resolve baseline, columns and change-tracking column for an
    /// incremental pass.
    async fn plan_incremental(
        &self,
        database: &DatabaseName,
        table: TableName,
    ) -> VaultResult<IncrementalPlan> {
        let store = &self.inner.store;
        let since = match store
            .latest_completion(database, &[BackupKind::Incremental])
            .await?
        {
            Some(at) => at,
            None => store
                .latest_completion(database, &FULL_KINDS)
                .await?
                .ok_or_else(|| ValidationError::NoBaseline {
                    database: database.to_string(),
                })?,
        };

        let columns = self.inner.source.columns(database, &table).await?;
        if columns.is_empty() {
            return Err(NotFoundError::Table {
                database: database.to_string(),
                table: table.to_string(),
            }
            .into());
        }
        let wanted = &self.inner.config.incremental.timestamp_column;
        let timestamp_column = columns
            .iter()
            .find(|column| column.name.eq_ignore_ascii_case(wanted))
            .map(|column| column.name.clone())
            .ok_or_else(|| NotFoundError::Column {
                table: table.to_string(),
                column: wanted.clone(),
            })?;

        debug!(database = %database, table = %table, since = %since, "incremental baseline");
        Ok(IncrementalPlan {
            database: database.clone(),
            table,
            columns,
            timestamp_column,
            since,
        })
    }

    async fn claim_paths(
        &self,
        kind: BackupKind,
        database: &DatabaseName,
        stem: &str,
    ) -> VaultResult<(ArtifactPaths, PathClaim)> {
        let now = Local::now();
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let paths = self.inner.layout.paths(kind, database, stem, &now, attempt);
            if exists(&paths.artifact).await || exists(&paths.dump).await {
                continue;
            }
            let mut claimed = self
                .inner
                .claimed
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if claimed.insert(paths.artifact.clone()) {
                let claim = PathClaim {
                    claimed: Arc::clone(&self.inner.claimed),
                    path: paths.artifact.clone(),
                };
                return Ok((paths, claim));
            }
        }
        let directory = self.inner.layout.directory(kind, database);
        Err(FilesystemError::Io {
            operation: FsOperation::Create,
            path: directory,
            message: format!("no free artifact name after {MAX_NAME_ATTEMPTS} attempts"),
        }
        .into())
    }

    async fn execute_backup(&self, prepared: PreparedBackup) -> VaultResult<BackupJob> {
        let PreparedBackup {
            job,
            ticket,
            paths,
            work,
            _claim,
        } = prepared;
        let span = info_span!("backup", job.id = %job.id, database = %job.database, kind = %job.kind);

        async move {
            let inner = &self.inner;
            let started = Instant::now();
            let result = {
                let mut supervisor = Supervisor::attached(
                    inner.runner.as_ref(),
                    inner.config.operations.cancel_grace,
                    &ticket,
                );
                match &work {
                    BackupWork::Full => full::dump_and_compress(
                        &mut supervisor,
                        &inner.commands,
                        &job.database,
                        &job.tables,
                        &paths,
                    )
                    .await
                    .map(|size| (size, None)),
                    BackupWork::Incremental(plan) => incremental::run_incremental(
                        &mut supervisor,
                        &inner.commands,
                        inner.source.as_ref(),
                        plan,
                        &paths,
                    )
                    .await
                    .map(|outcome| (outcome.file_size, Some(outcome.rows))),
                }
            };
            let elapsed = started.elapsed();

            let (file_size, rows) = match result {
                Ok(done) => done,
                Err(err) => {
                    let diagnostic = err.diagnostic();
                    if let Err(store_err) = inner
                        .store
                        .transition(job.id, JobTransition::Fail { error: diagnostic.clone() }, Utc::now())
                        .await
                    {
                        warn!(error = %store_err, "failed to record backup failure");
                    }
                    ticket.fail(diagnostic.clone());
                    self.record_backup(job.kind, outcome_of(&err), elapsed, None);
                    warn!(error = %diagnostic, "backup failed");
                    self.dispatch(Notification::BackupFailed {
                        database: job.database.clone(),
                        kind: job.kind,
                        error: diagnostic,
                    });
                    return Err(err);
                }
            };

            let done = match inner
                .store
                .transition(job.id, JobTransition::Complete { file_size }, Utc::now())
                .await
            {
                Ok(done) => done,
                Err(err) => {
                    ticket.fail(err.diagnostic());
                    self.record_backup(job.kind, Outcome::Failed, elapsed, None);
                    return Err(err);
                }
            };
            ticket.complete();
            self.record_backup(job.kind, Outcome::Completed, elapsed, Some(file_size));
            info!(bytes = file_size, elapsed = ?elapsed, "backup completed");

            self.after_backup(done.clone(), rows);
            Ok(done)
        }
        .instrument(span)
        .await
    }

    fn record_backup(&self, kind: BackupKind, outcome: Outcome, elapsed: Duration, size: Option<u64>) {
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_backup(kind, outcome, elapsed, size);
        }
    }

    /// Upload and notify once the completed transition is committed.
    fn after_backup(&self, job: BackupJob, rows: Option<usize>) {
        let engine = self.clone();
        self.spawn_background(async move {
            let remote = if job.kind.is_full() {
                engine.sync_remote(&job).await
            } else {
                None
            };
            let finished_at = job.completed_at.unwrap_or_else(Utc::now);
            let file_size = job.file_size.unwrap_or_default();
            let notification = match (rows, job.tables.first()) {
                (Some(rows), Some(table)) => Notification::IncrementalCompleted {
                    database: job.database.clone(),
                    table: table.clone(),
                    rows,
                    file_size,
                    finished_at,
                },
                _ => Notification::BackupCompleted {
                    database: job.database.clone(),
                    kind: job.kind,
                    file_size,
                    directory: job
                        .file_path
                        .parent()
                        .map(Path::to_path_buf)
                        .unwrap_or_default(),
                    finished_at,
                    remote,
                },
            };
            engine.notify(&notification).await;
        });
    }

    async fn sync_remote(&self, job: &BackupJob) -> Option<String> {
        let remote = self.inner.remote.as_ref()?;
        let file_name = job.file_name()?;
        let destination = remote_destination(
            remote.base(),
            job.kind,
            self.inner.layout.database_folder(&job.database),
            file_name,
        );

        match remote.upload(&job.file_path, &destination).await {
            Ok(()) => {
                if let Err(e) = self
                    .inner
                    .store
                    .set_remote_path(job.id, Some(destination.clone()))
                    .await
                {
                    warn!(job.id = %job.id, error = %e, "failed to record remote path");
                }
                if remote.delete_after_upload()
                    && let Err(e) = remove_if_exists(&job.file_path).await
                {
                    warn!(job.id = %job.id, error = %e, "failed to remove uploaded artifact");
                }
                Some(destination)
            }
            Err(e) => {
                warn!(job.id = %job.id, error = %e, "remote upload failed");
                self.notify(&Notification::RemoteSyncFailed {
                    database: job.database.clone(),
                    error: e.to_string(),
                })
                .await;
                None
            }
        }
    }

    async fn notify(&self, notification: &Notification) {
        if let Err(e) = self.inner.notifier.notify(notification).await {
            warn!(error = %e, "notification delivery failed");
        }
    }

    fn dispatch(&self, notification: Notification) {
        let engine = self.clone();
        self.spawn_background(async move { engine.notify(&notification).await });
    }

    fn spawn_background<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut background = self
            .inner
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while background.try_join_next().is_some() {}
        background.spawn(task);
    }

    /// Wait for pending uploads and notifications, including any they start.
    pub async fn settle(&self) {
        loop {
            let mut pending = std::mem::take(
                &mut *self
                    .inner
                    .background
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner),
            );
            if pending.is_empty() {
                return;
            }
            while pending.join_next().await.is_some() {}
        }
    }

    /// Stop a running backup and wait until it has been torn down.
    ///
    /// A job left `pending` or `running` without a registry entry is failed
    /// directly and its partial dump removed.
    pub async fn cancel_backup(&self, job_id: JobId) -> VaultResult<BackupJob> {
        self.get_backup(job_id).await?;
        match self
            .inner
            .registry
            .request_cancel(job_id, OperationKind::Backup)?
        {
            CancelRequest::Signalled(done) => {
                info!(job.id = %job_id, "backup cancellation requested");
                done.wait().await;
            }
            CancelRequest::NotRegistered => {
                let job = self.get_backup(job_id).await?;
                if job.status.is_terminal() {
                    return Err(ValidationError::NotRunning {
                        job: job_id,
                        operation: "backup",
                    }
                    .into());
                }
                discard(&[&dump_path_for(&job.file_path)]).await;
                self.inner
                    .store
                    .transition(
                        job_id,
                        JobTransition::Fail {
                            error: AbortReason::Cancelled.to_string(),
                        },
                        Utc::now(),
                    )
                    .await?;
                warn!(job.id = %job_id, "cancelled backup had no running operation");
            }
        }
        self.get_backup(job_id).await
    }

    // ---- restores ------------------------------------------------------

    /// Validate and register a restore, then run it in the background.
    pub async fn restore_backup(&self, job_id: JobId, tables: Vec<TableName>) -> VaultResult<()> {
        let prepared = self.prepare_restore(job_id, tables).await?;
        let engine = self.clone();
        tokio::spawn(async move {
            let _ = engine.execute_restore(prepared).await;
        });
        Ok(())
    }

    /// Run a restore to completion.
    pub async fn run_restore(
        &self,
        job_id: JobId,
        tables: Vec<TableName>,
    ) -> VaultResult<RestoreOutcome> {
        let prepared = self.prepare_restore(job_id, tables).await?;
        self.execute_restore(prepared).await
    }

    async fn prepare_restore(
        &self,
        job_id: JobId,
        tables: Vec<TableName>,
    ) -> VaultResult<PreparedRestore> {
        let job = self.get_backup(job_id).await?;
        if job.status != BackupStatus::Completed {
            return Err(ValidationError::NotCompleted {
                job: job_id,
                status: job.status,
            }
            .into());
        }
        artifact_len(&job.file_path).await?;

        let ticket = self.inner.registry.register(
            job_id,
            OperationKind::Restore,
            job.database.clone(),
            tables.clone(),
            self.inner.config.operations.restore_timeout,
        )?;
        info!(job.id = %job_id, database = %job.database, tables = tables.len(), "restore started");
        Ok(PreparedRestore {
            job,
            tables,
            ticket,
        })
    }

    async fn execute_restore(&self, prepared: PreparedRestore) -> VaultResult<RestoreOutcome> {
        let PreparedRestore {
            job,
            tables,
            ticket,
        } = prepared;
        let span = info_span!("restore", job.id = %job.id, database = %job.database);

        async move {
            let inner = &self.inner;
            let started = Instant::now();
            let result = {
                let mut supervisor = Supervisor::attached(
                    inner.runner.as_ref(),
                    inner.config.operations.cancel_grace,
                    &ticket,
                );
                restore::run_restore(&mut supervisor, &inner.commands, &inner.extractor, &job, &tables)
                    .await
            };
            let elapsed = started.elapsed();

            match result {
                Ok(outcome) => {
                    ticket.complete();
                    if let Some(metrics) = &inner.metrics {
                        metrics.record_restore(Outcome::Completed, elapsed);
                    }
                    info!(bytes = outcome.bytes_fed, elapsed = ?elapsed, "restore completed");
                    self.dispatch(Notification::RestoreCompleted {
                        database: job.database.clone(),
                        tables,
                    });
                    Ok(outcome)
                }
                Err(err) => {
                    let diagnostic = err.diagnostic();
                    ticket.fail(diagnostic.clone());
                    if let Some(metrics) = &inner.metrics {
                        metrics.record_restore(outcome_of(&err), elapsed);
                    }
                    warn!(error = %diagnostic, "restore failed");
                    self.dispatch(Notification::RestoreFailed {
                        database: job.database.clone(),
                        error: diagnostic,
                    });
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Stop a running restore and wait until it has been torn down.
    pub async fn cancel_restore(&self, job_id: JobId) -> VaultResult<()> {
        self.get_backup(job_id).await?;
        match self
            .inner
            .registry
            .request_cancel(job_id, OperationKind::Restore)?
        {
            CancelRequest::Signalled(done) => {
                info!(job.id = %job_id, "restore cancellation requested");
                done.wait().await;
                Ok(())
            }
            CancelRequest::NotRegistered => Err(ValidationError::NotRunning {
                job: job_id,
                operation: "restore",
            }
            .into()),
        }
    }

    /// Extract `tables` from a backup's artifact into `destination`.
    /// Returns the tables found, in dump order.
    pub async fn extract_tables(
        &self,
        job_id: JobId,
        tables: &[TableName],
        destination: &Path,
    ) -> VaultResult<Vec<String>> {
        let job = self.get_backup(job_id).await?;
        artifact_len(&job.file_path).await?;
        self.extract_file(&job.file_path, tables, destination).await
    }

    /// Extract `tables` from any dump file into `destination`.
    pub async fn extract_file(
        &self,
        dump: &Path,
        tables: &[TableName],
        destination: &Path,
    ) -> VaultResult<Vec<String>> {
        let fragment = self.inner.extractor.extract(dump, tables).await?;
        tokio::fs::copy(fragment.path(), destination)
            .await
            .map_err(|e| FilesystemError::io(FsOperation::Write, destination, &e))?;
        info!(dump = %dump.display(), destination = %destination.display(), tables = ?fragment.tables, "tables extracted");
        Ok(fragment.tables.clone())
    }

    // ---- status and listing --------------------------------------------

    pub async fn get_backup_status(&self, job_id: JobId) -> VaultResult<StatusSnapshot> {
        let job = self.get_backup(job_id).await?;
        // The row turns terminal just before the registry entry is released.
        match self.inner.registry.snapshot(job_id, OperationKind::Backup) {
            Some(mut snapshot) if !job.status.is_terminal() => {
                snapshot.file_size = job.file_size;
                Ok(snapshot)
            }
            _ => Ok(snapshot_from_job(&job)),
        }
    }

    /// Restore lane status; `idle` when no restore ran recently.
    pub async fn get_restore_status(&self, job_id: JobId) -> VaultResult<StatusSnapshot> {
        let job = self.get_backup(job_id).await?;
        Ok(self
            .inner
            .registry
            .snapshot(job_id, OperationKind::Restore)
            .unwrap_or_else(|| {
                let mut idle = StatusSnapshot::idle(job_id, OperationKind::Restore);
                idle.database = Some(job.database.clone());
                idle
            }))
    }

    pub async fn list_backups(&self, filter: &BackupFilter) -> VaultResult<Vec<BackupJob>> {
        self.inner.store.list_jobs(filter).await
    }

    pub async fn get_backup(&self, job_id: JobId) -> VaultResult<BackupJob> {
        self.inner
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| NotFoundError::Job(job_id).into())
    }

    /// Remove a backup's files and row.
    pub async fn delete_backup(&self, job_id: JobId) -> VaultResult<()> {
        let job = self.get_backup(job_id).await?;
        if let Some(operation) = self.inner.registry.active_operation(job_id) {
            return Err(ConflictError::OperationActive {
                job: job_id,
                operation,
            }
            .into());
        }
        cleanup::remove_backup(self.inner.store.as_ref(), &job).await?;
        info!(job.id = %job_id, "backup deleted");
        Ok(())
    }

    // ---- maintenance ---------------------------------------------------

    pub async fn run_cleanup(&self) -> CleanupReport {
        let report = cleanup::run_cleanup(
            self.inner.store.as_ref(),
            &self.inner.registry,
            &self.inner.config.retention,
            Utc::now(),
        )
        .await;
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_cleanup(report.deleted_count, report.errors.len());
        }
        self.dispatch(Notification::CleanupFinished {
            deleted: report.deleted_count,
            errors: report.errors.len(),
        });
        report
    }

    /// Fail every `pending` or `running` job with no registry entry.
    ///
    /// Meant for engine start, before any operation has been registered.
    pub async fn reconcile_orphans(&self) -> VaultResult<Vec<JobId>> {
        let mut orphans = Vec::new();
        for status in [BackupStatus::Running, BackupStatus::Pending] {
            let jobs = self
                .inner
                .store
                .list_jobs(&BackupFilter::new().status(status))
                .await?;
            for job in jobs {
                if self.inner.registry.is_active(job.id) {
                    continue;
                }
                self.inner
                    .store
                    .transition(
                        job.id,
                        JobTransition::Fail {
                            error: ORPHAN_REASON.to_string(),
                        },
                        Utc::now(),
                    )
                    .await?;
                warn!(job.id = %job.id, status = %status, "orphaned job marked failed");
                orphans.push(job.id);
            }
        }
        Ok(orphans)
    }

    // ---- schedules -----------------------------------------------------

    pub async fn add_schedule(&self, new: NewSchedule) -> VaultResult<ScheduleDefinition> {
        new.validate()?;
        let schedule = self.inner.store.insert_schedule(new, Utc::now()).await?;
        info!(schedule.id = %schedule.id, cron = %schedule.cron.as_str(), "schedule added");
        Ok(schedule)
    }

    pub async fn update_schedule(
        &self,
        id: ScheduleId,
        update: ScheduleUpdate,
    ) -> VaultResult<ScheduleDefinition> {
        self.get_schedule(id).await?;
        self.inner.store.update_schedule(id, update, Utc::now()).await
    }

    pub async fn delete_schedule(&self, id: ScheduleId) -> VaultResult<()> {
        if !self.inner.store.delete_schedule(id).await? {
            return Err(NotFoundError::Schedule(id).into());
        }
        info!(schedule.id = %id, "schedule deleted");
        Ok(())
    }

    pub async fn get_schedule(&self, id: ScheduleId) -> VaultResult<ScheduleDefinition> {
        self.inner
            .store
            .get_schedule(id)
            .await?
            .ok_or_else(|| NotFoundError::Schedule(id).into())
    }

    pub async fn list_schedules(&self, enabled_only: bool) -> VaultResult<Vec<ScheduleDefinition>> {
        self.inner.store.list_schedules(enabled_only).await
    }

    /// Fire a schedule immediately, whatever its timer or enabled flag says.
    pub async fn run_schedule_now(&self, id: ScheduleId) -> VaultResult<Vec<JobId>> {
        let schedule = self.get_schedule(id).await?;
        self.trigger_schedule(&schedule).await
    }

    /// Start the backups a schedule describes. Incremental schedules start
    /// one pass per table; a failing table does not stop the others.
    pub async fn trigger_schedule(&self, schedule: &ScheduleDefinition) -> VaultResult<Vec<JobId>> {
        if schedule.kind != BackupKind::Incremental {
            let id = self
                .create_backup(schedule.database.clone(), schedule.kind, schedule.tables.clone())
                .await?;
            return Ok(vec![id]);
        }

        if schedule.tables.is_empty() {
            return Err(ValidationError::MissingTable("an incremental schedule").into());
        }
        let mut started = Vec::new();
        let mut first_error = None;
        for table in &schedule.tables {
            match self
                .create_backup(schedule.database.clone(), BackupKind::Incremental, vec![table.clone()])
                .await
            {
                Ok(id) => started.push(id),
                Err(e) => {
                    warn!(schedule.id = %schedule.id, table = %table, error = %e, "scheduled incremental rejected");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(err) if started.is_empty() => Err(err),
            _ => Ok(started),
        }
    }

    /// Start the schedule timers and the daily cleanup trigger.
    pub fn start_scheduler(&self) -> VaultResult<SchedulerHandle> {
        Ok(Scheduler::new(self.clone())?.start())
    }
}
