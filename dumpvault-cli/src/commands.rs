//! Command dispatch
//!
//! One-shot commands build an engine over the configured SQLite store, run
//! the operation to its end and exit. Only `daemon` reconciles orphaned
//! jobs, since a one-shot command may run next to a live daemon sharing the
//! same store.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use dumpvault_core::error::{ConfigError, StoreError, ValidationError};
use dumpvault_core::identifiers::parse_tables;
use dumpvault_core::{
    BackupFilter, BackupJob, BackupKind, BackupStatus, CronExpression, DatabaseName, EngineConfig,
    JobId, NewSchedule, OperationKind, OperationState, ScheduleId, ScheduleUpdate, StatusSnapshot,
    VaultError,
};
use dumpvault_engine::BackupEngine;
use dumpvault_observability::{
    EngineMetrics, MetricsError, ObservabilityConfig, ObservabilityError, init_observability,
};
use dumpvault_store::SqliteStore;

use crate::output::Output;
use crate::shutdown::shutdown_signal;
use crate::{Cli, Commands, ScheduleCommands};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("logging setup failed: {0}")]
    Observability(#[from] ObservabilityError),

    #[error("metrics setup failed: {0}")]
    Metrics(#[from] MetricsError),

    #[error("invalid argument: {0}")]
    Argument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("output failed: {0}")]
    Output(#[from] serde_json::Error),

    /// The operation ran and ended in failure.
    #[error("{0}")]
    Failed(String),
}

pub async fn run_command(cli: Cli) -> Result<(), CliError> {
    let config = EngineConfig::load(cli.config.as_deref())?;
    init_observability(&ObservabilityConfig::from(&config.logging))?;
    let out = Output::new(cli.json);

    match cli.command {
        Commands::Daemon { metrics_file } => run_daemon(config, metrics_file).await,
        command => {
            let engine = build_engine(config, None)?;
            let result = run_one_shot(&engine, command, &out).await;
            engine.settle().await;
            result
        }
    }
}

fn build_engine(
    config: EngineConfig,
    metrics: Option<EngineMetrics>,
) -> Result<BackupEngine, CliError> {
    if let Some(parent) = config.store.path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let store = SqliteStore::with_pool_size(&config.store.path, config.store.pool_size)?;
    let mut builder = BackupEngine::builder(config).store(Arc::new(store));
    if let Some(metrics) = metrics {
        builder = builder.metrics(metrics);
    }
    Ok(builder.build()?)
}

async fn run_one_shot(engine: &BackupEngine, command: Commands, out: &Output) -> Result<(), CliError> {
    match command {
        Commands::Backup {
            database,
            kind,
            tables,
        } => {
            let kind: BackupKind = kind.parse()?;
            if !kind.is_full() {
                return Err(CliError::Argument(
                    "use the `incremental` command for incremental backups".to_string(),
                ));
            }
            let id = engine
                .create_backup(DatabaseName::required(&database)?, kind, parse_tables(&tables)?)
                .await?;
            info!(job.id = %id, "backup started");
            let job = wait_for_backup(engine, id).await?;
            finish_job(out, job)
        }
        Commands::Incremental { database, table } => {
            let id = engine
                .create_backup(
                    DatabaseName::required(&database)?,
                    BackupKind::Incremental,
                    parse_tables([table])?,
                )
                .await?;
            info!(job.id = %id, "incremental backup started");
            let job = wait_for_backup(engine, id).await?;
            finish_job(out, job)
        }
        Commands::Restore { job_id, tables } => {
            let id = JobId::new(job_id);
            engine.restore_backup(id, parse_tables(&tables)?).await?;
            let snapshot = wait_for_restore(engine, id).await?;
            out.status(&snapshot)?;
            match snapshot.state {
                OperationState::Failed => Err(CliError::Failed(
                    snapshot.error.unwrap_or_else(|| "restore failed".to_string()),
                )),
                _ => Ok(()),
            }
        }
        Commands::Extract {
            job_id,
            tables,
            output,
        } => {
            let found = engine
                .extract_tables(JobId::new(job_id), &parse_tables(&tables)?, &output)
                .await?;
            out.message(
                "extracted",
                format!("{} -> {}", found.join(", "), output.display()),
            )
        }
        Commands::List {
            database,
            kind,
            status,
            limit,
        } => {
            let mut filter = BackupFilter::new();
            filter.database = database.map(DatabaseName::parse).transpose()?;
            if let Some(kind) = kind {
                filter.kinds = vec![kind.parse()?];
            }
            filter.status = status.map(|s| s.parse::<BackupStatus>()).transpose()?;
            filter.limit = Some(limit);
            out.jobs(&engine.list_backups(&filter).await?)
        }
        Commands::Status { job_id, restore } => {
            let id = JobId::new(job_id);
            let snapshot = if restore {
                engine.get_restore_status(id).await?
            } else {
                engine.get_backup_status(id).await?
            };
            out.status(&snapshot)
        }
        Commands::Delete { job_id } => {
            let id = JobId::new(job_id);
            engine.delete_backup(id).await?;
            out.message("deleted", format!("backup {id} deleted"))
        }
        Commands::Cleanup => {
            let report = engine.run_cleanup().await;
            out.cleanup(&report)?;
            if report.errors.is_empty() {
                Ok(())
            } else {
                Err(CliError::Failed(format!(
                    "{} backup(s) could not be removed",
                    report.errors.len()
                )))
            }
        }
        Commands::Schedule { schedule_command } => {
            run_schedule_command(engine, schedule_command, out).await
        }
        Commands::Daemon { .. } => Err(CliError::Argument(
            "`daemon` cannot run inside another command".to_string(),
        )),
    }
}

fn finish_job(out: &Output, job: BackupJob) -> Result<(), CliError> {
    out.job(&job)?;
    match job.status {
        BackupStatus::Failed => Err(CliError::Failed(
            job.error.unwrap_or_else(|| "backup failed".to_string()),
        )),
        _ => Ok(()),
    }
}

async fn run_schedule_command(
    engine: &BackupEngine,
    command: ScheduleCommands,
    out: &Output,
) -> Result<(), CliError> {
    match command {
        ScheduleCommands::Add {
            database,
            kind,
            cron,
            tables,
            disabled,
        } => {
            let schedule = engine
                .add_schedule(NewSchedule {
                    database: DatabaseName::required(&database)?,
                    kind: kind.parse()?,
                    cron: CronExpression::parse(&cron)?,
                    enabled: !disabled,
                    tables: parse_tables(&tables)?,
                })
                .await?;
            out.schedule(&schedule)
        }
        ScheduleCommands::List { enabled_only } => {
            out.schedules(&engine.list_schedules(enabled_only).await?)
        }
        ScheduleCommands::Remove { id } => {
            let id = ScheduleId::new(id);
            engine.delete_schedule(id).await?;
            out.message("deleted", format!("schedule {id} removed"))
        }
        ScheduleCommands::Enable { id } => {
            let update = ScheduleUpdate {
                enabled: Some(true),
                ..ScheduleUpdate::default()
            };
            out.schedule(&engine.update_schedule(ScheduleId::new(id), update).await?)
        }
        ScheduleCommands::Disable { id } => {
            let update = ScheduleUpdate {
                enabled: Some(false),
                ..ScheduleUpdate::default()
            };
            out.schedule(&engine.update_schedule(ScheduleId::new(id), update).await?)
        }
        ScheduleCommands::Update { id, cron, tables } => {
            let update = ScheduleUpdate {
                cron: cron.map(CronExpression::parse).transpose()?,
                tables: if tables.is_empty() {
                    None
                } else {
                    Some(parse_tables(&tables)?)
                },
                ..ScheduleUpdate::default()
            };
            out.schedule(&engine.update_schedule(ScheduleId::new(id), update).await?)
        }
        ScheduleCommands::Run { id } => {
            let jobs = engine.run_schedule_now(ScheduleId::new(id)).await?;
            let mut last = Ok(());
            for id in jobs {
                let job = wait_for_backup(engine, id).await?;
                last = last.and(finish_job(out, job));
            }
            last
        }
    }
}

/// Poll until the backup is terminal; the first interrupt cancels it.
async fn wait_for_backup(engine: &BackupEngine, id: JobId) -> Result<BackupJob, CliError> {
    let interrupt = shutdown_signal();
    tokio::pin!(interrupt);
    let mut interrupted = false;
    let mut ticker = tokio::time::interval(POLL_INTERVAL);

    loop {
        tokio::select! {
            _ = &mut interrupt, if !interrupted => {
                interrupted = true;
                info!(job.id = %id, "interrupted; cancelling backup");
                match engine.cancel_backup(id).await {
                    Ok(job) => return Ok(job),
                    Err(e) => warn!(job.id = %id, error = %e, "cancellation rejected"),
                }
            }
            _ = ticker.tick() => {
                let status = engine.get_backup_status(id).await?;
                if status.state.is_terminal() {
                    return Ok(engine.get_backup(id).await?);
                }
                log_progress(&status);
            }
        }
    }
}

async fn wait_for_restore(engine: &BackupEngine, id: JobId) -> Result<StatusSnapshot, CliError> {
    let interrupt = shutdown_signal();
    tokio::pin!(interrupt);
    let mut interrupted = false;
    let mut ticker = tokio::time::interval(POLL_INTERVAL);

    loop {
        tokio::select! {
            _ = &mut interrupt, if !interrupted => {
                interrupted = true;
                info!(job.id = %id, "interrupted; cancelling restore");
                if let Err(e) = engine.cancel_restore(id).await {
                    warn!(job.id = %id, error = %e, "cancellation rejected");
                }
            }
            _ = ticker.tick() => {
                let status = engine.get_restore_status(id).await?;
                if status.state.is_terminal() {
                    return Ok(status);
                }
                log_progress(&status);
            }
        }
    }
}

fn log_progress(status: &StatusSnapshot) {
    debug!(
        job.id = %status.job_id,
        operation = %status.operation,
        progress = ?status.progress,
        bytes = status.current_bytes,
        "in progress"
    );
}

async fn run_daemon(config: EngineConfig, metrics_file: Option<PathBuf>) -> Result<(), CliError> {
    let metrics = EngineMetrics::new(&ObservabilityConfig::from(&config.logging).namespace)?;
    let refresh = config.scheduler.refresh_interval;
    let engine = build_engine(config, Some(metrics.clone()))?;

    let orphans = engine.reconcile_orphans().await?;
    if !orphans.is_empty() {
        warn!(count = orphans.len(), "failed jobs interrupted by a previous run");
    }
    let scheduler = engine.start_scheduler()?;
    info!("daemon running");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(refresh);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                if let Some(path) = &metrics_file {
                    write_metrics(&metrics, path).await;
                }
            }
        }
    }

    scheduler.stop().await;
    for (operation, jobs) in [
        (OperationKind::Backup, engine.registry().active_jobs(OperationKind::Backup)),
        (OperationKind::Restore, engine.registry().active_jobs(OperationKind::Restore)),
    ] {
        for id in jobs {
            let cancelled = match operation {
                OperationKind::Backup => engine.cancel_backup(id).await.map(|_| ()),
                OperationKind::Restore => engine.cancel_restore(id).await,
            };
            if let Err(e) = cancelled {
                warn!(job.id = %id, %operation, error = %e, "failed to cancel on shutdown");
            }
        }
    }
    engine.settle().await;
    if let Some(path) = &metrics_file {
        write_metrics(&metrics, path).await;
    }
    info!("daemon stopped");
    Ok(())
}

/// Replace `path` with the current metrics in the Prometheus text format.
async fn write_metrics(metrics: &EngineMetrics, path: &Path) {
    let rendered = match metrics.render() {
        Ok(rendered) => rendered,
        Err(e) => {
            warn!(error = %e, "failed to render metrics");
            return;
        }
    };
    let staging = path.with_extension("tmp");
    let written = async {
        tokio::fs::write(&staging, rendered).await?;
        tokio::fs::rename(&staging, path).await
    };
    if let Err(e) = written.await {
        warn!(path = %path.display(), error = %e, "failed to write metrics file");
    }
}
