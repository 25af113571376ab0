//! # dumpvault
//!
//! dumpvault orchestrates MySQL backups and restores around the standard
//! client tools. It takes full and per-table incremental backups, restores
//! whole databases or selected tables, applies retention windows and fires
//! backups from cron schedules, while reporting progress for every
//! operation in flight.
//!
//! ## Core Components
//!
//! - **[`BackupEngine`]**: the facade every operation goes through
//! - **[`JobStore`], [`ScheduleStore`]**: persisted backup jobs and schedules,
//!   with [`SqliteStore`] and [`InMemoryStore`] implementations
//! - **[`ProcessRunner`]**: the seam to `mysqldump`, `mysql`, `gzip` and
//!   `rclone`
//! - **[`OperationRegistry`]**: live status and cancellation of running work
//! - **[`EngineConfig`]**: TOML configuration with `DUMPVAULT_*` overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dumpvault::{BackupEngine, BackupKind, DatabaseName, EngineConfig, SqliteStore};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::load(None)?;
//! let store = SqliteStore::with_pool_size(&config.store.path, config.store.pool_size)?;
//! let engine = BackupEngine::builder(config).store(Arc::new(store)).build()?;
//!
//! engine.reconcile_orphans().await?;
//! let job = engine
//!     .run_backup(DatabaseName::parse("shopdb")?, BackupKind::FullManual, vec![])
//!     .await?;
//! println!("{} bytes at {}", job.file_size.unwrap_or(0), job.file_path.display());
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Module aliases for namespaced access
// ============================================================================

pub use dumpvault_core as core;
pub use dumpvault_engine as engine;
pub use dumpvault_observability as observability;
pub use dumpvault_store as store;

// ============================================================================
// Domain types
// ============================================================================

pub use dumpvault_core::config::EngineConfig;
pub use dumpvault_core::error::{
    ConfigError, ConflictError, FilesystemError, NotFoundError, ParseError, ProcessError,
    StoreError, ValidationError,
};
pub use dumpvault_core::{
    BackupFilter, BackupJob, BackupKind, BackupStatus, CronExpression, DatabaseName, JobId,
    NewSchedule, OperationKind, OperationState, ScheduleDefinition, ScheduleId, ScheduleUpdate,
    StatusSnapshot, TableName, VaultError, VaultResult,
};

// ============================================================================
// Engine
// ============================================================================

pub use dumpvault_engine::{
    BackupEngine, BackupEngineBuilder, CleanupReport, Notification, Notifier, OperationRegistry,
    ProcessRunner, RemoteSync, RestoreOutcome, SchedulerHandle, SourceDatabase,
};

// ============================================================================
// Storage and observability
// ============================================================================

pub use dumpvault_observability::{EngineMetrics, ObservabilityConfig, init_observability};
pub use dumpvault_store::{BackupStore, InMemoryStore, JobStore, ScheduleStore, SqliteStore};
