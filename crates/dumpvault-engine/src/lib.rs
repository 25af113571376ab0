//! # dumpvault engine
//!
//! Orchestrates MySQL backups and restores around external programs:
//! `mysqldump` for full dumps, the `mysql` client for incremental reads and
//! restores, `gzip` for compression and an optional `rclone` copy to remote
//! storage.
//!
//! ## Pieces
//!
//! - **[`process`]**: the [`ProcessRunner`] seam and the [`Supervisor`]
//!   that tears children down on cancellation or timeout
//! - **[`registry`]**: which jobs have a backup or restore in flight
//! - **[`extract`]**: pulls single tables out of a full dump
//! - **[`incremental`]**: changed-row passes written as `REPLACE INTO`
//! - **[`engine`]**: the [`BackupEngine`] facade tying it together
//! - **[`scheduler`]**: cron timers and the daily retention pass
//!
//! ```ignore
//! let engine = BackupEngine::builder(config)
//!     .store(Arc::new(SqliteStore::with_pool_size(&config.store.path, config.store.pool_size)?))
//!     .build()?;
//! engine.reconcile_orphans().await?;
//! let job = engine.create_backup(db, BackupKind::FullManual, vec![]).await?;
//! ```

pub mod cleanup;
pub mod commands;
pub mod engine;
pub mod extract;
mod fsutil;
mod full;
pub mod incremental;
pub mod layout;
pub mod notify;
pub mod process;
pub mod registry;
pub mod remote;
pub mod restore;
pub mod scheduler;
pub mod scratch;
pub mod source;

pub use cleanup::CleanupReport;
pub use commands::MysqlCommands;
pub use engine::{BackupEngine, BackupEngineBuilder, ORPHAN_REASON};
pub use extract::{BlockExtractor, ExtractedFragment, Extraction, TableExtractor, extract_blocks};
pub use incremental::{IncrementalPlan, NO_CHANGES_MARKER};
pub use layout::{ArtifactLayout, ArtifactPaths};
pub use notify::{CommandNotifier, Notification, Notifier, TracingNotifier, format_bytes};
pub use process::{
    CommandSpec, ExitOutcome, ProcessHandle, ProcessReader, ProcessRunner, ProcessWriter,
    Signal, Supervisor, TokioProcessRunner,
};
pub use registry::{CancelRequest, OperationRegistry, OperationTicket};
pub use remote::{RcloneSync, RemoteSync};
pub use restore::{COMPRESSED_PROGRESS_SCALE, RestoreOutcome};
pub use scheduler::{Scheduler, SchedulerHandle};
pub use source::{ColumnClass, ColumnInfo, MysqlCliSource, Row, SourceDatabase};
