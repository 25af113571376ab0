//! # dumpvault core
//!
//! Domain types shared by every dumpvault crate: backup jobs and their
//! lifecycle, schedule definitions, validated identifiers, the error
//! taxonomy and the engine configuration.

pub mod config;
pub mod cron_expr;
pub mod error;
pub mod identifiers;
pub mod model;
pub mod status;

pub use config::EngineConfig;
pub use cron_expr::CronExpression;
pub use error::{VaultError, VaultResult};
pub use identifiers::{DatabaseName, JobId, ScheduleId, TableName};
pub use model::{
    BackupFilter, BackupJob, BackupKind, BackupStatus, JobTransition, NewBackupJob, NewSchedule,
    ScheduleDefinition, ScheduleUpdate,
};
pub use status::{OperationKind, OperationState, StatusSnapshot};
