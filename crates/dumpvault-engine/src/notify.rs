//! Human-readable notifications
//!
//! One message is sent after every terminal backup or restore transition
//! and after every cleanup pass. Delivery is best effort: the engine logs a
//! failed delivery and carries on.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use tokio::io::AsyncWriteExt;
use tracing::info;

use dumpvault_core::error::ProcessError;
use dumpvault_core::{BackupKind, DatabaseName, TableName, VaultResult};

use crate::process::{CommandSpec, ProcessRunner, check_exit, read_stderr};

const BYTE_UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];

/// `1536` → `"1.5 KB"`. Powers of 1024, at most two decimals.
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut exponent = 0;
    let mut scaled = bytes;
    while scaled >= 1024 && exponent < BYTE_UNITS.len() - 1 {
        scaled /= 1024;
        exponent += 1;
    }
    let value = bytes as f64 / 1024f64.powi(exponent as i32);
    let rounded = (value * 100.0).round() / 100.0;
    format!("{rounded} {}", BYTE_UNITS[exponent])
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    BackupCompleted {
        database: DatabaseName,
        kind: BackupKind,
        file_size: u64,
        directory: PathBuf,
        finished_at: DateTime<Utc>,
        /// Remote path when an upload succeeded.
        remote: Option<String>,
    },
    IncrementalCompleted {
        database: DatabaseName,
        table: TableName,
        rows: usize,
        file_size: u64,
        finished_at: DateTime<Utc>,
    },
    BackupFailed {
        database: DatabaseName,
        kind: BackupKind,
        error: String,
    },
    RemoteSyncFailed {
        database: DatabaseName,
        error: String,
    },
    RestoreCompleted {
        database: DatabaseName,
        tables: Vec<TableName>,
    },
    RestoreFailed {
        database: DatabaseName,
        error: String,
    },
    CleanupFinished {
        deleted: usize,
        errors: usize,
    },
}

fn local_stamp(at: &DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%d/%m/%Y %H:%M:%S").to_string()
}

impl Notification {
    pub fn message(&self) -> String {
        match self {
            Notification::BackupCompleted {
                database,
                kind,
                file_size,
                directory,
                finished_at,
                remote,
            } => {
                let mut text = format!(
                    "Backup completed: {database}\nType: {}\nSize: {}\nDate/Time: {}\nDirectory: {}",
                    kind.label(),
                    format_bytes(*file_size),
                    local_stamp(finished_at),
                    directory.display()
                );
                if let Some(remote) = remote {
                    text.push_str(&format!("\nUploaded to: {remote}"));
                }
                text
            }
            Notification::IncrementalCompleted {
                database,
                table,
                rows,
                file_size,
                finished_at,
            } => format!(
                "Incremental backup completed: {database}.{table}\nChanged rows: {rows}\nSize: {}\nDate/Time: {}",
                format_bytes(*file_size),
                local_stamp(finished_at)
            ),
            Notification::BackupFailed {
                database,
                kind,
                error,
            } => format!("Backup failed: {database} ({})\nError: {error}", kind.label()),
            Notification::RemoteSyncFailed { database, error } => format!(
                "Backup of {database} completed locally but the remote upload failed\nError: {error}"
            ),
            Notification::RestoreCompleted { database, tables } => {
                if tables.is_empty() {
                    format!("Restore completed: {database} (whole database)")
                } else {
                    let names: Vec<&str> = tables.iter().map(TableName::as_str).collect();
                    format!("Restore completed: {database} (tables: {})", names.join(", "))
                }
            }
            Notification::RestoreFailed { database, error } => {
                format!("Restore failed: {database}\nError: {error}")
            }
            Notification::CleanupFinished { deleted, errors } => {
                let mut text = format!("Retention cleanup removed {deleted} backup(s)");
                if *errors > 0 {
                    text.push_str(&format!(" with {errors} error(s)"));
                }
                text
            }
        }
    }
}

/// Delivers notification text.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> VaultResult<()>;
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: &Notification) -> VaultResult<()> {
        info!(target: "dumpvault::notify", message = %notification.message(), "notification");
        Ok(())
    }
}

/// Runs an external command with the message on its stdin.
pub struct CommandNotifier {
    runner: Arc<dyn ProcessRunner>,
    spec: CommandSpec,
    timeout: Duration,
}

impl CommandNotifier {
    pub fn new(runner: Arc<dyn ProcessRunner>, program: &str, args: &[String], timeout: Duration) -> Self {
        Self {
            runner,
            spec: CommandSpec::new(program).args(args.iter().cloned()).piped_stdin(),
            timeout,
        }
    }

    async fn deliver(&self, message: &str) -> Result<(), ProcessError> {
        let mut child = self.runner.start(&self.spec).await?;
        if let Some(mut stdin) = child.take_stdin() {
            let written = async {
                stdin.write_all(message.as_bytes()).await?;
                stdin.write_all(b"\n").await?;
                stdin.shutdown().await
            }
            .await;
            written.map_err(|e| ProcessError::Stream {
                program: self.spec.program.clone(),
                message: e.to_string(),
            })?;
        }
        let (stderr, exit) = tokio::join!(read_stderr(child.take_stderr()), child.wait());
        check_exit(&self.spec.program, exit?, &stderr)
    }
}

#[async_trait]
impl Notifier for CommandNotifier {
    async fn notify(&self, notification: &Notification) -> VaultResult<()> {
        let message = notification.message();
        match tokio::time::timeout(self.timeout, self.deliver(&message)).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(ProcessError::Stream {
                program: self.spec.program.clone(),
                message: format!("no exit within {}", humantime::format_duration(self.timeout)),
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    #[rstest]
    #[case(0, "0 Bytes")]
    #[case(512, "512 Bytes")]
    #[case(1024, "1 KB")]
    #[case(1536, "1.5 KB")]
    #[case(1_572_864, "1.5 MB")]
    #[case(5 * 1024 * 1024 * 1024, "5 GB")]
    #[case(1234, "1.21 KB")]
    fn test_format_bytes(#[case] bytes: u64, #[case] expected: &str) {
        assert_eq!(format_bytes(bytes), expected);
    }

    #[test]
    fn test_backup_message() {
        let message = Notification::BackupCompleted {
            database: DatabaseName::new_unchecked("shopdb"),
            kind: BackupKind::FullWeekly,
            file_size: 1_572_864,
            directory: PathBuf::from("/var/backups/weekly/shopdb"),
            finished_at: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            remote: Some("gdrive:weekly/shopdb/a.sql.gz".to_string()),
        }
        .message();

        assert!(message.starts_with("Backup completed: shopdb\n"));
        assert!(message.contains(BackupKind::FullWeekly.label()));
        assert!(message.contains("Size: 1.5 MB"));
        assert!(message.contains("Directory: /var/backups/weekly/shopdb"));
        assert!(message.ends_with("Uploaded to: gdrive:weekly/shopdb/a.sql.gz"));
    }

    #[test]
    fn test_restore_and_cleanup_messages() {
        let restore = Notification::RestoreCompleted {
            database: DatabaseName::new_unchecked("shopdb"),
            tables: vec![TableName::new_unchecked("orders")],
        };
        assert_eq!(restore.message(), "Restore completed: shopdb (tables: orders)");

        let cleanup = Notification::CleanupFinished { deleted: 3, errors: 1 };
        assert_eq!(cleanup.message(), "Retention cleanup removed 3 backup(s) with 1 error(s)");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_notifier_feeds_stdin() {
        let runner: Arc<dyn ProcessRunner> = Arc::new(crate::process::TokioProcessRunner::new());
        let notifier = CommandNotifier::new(runner, "cat", &[], Duration::from_secs(5));
        let result = notifier
            .notify(&Notification::CleanupFinished { deleted: 0, errors: 0 })
            .await;
        assert!(result.is_ok());
    }
}
