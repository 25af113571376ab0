//! Retention cleanup
//!
//! Deletes completed backups older than their kind's retention window.
//! Manual and incremental backups are never touched, whatever their age, and
//! neither are jobs that did not complete.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use dumpvault_core::config::RetentionConfig;
use dumpvault_core::{BackupFilter, BackupJob, BackupKind, BackupStatus, VaultResult};
use dumpvault_store::BackupStore;

use crate::fsutil::remove_if_exists;
use crate::layout::dump_path_for;
use crate::registry::OperationRegistry;

/// Result of one cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub deleted_count: usize,
    pub errors: Vec<String>,
}

/// Filters selecting the expired jobs of every retention-managed kind with a
/// configured window.
pub fn expired_filters(
    retention: &RetentionConfig,
    now: DateTime<Utc>,
) -> Result<Vec<(BackupKind, BackupFilter)>, String> {
    let mut filters = Vec::new();
    for kind in BackupKind::ALL {
        if !kind.is_retention_managed() {
            continue;
        }
        let Some(window) = retention.window(kind) else {
            continue;
        };
        let window = chrono::Duration::from_std(window)
            .map_err(|e| format!("retention window for {kind} is out of range: {e}"))?;
        let cutoff = now - window;
        filters.push((
            kind,
            BackupFilter::new()
                .kind(kind)
                .status(BackupStatus::Completed)
                .completed_before(cutoff),
        ));
    }
    Ok(filters)
}

/// Remove a backup's files and its row. Missing files are fine.
pub(crate) async fn remove_backup(store: &dyn BackupStore, job: &BackupJob) -> VaultResult<()> {
    remove_if_exists(&job.file_path).await?;
    let dump = dump_path_for(&job.file_path);
    if dump != job.file_path {
        remove_if_exists(&dump).await?;
    }
    store.delete_job(job.id).await?;
    debug!(job.id = %job.id, path = %job.file_path.display(), "backup removed");
    Ok(())
}

pub(crate) async fn run_cleanup(
    store: &dyn BackupStore,
    registry: &OperationRegistry,
    retention: &RetentionConfig,
    now: DateTime<Utc>,
) -> CleanupReport {
    let mut report = CleanupReport::default();

    let filters = match expired_filters(retention, now) {
        Ok(filters) => filters,
        Err(e) => {
            report.errors.push(e);
            return report;
        }
    };

    for (kind, filter) in filters {
        let jobs = match store.list_jobs(&filter).await {
            Ok(jobs) => jobs,
            Err(e) => {
                report.errors.push(format!("listing {kind} backups: {e}"));
                continue;
            }
        };

        for job in jobs {
            if registry.is_active(job.id) {
                debug!(job.id = %job.id, "skipping backup with an active operation");
                continue;
            }
            match remove_backup(store, &job).await {
                Ok(()) => report.deleted_count += 1,
                Err(e) => {
                    warn!(job.id = %job.id, error = %e, "failed to remove expired backup");
                    report.errors.push(format!("job {}: {e}", job.id));
                }
            }
        }
    }

    info!(
        deleted = report.deleted_count,
        errors = report.errors.len(),
        "retention cleanup finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use dumpvault_core::{DatabaseName, JobTransition, NewBackupJob};
    use dumpvault_store::{InMemoryStore, JobStore};
    use std::time::Duration;

    fn retention() -> RetentionConfig {
        RetentionConfig {
            daily: Some(Duration::from_secs(7 * 86_400)),
            weekly: None,
            monthly: Some(Duration::from_secs(365 * 86_400)),
        }
    }

    async fn completed(
        store: &InMemoryStore,
        dir: &std::path::Path,
        kind: BackupKind,
        at: DateTime<Utc>,
    ) -> BackupJob {
        let path = dir.join(format!("{}_{}.sql.gz", kind.folder(), at.timestamp()));
        std::fs::write(&path, b"gz").unwrap();
        let job = store
            .insert_job(
                NewBackupJob {
                    database: DatabaseName::new_unchecked("shopdb"),
                    kind,
                    tables: Vec::new(),
                    file_path: path,
                },
                at,
            )
            .await
            .unwrap();
        store.transition(job.id, JobTransition::Start, at).await.unwrap();
        store
            .transition(job.id, JobTransition::Complete { file_size: 2 }, at)
            .await
            .unwrap()
    }

    #[test]
    fn test_filters_skip_unmanaged_kinds() {
        let now = Utc::now();
        let filters = expired_filters(&retention(), now).unwrap();
        let kinds: Vec<BackupKind> = filters.iter().map(|(k, _)| *k).collect();
        assert_eq!(kinds, vec![BackupKind::FullDaily, BackupKind::FullMonthly]);
        assert_eq!(
            filters[0].1.completed_before,
            Some(now - chrono::Duration::days(7))
        );
    }

    #[tokio::test]
    async fn test_only_expired_managed_backups_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let store = InMemoryStore::new();
        let now = Utc::now();
        let old = now - chrono::Duration::days(30);

        let expired = completed(&store, dir.path(), BackupKind::FullDaily, old).await;
        let fresh = completed(&store, dir.path(), BackupKind::FullDaily, now).await;
        let manual = completed(&store, dir.path(), BackupKind::FullManual, old).await;
        let incremental = completed(&store, dir.path(), BackupKind::Incremental, old).await;

        let registry = OperationRegistry::new(Duration::ZERO);
        let report = run_cleanup(&store, &registry, &retention(), now).await;

        assert_eq!(report.deleted_count, 1);
        assert!(report.errors.is_empty());
        assert!(store.get_job(expired.id).await.unwrap().is_none());
        assert!(!expired.file_path.exists());
        for kept in [fresh, manual, incremental] {
            assert!(store.get_job(kept.id).await.unwrap().is_some());
            assert!(kept.file_path.exists());
        }
    }

    #[tokio::test]
    async fn test_missing_artifact_still_removes_row() {
        let dir = tempfile::tempdir().unwrap();
        let store = InMemoryStore::new();
        let old = Utc::now() - chrono::Duration::days(30);
        let job = completed(&store, dir.path(), BackupKind::FullDaily, old).await;
        std::fs::remove_file(&job.file_path).unwrap();

        let registry = OperationRegistry::new(Duration::ZERO);
        let report = run_cleanup(&store, &registry, &retention(), Utc::now()).await;
        assert_eq!(report.deleted_count, 1);
    }
}
