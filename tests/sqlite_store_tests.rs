//! SQLite-backed Engine Tests
//!
//! Job rows outlive the engine. A restart must fail jobs the previous
//! process left running, and retention must select expired rows through
//! the SQL filter exactly as it does in memory.

use std::path::Path;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};

use dumpvault::{
    BackupEngine, BackupFilter, BackupKind, BackupStatus, EngineConfig, JobStore, SqliteStore,
};
use dumpvault_core::{DatabaseName, JobTransition, NewBackupJob};
use dumpvault_engine::ORPHAN_REASON;

fn engine(dir: &Path, store: SqliteStore) -> BackupEngine {
    let mut config = EngineConfig::default();
    config.storage.backup_dir = dir.join("backups");
    config.storage.scratch_dir = Some(dir.join("scratch"));
    BackupEngine::builder(config)
        .store(Arc::new(store))
        .remote(None)
        .build()
        .unwrap()
}

fn new_job(dir: &Path, kind: BackupKind, name: &str) -> NewBackupJob {
    NewBackupJob {
        database: DatabaseName::new_unchecked("shopdb"),
        kind,
        tables: Vec::new(),
        file_path: dir.join(name),
    }
}

#[tokio::test]
async fn test_restart_fails_jobs_left_running() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("dumpvault.db");

    let (running, pending, completed) = {
        let store = SqliteStore::open(&db_path).unwrap();
        let now = Utc::now();
        let running = store
            .insert_job(new_job(dir.path(), BackupKind::FullDaily, "a.sql.gz"), now)
            .await
            .unwrap();
        store.transition(running.id, JobTransition::Start, now).await.unwrap();
        let pending = store
            .insert_job(new_job(dir.path(), BackupKind::FullManual, "b.sql.gz"), now)
            .await
            .unwrap();
        let completed = store
            .insert_job(new_job(dir.path(), BackupKind::FullWeekly, "c.sql.gz"), now)
            .await
            .unwrap();
        store.transition(completed.id, JobTransition::Start, now).await.unwrap();
        store
            .transition(completed.id, JobTransition::Complete { file_size: 10 }, now)
            .await
            .unwrap();
        (running.id, pending.id, completed.id)
    };

    // A new process opens the same database.
    let engine = engine(dir.path(), SqliteStore::open(&db_path).unwrap());
    let mut orphans = engine.reconcile_orphans().await.unwrap();
    orphans.sort();

    let mut expected = vec![running, pending];
    expected.sort();
    assert_eq!(orphans, expected);
    for id in [running, pending] {
        let job = engine.get_backup(id).await.unwrap();
        assert_eq!(job.status, BackupStatus::Failed);
        assert_eq!(job.error.as_deref(), Some(ORPHAN_REASON));
        assert!(job.completed_at.is_some());
    }
    assert_eq!(
        engine.get_backup(completed).await.unwrap().status,
        BackupStatus::Completed
    );

    // Nothing left to reconcile on the next start.
    assert!(engine.reconcile_orphans().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_retention_through_sql_filter() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(dir.path().join("dumpvault.db")).unwrap();
    let old = Utc::now() - ChronoDuration::days(45);
    let recent = Utc::now() - ChronoDuration::days(1);

    for (kind, at, name) in [
        (BackupKind::FullDaily, old, "daily_old.sql.gz"),
        (BackupKind::FullDaily, recent, "daily_new.sql.gz"),
        (BackupKind::FullWeekly, old, "weekly_old.sql.gz"),
        (BackupKind::FullManual, old, "manual_old.sql.gz"),
    ] {
        let job = store.insert_job(new_job(dir.path(), kind, name), at).await.unwrap();
        std::fs::write(&job.file_path, b"-- dump").unwrap();
        store.transition(job.id, JobTransition::Start, at).await.unwrap();
        store
            .transition(job.id, JobTransition::Complete { file_size: 7 }, at)
            .await
            .unwrap();
    }

    let engine = engine(dir.path(), store);
    let report = engine.run_cleanup().await;

    assert_eq!(report.deleted_count, 2, "{:?}", report.errors);
    let left: Vec<_> = engine
        .list_backups(&BackupFilter::new())
        .await
        .unwrap()
        .into_iter()
        .map(|job| job.file_name().map(str::to_string))
        .collect();
    assert_eq!(
        left,
        vec![
            Some("daily_new.sql.gz".to_string()),
            Some("manual_old.sql.gz".to_string())
        ]
    );
    assert!(!dir.path().join("daily_old.sql.gz").exists());
    assert!(!dir.path().join("weekly_old.sql.gz").exists());
    assert!(dir.path().join("manual_old.sql.gz").exists());
}
