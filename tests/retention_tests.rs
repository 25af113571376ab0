//! Retention Cleanup Tests
//!
//! Completed daily, weekly and monthly backups expire after their window;
//! manual and incremental backups and unfinished jobs are kept forever.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rstest::rstest;

use dumpvault::{BackupKind, BackupStatus, JobId, JobStore};
use dumpvault_core::{JobTransition, NewBackupJob};
use dumpvault_testing::{FakeProgram, TestEnv};

/// Insert a job finished `age_days` ago, with an artifact on disk.
async fn aged_job(env: &TestEnv, kind: BackupKind, age_days: i64, status: BackupStatus) -> (JobId, PathBuf) {
    let at: DateTime<Utc> = Utc::now() - ChronoDuration::days(age_days);
    let folder = env.backup_dir().join(kind.folder()).join("shopdb");
    std::fs::create_dir_all(&folder).unwrap();
    let path = folder.join(format!("shopdb_{}_{age_days}d.sql.gz", kind.folder()));
    std::fs::write(&path, b"-- dump").unwrap();

    let job = env
        .store
        .insert_job(
            NewBackupJob {
                database: TestEnv::db(),
                kind,
                tables: Vec::new(),
                file_path: path.clone(),
            },
            at,
        )
        .await
        .unwrap();
    env.store.transition(job.id, JobTransition::Start, at).await.unwrap();
    let end = match status {
        BackupStatus::Completed => JobTransition::Complete { file_size: 7 },
        BackupStatus::Failed => JobTransition::Fail {
            error: "mysqldump exited with status 2".to_string(),
        },
        BackupStatus::Running => return (job.id, path),
        BackupStatus::Pending => unreachable!("aged jobs are at least started"),
    };
    env.store.transition(job.id, end, at).await.unwrap();
    (job.id, path)
}

async fn exists(env: &TestEnv, id: JobId) -> bool {
    env.store.get_job(id).await.unwrap().is_some()
}

#[rstest]
#[case::daily_past_window(BackupKind::FullDaily, 10, true)]
#[case::daily_within_window(BackupKind::FullDaily, 2, false)]
#[case::weekly_past_window(BackupKind::FullWeekly, 40, true)]
#[case::weekly_within_window(BackupKind::FullWeekly, 20, false)]
#[case::monthly_past_window(BackupKind::FullMonthly, 400, true)]
#[case::monthly_within_window(BackupKind::FullMonthly, 200, false)]
#[case::manual_never_expires(BackupKind::FullManual, 1000, false)]
#[case::incremental_never_expires(BackupKind::Incremental, 1000, false)]
#[tokio::test]
async fn test_default_windows(#[case] kind: BackupKind, #[case] age_days: i64, #[case] removed: bool) {
    let env = TestEnv::new();
    let (id, path) = aged_job(&env, kind, age_days, BackupStatus::Completed).await;

    let report = env.engine.run_cleanup().await;

    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.deleted_count, usize::from(removed));
    assert_eq!(exists(&env, id).await, !removed);
    assert_eq!(path.exists(), !removed);
}

#[tokio::test]
async fn test_unfinished_and_failed_jobs_are_kept() {
    let env = TestEnv::new();
    let (failed, failed_path) = aged_job(&env, BackupKind::FullDaily, 30, BackupStatus::Failed).await;
    let (running, _) = aged_job(&env, BackupKind::FullDaily, 30, BackupStatus::Running).await;

    let report = env.engine.run_cleanup().await;

    assert_eq!(report.deleted_count, 0);
    assert!(exists(&env, failed).await && exists(&env, running).await);
    assert!(failed_path.exists());
}

#[tokio::test]
async fn test_custom_window_applies() {
    let env = TestEnv::builder()
        .configure(|config| config.retention.daily = Some(Duration::from_secs(86_400)))
        .build();
    let (expired, _) = aged_job(&env, BackupKind::FullDaily, 2, BackupStatus::Completed).await;

    let report = env.engine.run_cleanup().await;

    assert_eq!(report.deleted_count, 1);
    assert!(!exists(&env, expired).await);
}

#[tokio::test]
async fn test_backup_being_restored_is_skipped() {
    let env = TestEnv::new();
    let (id, path) = aged_job(&env, BackupKind::FullDaily, 30, BackupStatus::Completed).await;
    env.runner.set_program("mysql", FakeProgram::hang(Vec::new()));
    env.engine.restore_backup(id, vec![]).await.unwrap();
    env.wait_for_child(id, dumpvault::OperationKind::Restore).await;

    let report = env.engine.run_cleanup().await;
    assert_eq!(report.deleted_count, 0);
    assert!(path.exists());

    env.engine.cancel_restore(id).await.unwrap();
    let report = env.engine.run_cleanup().await;
    assert_eq!(report.deleted_count, 1);
    assert!(!path.exists());
}

#[tokio::test]
async fn test_missing_artifact_does_not_block_row_removal() {
    let env = TestEnv::new();
    let (id, path) = aged_job(&env, BackupKind::FullWeekly, 60, BackupStatus::Completed).await;
    std::fs::remove_file(&path).unwrap();

    let report = env.engine.run_cleanup().await;

    assert_eq!(report.deleted_count, 1);
    assert!(report.errors.is_empty());
    assert!(!exists(&env, id).await);
}
