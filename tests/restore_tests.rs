//! Restore and Extraction Tests
//!
//! Whole-database restores stream the decompressed artifact into `mysql`;
//! selective restores feed only the extracted table blocks.

use dumpvault::{
    BackupKind, BackupStatus, OperationState, ParseError, TableName, ValidationError, VaultError,
};
use dumpvault_engine::Notification;
use dumpvault_engine::extract::{FRAGMENT_PREAMBLE, FRAGMENT_TRAILER};
use dumpvault_testing::{DumpFixture, FakeProgram, TestEnv};

fn tables(names: &[&str]) -> Vec<TableName> {
    names.iter().map(|n| TableName::new_unchecked(*n)).collect()
}

async fn completed_backup(env: &TestEnv) -> dumpvault::BackupJob {
    env.engine
        .run_backup(TestEnv::db(), BackupKind::FullManual, vec![])
        .await
        .unwrap()
}

#[tokio::test]
async fn test_whole_restore_feeds_entire_dump() {
    let env = TestEnv::new();
    let job = completed_backup(&env).await;

    let outcome = env.engine.run_restore(job.id, vec![]).await.unwrap();

    let fed = String::from_utf8(env.runner.stdin_of("mysql")).unwrap();
    assert_eq!(fed, DumpFixture::shop().render(&[]));
    assert_eq!(outcome.bytes_fed, fed.len() as u64);
    assert!(outcome.tables.is_empty());

    let mysql = &env.runner.calls_to("mysql")[0];
    assert!(mysql.args.contains(&"shopdb".to_string()));
    let status = env.engine.get_restore_status(job.id).await.unwrap();
    assert_eq!(status.state, OperationState::Completed);
    assert_eq!(status.progress, Some(100));
}

#[tokio::test]
async fn test_single_table_restore_feeds_only_that_table() {
    let env = TestEnv::new();
    let job = completed_backup(&env).await;

    let outcome = env.engine.run_restore(job.id, tables(&["orders"])).await.unwrap();

    assert_eq!(outcome.tables, vec!["orders".to_string()]);
    let fed = String::from_utf8(env.runner.stdin_of("mysql")).unwrap();
    assert!(fed.starts_with(FRAGMENT_PREAMBLE));
    assert!(fed.ends_with(FRAGMENT_TRAILER));
    assert!(fed.contains("DROP TABLE IF EXISTS `orders`;"));
    assert!(fed.contains("INSERT INTO `orders` VALUES (1,10,'19.99','2024-05-01 08:00:00')"));
    assert!(fed.contains("UNLOCK TABLES;"));
    assert!(!fed.contains("`customers`"));
    assert!(!fed.contains("`products`"));

    let scratch = env.dir.path().join("scratch");
    assert!(env.files_under(&scratch).is_empty(), "fragment not cleaned up");

    env.engine.settle().await;
    let notes = env.notifier.notifications();
    assert!(matches!(
        notes.last(),
        Some(Notification::RestoreCompleted { tables, .. }) if tables == &self::tables(&["orders"])
    ));
}

#[tokio::test]
async fn test_extract_keeps_dump_order_and_skips_unrequested() {
    let env = TestEnv::new();
    let job = completed_backup(&env).await;
    let destination = env.dir.path().join("fragment.sql");

    // Requested in reverse order; found in the order the dump holds them.
    let found = env
        .engine
        .extract_tables(job.id, &tables(&["products", "orders"]), &destination)
        .await
        .unwrap();

    assert_eq!(found, vec!["orders".to_string(), "products".to_string()]);
    let sql = std::fs::read_to_string(&destination).unwrap();
    let orders_at = sql.find("CREATE TABLE `orders`").unwrap();
    let products_at = sql.find("CREATE TABLE `products`").unwrap();
    assert!(orders_at < products_at);
    assert!(!sql.contains("`customers`"));
    assert!(!sql.contains("Dump completed"));
}

#[tokio::test]
async fn test_restore_of_unknown_tables_fails_before_mysql_runs() {
    let env = TestEnv::new();
    let job = completed_backup(&env).await;

    let err = env
        .engine
        .run_restore(job.id, tables(&["invoices"]))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        VaultError::Parse(ParseError::NoMatchingTables { .. })
    ));
    assert!(env.runner.calls_to("mysql").is_empty());
    let status = env.engine.get_restore_status(job.id).await.unwrap();
    assert_eq!(status.state, OperationState::Failed);
}

#[tokio::test]
async fn test_restore_requires_completed_backup() {
    let env = TestEnv::new();
    env.runner
        .set_program("mysqldump", FakeProgram::fails("access denied", 2));
    let _ = env
        .engine
        .run_backup(TestEnv::db(), BackupKind::FullDaily, vec![])
        .await;
    let failed = env.engine.list_backups(&Default::default()).await.unwrap()[0].clone();
    assert_eq!(failed.status, BackupStatus::Failed);

    let err = env.engine.run_restore(failed.id, vec![]).await.unwrap_err();
    assert!(matches!(
        err,
        VaultError::Validation(ValidationError::NotCompleted { .. })
    ));
}

#[tokio::test]
async fn test_restore_with_missing_artifact_is_rejected() {
    let env = TestEnv::new();
    let job = completed_backup(&env).await;
    std::fs::remove_file(&job.file_path).unwrap();

    let err = env.engine.run_restore(job.id, vec![]).await.unwrap_err();
    assert!(matches!(err, VaultError::Filesystem(_)), "{err:?}");
    assert!(!env.engine.registry().is_active(job.id));
}

#[tokio::test]
async fn test_failed_mysql_marks_restore_failed() {
    let env = TestEnv::new();
    let job = completed_backup(&env).await;
    env.runner.set_program(
        "mysql",
        FakeProgram::Sink {
            stderr: "ERROR 1045 (28000): Access denied for user".to_string(),
            code: 1,
        },
    );

    let err = env.engine.run_restore(job.id, vec![]).await.unwrap_err();
    assert!(err.to_string().contains("Access denied"), "{err}");

    let status = env.engine.get_restore_status(job.id).await.unwrap();
    assert_eq!(status.state, OperationState::Failed);
    assert!(status.error.unwrap().contains("Access denied"));
    env.engine.settle().await;
    assert!(matches!(
        env.notifier.notifications().last(),
        Some(Notification::RestoreFailed { .. })
    ));
}
