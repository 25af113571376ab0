//! Incremental Backup Tests
//!
//! Changed rows are written as `REPLACE INTO` statements relative to the
//! latest completed backup of the database. Replaying an artifact must be
//! idempotent, which is checked here against a real SQL engine.

use chrono::{Duration as ChronoDuration, Utc};
use rusqlite::Connection;

use dumpvault::{
    BackupKind, BackupStatus, NotFoundError, TableName, ValidationError, VaultError,
};
use dumpvault_engine::{ColumnInfo, NO_CHANGES_MARKER, Notification};
use dumpvault_testing::TestEnv;

fn orders_columns() -> Vec<ColumnInfo> {
    vec![
        ColumnInfo::new("id", "int", "int"),
        ColumnInfo::new("customer_id", "int", "int"),
        ColumnInfo::new("total", "decimal", "decimal(10,2)"),
        ColumnInfo::new("note", "varchar", "varchar(64)"),
        ColumnInfo::new("updated_at", "timestamp", "timestamp"),
    ]
}

fn orders() -> TableName {
    TableName::new_unchecked("orders")
}

/// Environment with a completed full backup as baseline and an `orders`
/// table in the source.
async fn env_with_baseline() -> TestEnv {
    let env = TestEnv::new();
    env.engine
        .run_backup(TestEnv::db(), BackupKind::FullDaily, vec![])
        .await
        .unwrap();
    env.source.define_table("shopdb", "orders", orders_columns());
    env
}

/// Execute an incremental artifact the way `mysql` would, minus the
/// `USE` statement and comments SQLite does not understand.
fn replay(conn: &Connection, sql: &str) {
    let statements: Vec<&str> = sql
        .lines()
        .filter(|line| !line.starts_with("--") && !line.starts_with("USE "))
        .collect();
    conn.execute_batch(&statements.join("\n")).unwrap();
}

fn table_rows(conn: &Connection) -> Vec<(i64, i64, f64, Option<String>, String)> {
    let mut stmt = conn
        .prepare("SELECT id, customer_id, total, note, updated_at FROM orders ORDER BY id")
        .unwrap();
    stmt.query_map([], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
    })
    .unwrap()
    .collect::<Result<_, _>>()
    .unwrap()
}

#[tokio::test]
async fn test_incremental_replay_is_idempotent() {
    let env = env_with_baseline().await;
    let now = Utc::now() + ChronoDuration::seconds(1);
    env.source.upsert(
        "shopdb",
        "orders",
        &[Some("1"), Some("10"), Some("19.99"), Some("O'Brien; rush"), Some("2024-05-02 10:00:00")],
        now,
    );
    env.source.upsert(
        "shopdb",
        "orders",
        &[Some("2"), Some("11"), Some("5.00"), None, Some("2024-05-02 11:00:00")],
        now,
    );

    let job = env.engine.run_incremental(TestEnv::db(), orders()).await.unwrap();
    assert_eq!(job.kind, BackupKind::Incremental);
    assert_eq!(job.tables, vec![orders()]);
    let name = job.file_name().unwrap();
    assert!(name.starts_with("orders_") && name.ends_with("_incremental.sql.gz"), "{name}");
    assert!(job.file_path.starts_with(env.backup_dir().join("incremental").join("shopdb")));

    let sql = std::fs::read_to_string(&job.file_path).unwrap();
    assert!(sql.contains("-- Rows: 2"));
    assert!(sql.contains("USE `shopdb`;"));
    assert!(sql.contains("REPLACE INTO `orders`"));
    assert!(sql.contains("'O''Brien; rush'"));

    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE orders (id INTEGER PRIMARY KEY, customer_id INTEGER, total REAL, note TEXT, updated_at TEXT);
         INSERT INTO orders VALUES (1, 10, 1.00, 'stale', '2024-05-01 08:00:00');",
    )
    .unwrap();

    replay(&conn, &sql);
    let once = table_rows(&conn);
    replay(&conn, &sql);
    let twice = table_rows(&conn);

    assert_eq!(once, twice);
    assert_eq!(
        once,
        vec![
            (1, 10, 19.99, Some("O'Brien; rush".to_string()), "2024-05-02 10:00:00".to_string()),
            (2, 11, 5.0, None, "2024-05-02 11:00:00".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_second_pass_without_changes_writes_marker() {
    let env = env_with_baseline().await;
    env.source.upsert(
        "shopdb",
        "orders",
        &[Some("1"), Some("10"), Some("19.99"), None, Some("2024-05-02 10:00:00")],
        Utc::now(),
    );
    let first = env.engine.run_incremental(TestEnv::db(), orders()).await.unwrap();
    assert!(!std::fs::read_to_string(&first.file_path).unwrap().contains(NO_CHANGES_MARKER));

    // The first pass is now the baseline and the row predates it.
    let second = env.engine.run_incremental(TestEnv::db(), orders()).await.unwrap();

    assert_ne!(first.file_path, second.file_path);
    let sql = std::fs::read_to_string(&second.file_path).unwrap();
    assert!(sql.contains("-- Rows: 0"));
    assert!(sql.contains(NO_CHANGES_MARKER));
    assert!(!sql.contains("REPLACE INTO"));
    assert_eq!(second.status, BackupStatus::Completed);

    env.engine.settle().await;
    let rows: Vec<usize> = env
        .notifier
        .notifications()
        .into_iter()
        .filter_map(|n| match n {
            Notification::IncrementalCompleted { rows, .. } => Some(rows),
            _ => None,
        })
        .collect();
    assert_eq!(rows, vec![1, 0]);
}

#[tokio::test]
async fn test_incremental_needs_a_baseline() {
    let env = TestEnv::new();
    env.source.define_table("shopdb", "orders", orders_columns());

    let err = env
        .engine
        .run_incremental(TestEnv::db(), orders())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        VaultError::Validation(ValidationError::NoBaseline { .. })
    ));
    assert!(env.engine.list_backups(&Default::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_incremental_checks_table_and_change_column() {
    let env = env_with_baseline().await;

    let missing = env
        .engine
        .run_incremental(TestEnv::db(), TableName::new_unchecked("ghosts"))
        .await
        .unwrap_err();
    assert!(matches!(
        missing,
        VaultError::NotFound(NotFoundError::Table { .. })
    ));

    env.source.define_table(
        "shopdb",
        "customers",
        vec![
            ColumnInfo::new("id", "int", "int"),
            ColumnInfo::new("name", "varchar", "varchar(64)"),
        ],
    );
    let untracked = env
        .engine
        .run_incremental(TestEnv::db(), TableName::new_unchecked("customers"))
        .await
        .unwrap_err();
    assert!(matches!(
        untracked,
        VaultError::NotFound(NotFoundError::Column { .. })
    ));

    // Only the baseline full backup exists.
    assert_eq!(env.engine.list_backups(&Default::default()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_incremental_never_uploads() {
    let env = TestEnv::builder().with_remote().build();
    env.engine
        .run_backup(TestEnv::db(), BackupKind::FullManual, vec![])
        .await
        .unwrap();
    env.source.define_table("shopdb", "orders", orders_columns());
    env.engine.settle().await;
    let uploads_before = env.runner.calls_to("rclone").len();

    env.engine.run_incremental(TestEnv::db(), orders()).await.unwrap();
    env.engine.settle().await;

    assert_eq!(env.runner.calls_to("rclone").len(), uploads_before);
}
