//! Versioned schema for the job and schedule tables. Migrations only move
//! forward.

use rusqlite::{Connection, params};

use dumpvault_core::error::{StoreBackend, StoreError};

/// Brings a database up to the job store schema
pub struct MigrationEngine {
    migrations: Vec<Migration>,
}

/// One forward schema step
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: u32,
    pub description: String,
    pub up: String,
}

impl Default for MigrationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationEngine {
    pub fn new() -> Self {
        Self {
            migrations: Self::default_migrations(),
        }
    }

    fn default_migrations() -> Vec<Migration> {
        vec![
            Migration {
                version: 1,
                description: "Create backup_jobs table".to_string(),
                up: r#"
                    CREATE TABLE IF NOT EXISTS backup_jobs (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        database_name TEXT NOT NULL,
                        kind TEXT NOT NULL,
                        tables_json TEXT NOT NULL DEFAULT '[]',
                        file_path TEXT NOT NULL,
                        file_size INTEGER,
                        remote_path TEXT,
                        status TEXT NOT NULL,
                        error TEXT,
                        created_at TEXT NOT NULL,
                        completed_at TEXT
                    );

                    CREATE INDEX IF NOT EXISTS idx_backup_jobs_database_status
                        ON backup_jobs(database_name, status);
                    CREATE INDEX IF NOT EXISTS idx_backup_jobs_kind_completed
                        ON backup_jobs(kind, status, completed_at);
                "#
                .to_string(),
            },
            Migration {
                version: 2,
                description: "Create backup_schedules table".to_string(),
                up: r#"
                    CREATE TABLE IF NOT EXISTS backup_schedules (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        database_name TEXT NOT NULL,
                        kind TEXT NOT NULL,
                        cron_expression TEXT NOT NULL,
                        enabled INTEGER NOT NULL DEFAULT 1,
                        tables_json TEXT NOT NULL DEFAULT '[]',
                        created_at TEXT NOT NULL,
                        updated_at TEXT NOT NULL
                    );

                    CREATE INDEX IF NOT EXISTS idx_backup_schedules_enabled
                        ON backup_schedules(enabled);
                "#
                .to_string(),
            },
        ]
    }

    fn failure(version: u32, what: &str, e: rusqlite::Error) -> StoreError {
        StoreError::Migration {
            backend: StoreBackend::Sqlite,
            version,
            message: format!("{what}: {e}"),
        }
    }

    pub fn current_version(&self, conn: &Connection) -> Result<u32, StoreError> {
        conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| Self::failure(0, "Failed to read schema version", e))
    }

    pub fn latest_version(&self) -> u32 {
        self.migrations.iter().map(|m| m.version).max().unwrap_or(0)
    }

    /// Run migrations up to the specified version
    pub fn migrate(&self, conn: &Connection, target_version: Option<u32>) -> Result<(), StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            )",
            [],
        )
        .map_err(|e| Self::failure(0, "Failed to create migrations table", e))?;

        let current_version = self.current_version(conn)?;
        let target = target_version.unwrap_or_else(|| self.latest_version());

        for migration in &self.migrations {
            if migration.version > current_version && migration.version <= target {
                self.apply_migration(conn, migration)?;
                tracing::info!(
                    version = migration.version,
                    description = %migration.description,
                    "Applied store migration"
                );
            }
        }

        Ok(())
    }

    fn apply_migration(&self, conn: &Connection, migration: &Migration) -> Result<(), StoreError> {
        let version = migration.version;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Self::failure(version, "Failed to start migration transaction", e))?;

        tx.execute_batch(&migration.up)
            .map_err(|e| Self::failure(version, "Migration failed", e))?;

        tx.execute(
            "INSERT INTO schema_migrations (version, description) VALUES (?1, ?2)",
            params![migration.version, migration.description],
        )
        .map_err(|e| Self::failure(version, "Failed to record migration", e))?;

        tx.commit()
            .map_err(|e| Self::failure(version, "Failed to commit migration", e))
    }
}
