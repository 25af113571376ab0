//! Connection pool for SQLite

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::Connection;

use dumpvault_core::error::{StoreBackend, StoreError};

/// Configuration for SQLite connections
#[derive(Debug, Clone)]
pub(crate) struct ConnectionConfig {
    pub(crate) wal_mode: bool,
    pub(crate) cache_size_kb: i32,
    pub(crate) busy_timeout_ms: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            wal_mode: true,
            cache_size_kb: 8 * 1024,
            busy_timeout_ms: 5000,
        }
    }
}

/// Keeps up to `pool_size` idle connections to one database file.
///
/// Connections are checked out for the duration of a closure and handed
/// back afterwards; when none is idle a fresh one is opened.
pub struct SqlitePool {
    idle: Mutex<Vec<Connection>>,
    path: PathBuf,
    pool_size: usize,
    config: ConnectionConfig,
}

impl SqlitePool {
    pub fn new(path: impl AsRef<Path>, pool_size: usize) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Connection {
                backend: StoreBackend::Sqlite,
                message: format!("cannot create '{}': {}", parent.display(), e),
            })?;
        }

        let config = ConnectionConfig::default();
        let first = Self::create_connection(&path, &config)?;

        Ok(Self {
            idle: Mutex::new(vec![first]),
            path,
            pool_size: pool_size.max(1),
            config,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create a new SQLite connection with WAL mode and optimizations
    fn create_connection(path: &Path, config: &ConnectionConfig) -> Result<Connection, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::Connection {
            backend: StoreBackend::Sqlite,
            message: e.to_string(),
        })?;

        let cache_pragma = format!("PRAGMA cache_size = -{};", config.cache_size_kb);
        let timeout_pragma = format!("PRAGMA busy_timeout = {};", config.busy_timeout_ms);

        let mut pragmas = Vec::new();
        if config.wal_mode {
            pragmas.push("PRAGMA journal_mode = WAL;");
        }
        pragmas.push("PRAGMA synchronous = NORMAL;");
        pragmas.push(&cache_pragma);
        pragmas.push(&timeout_pragma);
        pragmas.push("PRAGMA foreign_keys = ON;");

        conn.execute_batch(&pragmas.join("\n"))
            .map_err(|e| StoreError::Connection {
                backend: StoreBackend::Sqlite,
                message: format!("Failed to configure SQLite: {}", e),
            })?;

        Ok(conn)
    }

    fn checkout(&self) -> Result<Connection, StoreError> {
        let pooled = self
            .idle
            .lock()
            .map_err(|_| StoreError::LockPoisoned {
                backend: StoreBackend::Sqlite,
            })?
            .pop();
        match pooled {
            Some(conn) => Ok(conn),
            None => Self::create_connection(&self.path, &self.config),
        }
    }

    fn checkin(&self, conn: Connection) {
        match self.idle.lock() {
            Ok(mut idle) if idle.len() < self.pool_size => idle.push(conn),
            Ok(_) => {}
            Err(_) => tracing::error!("SQLite pool lock poisoned, dropping connection"),
        }
    }

    /// Run `f` with a pooled connection.
    pub fn with_connection<T, E: From<StoreError>>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, E>,
    ) -> Result<T, E> {
        let mut conn = self.checkout()?;
        let result = f(&mut conn);
        self.checkin(conn);
        result
    }

    pub fn idle_connections(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }
}
