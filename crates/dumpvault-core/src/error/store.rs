//! Persisted record store errors.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    InMemory,
    Sqlite,
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackend::InMemory => f.write_str("in-memory"),
            StoreBackend::Sqlite => f.write_str("sqlite"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{backend} connection failed: {message}")]
    Connection {
        backend: StoreBackend,
        message: String,
    },

    #[error("{backend} query failed: {message}")]
    Query {
        backend: StoreBackend,
        message: String,
    },

    #[error("{backend} migration {version} failed: {message}")]
    Migration {
        backend: StoreBackend,
        version: u32,
        message: String,
    },

    #[error("corrupt {backend} record: {message}")]
    Corrupt {
        backend: StoreBackend,
        message: String,
    },

    #[error("{backend} lock poisoned")]
    LockPoisoned { backend: StoreBackend },
}
