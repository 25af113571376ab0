//! Filesystem errors around the backup tree and scratch files.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsOperation {
    CreateDir,
    Create,
    Read,
    Write,
    Remove,
    Metadata,
}

impl fmt::Display for FsOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FsOperation::CreateDir => "create directory",
            FsOperation::Create => "create",
            FsOperation::Read => "read",
            FsOperation::Write => "write",
            FsOperation::Remove => "remove",
            FsOperation::Metadata => "stat",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilesystemError {
    #[error("failed to {operation} '{shown}': {message}", shown = .path.display())]
    Io {
        operation: FsOperation,
        path: PathBuf,
        message: String,
    },

    #[error("artifact '{shown}' not found", shown = .path.display())]
    ArtifactMissing { path: PathBuf },

    #[error("dump '{shown}' is empty", shown = .path.display())]
    EmptyDump { path: PathBuf },
}

impl FilesystemError {
    pub fn io(operation: FsOperation, path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        FilesystemError::Io {
            operation,
            path: path.into(),
            message: err.to_string(),
        }
    }
}
