use std::io::ErrorKind;
use std::path::Path;

use tracing::debug;

use dumpvault_core::VaultResult;
use dumpvault_core::error::{FilesystemError, FsOperation};

pub(crate) async fn ensure_dir(path: &Path) -> VaultResult<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| FilesystemError::io(FsOperation::CreateDir, path, &e).into())
}

pub(crate) async fn file_len(path: &Path) -> VaultResult<u64> {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.len())
        .map_err(|e| FilesystemError::io(FsOperation::Metadata, path, &e).into())
}

/// Size of a finished artifact; a missing file is [`FilesystemError::ArtifactMissing`].
pub(crate) async fn artifact_len(path: &Path) -> VaultResult<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(FilesystemError::ArtifactMissing {
            path: path.to_path_buf(),
        }
        .into()),
        Err(e) => Err(FilesystemError::io(FsOperation::Metadata, path, &e).into()),
    }
}

pub(crate) async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Remove `path`, treating a missing file as success. Returns whether a file
/// was removed.
pub(crate) async fn remove_if_exists(path: &Path) -> VaultResult<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(FilesystemError::io(FsOperation::Remove, path, &e).into()),
    }
}

/// Best-effort removal of partial output after an abort.
pub(crate) async fn discard(paths: &[&Path]) {
    for path in paths {
        match remove_if_exists(path).await {
            Ok(true) => debug!(path = %path.display(), "partial output removed"),
            Ok(false) => {}
            Err(e) => debug!(path = %path.display(), error = %e, "partial output left behind"),
        }
    }
}
