//! Backup tree layout
//!
//! Artifacts live under `<backup_dir>/<kind folder>/<database folder>/`.
//! Full dumps are named `<database>_<YYYY-MM-DD_HHMMSS>.sql.gz`, incremental
//! passes `<table>_<YYYY-MM-DD_HHMMSS>_incremental.sql.gz`. Each artifact is
//! first written uncompressed next to its final location.

use std::fmt::Display;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};

use dumpvault_core::config::StorageConfig;
use dumpvault_core::{BackupKind, DatabaseName};

pub const ARTIFACT_EXTENSION: &str = ".sql.gz";
const DUMP_EXTENSION: &str = ".sql";
const INCREMENTAL_SUFFIX: &str = "_incremental";

/// Where one backup writes its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub directory: PathBuf,
    /// Uncompressed dump, removed by the compressor on success.
    pub dump: PathBuf,
    /// Final compressed artifact.
    pub artifact: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    storage: StorageConfig,
}

impl ArtifactLayout {
    pub fn new(storage: &StorageConfig) -> Self {
        Self {
            storage: storage.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.storage.backup_dir
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.storage.scratch_dir()
    }

    pub fn database_folder<'a>(&'a self, database: &'a DatabaseName) -> &'a str {
        self.storage.folder_for(database)
    }

    pub fn directory(&self, kind: BackupKind, database: &DatabaseName) -> PathBuf {
        self.root()
            .join(kind.folder())
            .join(self.database_folder(database))
    }

    /// Paths for an artifact named after `stem` (the database for full
    /// backups, the table for incremental ones). `attempt` disambiguates
    /// artifacts created within the same second.
    pub fn paths<Tz>(
        &self,
        kind: BackupKind,
        database: &DatabaseName,
        stem: &str,
        at: &DateTime<Tz>,
        attempt: u32,
    ) -> ArtifactPaths
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        let mut base = format!("{stem}_{}", artifact_stamp(at));
        if attempt > 0 {
            base.push_str(&format!("-{attempt}"));
        }
        if kind == BackupKind::Incremental {
            base.push_str(INCREMENTAL_SUFFIX);
        }

        let directory = self.directory(kind, database);
        ArtifactPaths {
            dump: directory.join(format!("{base}{DUMP_EXTENSION}")),
            artifact: directory.join(format!("{base}{ARTIFACT_EXTENSION}")),
            directory,
        }
    }
}

/// `YYYY-MM-DD_HHMMSS` in the given zone.
pub fn artifact_stamp<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    at.format("%Y-%m-%d_%H%M%S").to_string()
}

/// Uncompressed sibling of a `.gz` artifact. Paths without the suffix are
/// returned unchanged.
pub fn dump_path_for(artifact: &Path) -> PathBuf {
    match artifact.to_str().and_then(|s| s.strip_suffix(".gz")) {
        Some(stripped) => PathBuf::from(stripped),
        None => artifact.to_path_buf(),
    }
}

pub fn is_compressed(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

/// Remote destination for an uploaded artifact:
/// `<base>/<kind folder>/<database folder>/<file>`. No separator is added
/// after a base ending in `:` or `/`.
pub fn remote_destination(base: &str, kind: BackupKind, db_folder: &str, file_name: &str) -> String {
    let base = base.trim();
    let separator = if base.ends_with(':') || base.ends_with('/') {
        ""
    } else {
        "/"
    };
    format!("{base}{separator}{}/{db_folder}/{file_name}", kind.folder())
}
