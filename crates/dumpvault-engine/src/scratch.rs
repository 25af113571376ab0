use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// A temporary file in the scratch directory, deleted on drop unless
/// persisted.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    keep: bool,
}

impl ScratchFile {
    /// Reserve a unique name `<prefix>_<pid>_<millis>_<seq>.<extension>` in
    /// `dir`. The file itself is created by whoever writes it.
    pub fn new(dir: &Path, prefix: &str, extension: &str) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let name = format!("{prefix}_{}_{millis}_{seq}.{extension}", std::process::id());
        Self {
            path: dir.join(name),
            keep: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the file and hand back its path.
    pub fn persist(mut self) -> PathBuf {
        self.keep = true;
        std::mem::take(&mut self.path)
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "scratch file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => debug!(path = %self.path.display(), error = %e, "scratch file left behind"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_unique() {
        let dir = Path::new("/tmp");
        let a = ScratchFile::new(dir, "restore", "sql");
        let b = ScratchFile::new(dir, "restore", "sql");
        assert_ne!(a.path(), b.path());
        assert!(a.path().to_string_lossy().ends_with(".sql"));
    }

    #[test]
    fn test_drop_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchFile::new(dir.path(), "x", "sql");
        std::fs::write(scratch.path(), b"SELECT 1;").unwrap();
        let path = scratch.path().to_path_buf();
        drop(scratch);
        assert!(!path.exists());
    }

    #[test]
    fn test_persist_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchFile::new(dir.path(), "x", "sql");
        std::fs::write(scratch.path(), b"SELECT 1;").unwrap();
        let path = scratch.persist();
        assert!(path.exists());
    }
}
