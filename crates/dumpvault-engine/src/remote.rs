//! Remote copies of completed artifacts.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use dumpvault_core::VaultResult;
use dumpvault_core::config::RemoteConfig;

use crate::process::{CommandSpec, ProcessRunner, Supervisor};

/// Copies an artifact to remote storage.
#[async_trait]
pub trait RemoteSync: Send + Sync {
    /// Copy `local` to the remote path `destination`.
    async fn upload(&self, local: &Path, destination: &str) -> VaultResult<()>;

    /// Base every destination is built under.
    fn base(&self) -> &str;

    /// Whether the local artifact is removed after a successful upload.
    fn delete_after_upload(&self) -> bool {
        false
    }
}

/// [`RemoteSync`] through an `rclone` compatible program
/// (`<program> copyto <local> <remote> [extra args]`).
pub struct RcloneSync {
    runner: Arc<dyn ProcessRunner>,
    program: String,
    config: RemoteConfig,
    base: String,
    grace: Duration,
}

impl RcloneSync {
    /// `None` when `config` names no remote base.
    pub fn from_config(
        runner: Arc<dyn ProcessRunner>,
        program: impl Into<String>,
        config: &RemoteConfig,
        grace: Duration,
    ) -> Option<Self> {
        let base = config.base.as_ref()?.trim().to_string();
        if base.is_empty() {
            return None;
        }
        Some(Self {
            runner,
            program: program.into(),
            config: config.clone(),
            base,
            grace,
        })
    }

    pub fn command(&self, local: &Path, destination: &str) -> CommandSpec {
        CommandSpec::new(&self.program)
            .arg("copyto")
            .arg(local.to_string_lossy())
            .arg(destination)
            .args(self.config.extra_args.iter().cloned())
    }
}

#[async_trait]
impl RemoteSync for RcloneSync {
    async fn upload(&self, local: &Path, destination: &str) -> VaultResult<()> {
        let spec = self.command(local, destination);
        Supervisor::new(self.runner.as_ref(), self.grace)
            .run(&spec)
            .await?;
        info!(local = %local.display(), remote = %destination, "artifact uploaded");
        Ok(())
    }

    fn base(&self) -> &str {
        &self.base
    }

    fn delete_after_upload(&self) -> bool {
        self.config.delete_after_upload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::TokioProcessRunner;

    fn runner() -> Arc<dyn ProcessRunner> {
        Arc::new(TokioProcessRunner::new())
    }

    #[test]
    fn test_unconfigured_remote_is_none() {
        let grace = Duration::from_secs(1);
        assert!(RcloneSync::from_config(runner(), "rclone", &RemoteConfig::default(), grace).is_none());

        let blank = RemoteConfig {
            base: Some("  ".to_string()),
            ..RemoteConfig::default()
        };
        assert!(RcloneSync::from_config(runner(), "rclone", &blank, grace).is_none());
    }

    #[test]
    fn test_copyto_command() {
        let config = RemoteConfig {
            base: Some("gdrive:backups".to_string()),
            delete_after_upload: true,
            extra_args: vec!["--retries".to_string(), "3".to_string()],
        };
        let sync = RcloneSync::from_config(runner(), "rclone", &config, Duration::from_secs(1)).unwrap();
        let spec = sync.command(Path::new("/b/a.sql.gz"), "gdrive:backups/daily/shop/a.sql.gz");

        assert_eq!(spec.program, "rclone");
        assert_eq!(
            spec.args,
            ["copyto", "/b/a.sql.gz", "gdrive:backups/daily/shop/a.sql.gz", "--retries", "3"]
        );
        assert_eq!(sync.base(), "gdrive:backups");
        assert!(sync.delete_after_upload());
    }
}
