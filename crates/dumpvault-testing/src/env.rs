//! # Test environment
//!
//! [`TestEnv`] wires a [`BackupEngine`] to the in-memory store, the scripted
//! runner, the in-memory source and a recording notifier, rooted in a fresh
//! temporary directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use dumpvault_core::config::EngineConfig;
use dumpvault_core::{BackupJob, DatabaseName, JobId, OperationKind, StatusSnapshot};
use dumpvault_engine::BackupEngine;
use dumpvault_store::{InMemoryStore, JobStore};

use crate::fixtures::DumpFixture;
use crate::notifier::RecordingNotifier;
use crate::runner::{FakeProcessRunner, FakeProgram};
use crate::source::InMemorySource;

/// Remote base configured when uploads are enabled.
pub const REMOTE_BASE: &str = "vault:backups";

type ConfigHook = Box<dyn FnOnce(&mut EngineConfig)>;

/// Builder for [`TestEnv`]
pub struct TestEnvBuilder {
    dump: DumpFixture,
    remote: Option<bool>,
    hooks: Vec<ConfigHook>,
}

impl Default for TestEnvBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEnvBuilder {
    /// Start from the `shopdb` fixture with remote sync disabled
    pub fn new() -> Self {
        Self {
            dump: DumpFixture::shop(),
            remote: None,
            hooks: Vec::new(),
        }
    }

    /// Serve `dump` from the fake `mysqldump`
    pub fn dump(mut self, dump: DumpFixture) -> Self {
        self.dump = dump;
        self
    }

    /// Enable remote sync through the fake `rclone`
    pub fn with_remote(mut self) -> Self {
        self.remote = Some(false);
        self
    }

    /// Enable remote sync with an `rclone` that always fails
    pub fn with_failing_remote(mut self) -> Self {
        self.remote = Some(true);
        self
    }

    /// Adjust the engine configuration before the engine is built
    pub fn configure(mut self, hook: impl FnOnce(&mut EngineConfig) + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    /// Build the environment
    pub fn build(self) -> TestEnv {
        let dir = tempfile::tempdir().unwrap();
        let remote_root = dir.path().join("remote");

        let mut config = EngineConfig::default();
        config.storage.backup_dir = dir.path().join("backups");
        config.storage.scratch_dir = Some(dir.path().join("scratch"));
        config.operations.cancel_grace = Duration::from_millis(100);
        config.scheduler.refresh_interval = Duration::from_secs(1);
        if self.remote.is_some() {
            config.remote.base = Some(REMOTE_BASE.to_string());
        }
        for hook in self.hooks {
            hook(&mut config);
        }

        let runner = FakeProcessRunner::new()
            .with_program(&config.tools.mysqldump, FakeProgram::Dump(self.dump))
            .with_program(&config.tools.mysql, FakeProgram::sink())
            .with_program(&config.tools.gzip, FakeProgram::Gzip)
            .with_program(
                &config.tools.rclone,
                FakeProgram::Rclone {
                    remote_root: remote_root.clone(),
                    fail: self.remote.unwrap_or(false),
                },
            );
        let store = Arc::new(InMemoryStore::new());
        let source = Arc::new(InMemorySource::new());
        let notifier = RecordingNotifier::new();

        let engine = BackupEngine::builder(config)
            .store(store.clone())
            .runner(Arc::new(runner.clone()))
            .source(source.clone())
            .notifier(Arc::new(notifier.clone()))
            .build()
            .unwrap();

        TestEnv {
            dir,
            engine,
            store,
            runner,
            source,
            notifier,
            remote_root,
        }
    }
}

/// A ready-to-use engine with every collaborator faked.
pub struct TestEnv {
    pub dir: TempDir,
    pub engine: BackupEngine,
    pub store: Arc<InMemoryStore>,
    pub runner: FakeProcessRunner,
    pub source: Arc<InMemorySource>,
    pub notifier: RecordingNotifier,
    /// Directory the fake `rclone` copies into.
    pub remote_root: PathBuf,
}

impl TestEnv {
    /// Create a builder
    pub fn builder() -> TestEnvBuilder {
        TestEnvBuilder::new()
    }

    /// Environment with default settings
    pub fn new() -> Self {
        TestEnvBuilder::new().build()
    }

    /// The fixture database name
    pub fn db() -> DatabaseName {
        DatabaseName::new_unchecked("shopdb")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.engine.layout().root().to_path_buf()
    }

    /// Poll the store until `job_id` reaches a terminal status
    pub async fn wait_for_job(&self, job_id: JobId) -> BackupJob {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let job = self.store.get_job(job_id).await.unwrap().unwrap();
            if job.status.is_terminal() {
                return job;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {job_id} still {} after 10s",
                job.status
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Poll until `job_id`'s restore lane reports a terminal state
    pub async fn wait_for_restore(&self, job_id: JobId) -> StatusSnapshot {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(snapshot) = self.engine.registry().snapshot(job_id, OperationKind::Restore)
                && snapshot.state.is_terminal()
            {
                return snapshot;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "restore of job {job_id} did not finish within 10s"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Poll until `job_id`'s `operation` has a live child process
    pub async fn wait_for_child(&self, job_id: JobId, operation: OperationKind) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while self.engine.registry().pid(job_id, operation).is_none() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "no child started for job {job_id} within 10s"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Every file under `dir`, recursively, sorted
    pub fn files_under(&self, dir: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let mut pending = vec![dir.to_path_buf()];
        while let Some(next) = pending.pop() {
            let Ok(entries) = std::fs::read_dir(&next) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                } else {
                    files.push(path);
                }
            }
        }
        files.sort();
        files
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
