//! # dumpvault testing
//!
//! Test doubles for driving the engine without MySQL, gzip or rclone:
//!
//! - **[`FakeProcessRunner`]**: scripted external programs with a journal of
//!   calls, stdin and signals
//! - **[`InMemorySource`]**: tables with change timestamps for incremental
//!   passes
//! - **[`RecordingNotifier`]**: keeps every notification
//! - **[`DumpFixture`]**: canned `mysqldump` output
//! - **[`TestEnv`]**: all of the above wired to an engine in a temp dir
//!
//! ```rust,no_run
//! use dumpvault_core::BackupKind;
//! use dumpvault_testing::TestEnv;
//!
//! # async fn demo() {
//! let env = TestEnv::new();
//! let id = env
//!     .engine
//!     .create_backup(TestEnv::db(), BackupKind::FullManual, vec![])
//!     .await
//!     .unwrap();
//! let job = env.wait_for_job(id).await;
//! assert!(job.file_path.exists());
//! # }
//! ```

pub mod env;
pub mod fixtures;
pub mod notifier;
pub mod runner;
pub mod source;

pub use env::{REMOTE_BASE, TestEnv, TestEnvBuilder};
pub use fixtures::{DumpFixture, TableFixture};
pub use notifier::RecordingNotifier;
pub use runner::{FakeProcessRunner, FakeProgram};
pub use source::InMemorySource;
