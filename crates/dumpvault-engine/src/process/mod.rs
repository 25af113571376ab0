//! External program execution
//!
//! Every dump, compression and restore step runs as a separate OS process
//! started through a [`ProcessRunner`]. Arguments are discrete tokens and
//! never pass through a shell, so database and table names cannot inject
//! extra commands.
//!
//! The production runner is [`TokioProcessRunner`]; tests substitute a
//! scripted runner that replays canned output.

mod pipe;
mod supervisor;
mod tokio_runner;

pub(crate) use pipe::{CopyError, copy_counting, read_stderr};
pub use supervisor::Supervisor;
pub use tokio_runner::TokioProcessRunner;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use dumpvault_core::error::ProcessError;

/// Readable end of a child's stdout or stderr.
pub type ProcessReader = Box<dyn AsyncRead + Send + Unpin>;

/// Writable end of a child's stdin.
pub type ProcessWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A program invocation: no shell, no interpolation.
#[derive(Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    /// Whether the child's stdin is a pipe the caller writes to. Otherwise
    /// stdin is closed.
    pub stdin: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            stdin: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn piped_stdin(mut self) -> Self {
        self.stdin = true;
        self
    }

    /// Program and arguments joined for log lines. Environment values are
    /// left out since they carry credentials.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env_keys: Vec<&str> = self.envs.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("CommandSpec")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env_keys", &env_keys)
            .field("stdin", &self.stdin)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Polite request to exit (SIGTERM).
    Terminate,
    /// Forced termination (SIGKILL).
    Kill,
}

/// How a child ended. `code` is `None` when it was killed by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    pub code: Option<i32>,
}

impl ExitOutcome {
    pub const SUCCESS: ExitOutcome = ExitOutcome { code: Some(0) };

    pub fn success(self) -> bool {
        self.code == Some(0)
    }
}

/// A started child process.
#[async_trait]
pub trait ProcessHandle: Send {
    /// OS process id while the child is alive.
    fn id(&self) -> Option<u32>;

    fn take_stdin(&mut self) -> Option<ProcessWriter>;

    fn take_stdout(&mut self) -> Option<ProcessReader>;

    fn take_stderr(&mut self) -> Option<ProcessReader>;

    /// Wait for the child to exit.
    async fn wait(&mut self) -> Result<ExitOutcome, ProcessError>;

    async fn signal(&mut self, signal: Signal) -> Result<(), ProcessError>;
}

/// Starts external programs.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Spawn `spec`. A missing executable fails here with
    /// [`ProcessError::SpawnFailed`].
    async fn start(&self, spec: &CommandSpec) -> Result<Box<dyn ProcessHandle>, ProcessError>;
}

/// Send SIGTERM, give the child `grace` to exit, then SIGKILL it.
pub async fn terminate(handle: &mut dyn ProcessHandle, grace: Duration) {
    if let Err(e) = handle.signal(Signal::Terminate).await {
        debug!(error = %e, "terminate signal not delivered");
    }

    match tokio::time::timeout(grace, handle.wait()).await {
        Ok(_) => {}
        Err(_) => {
            debug!(grace = ?grace, "child ignored terminate, killing");
            if let Err(e) = handle.signal(Signal::Kill).await {
                debug!(error = %e, "kill signal not delivered");
            }
            let _ = handle.wait().await;
        }
    }
}

/// Stderr lines that never indicate failure.
const BENIGN_MARKERS: &[&str] = &[
    "Using a password on the command line interface can be insecure",
    "[Warning] Using a password",
];

fn is_benign(line: &str) -> bool {
    BENIGN_MARKERS.iter().any(|marker| line.contains(marker))
}

/// Decide whether a finished child succeeded.
///
/// Any stderr line containing "error" (case-insensitive) fails the step even
/// on exit status 0, because dump tools report some partial failures that
/// way. The password-on-command-line warning is ignored. Otherwise a non-zero
/// status fails with the captured stderr attached.
pub fn check_exit(program: &str, outcome: ExitOutcome, stderr: &str) -> Result<(), ProcessError> {
    let fatal = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !is_benign(line))
        .find(|line| line.to_ascii_lowercase().contains("error"));

    if let Some(line) = fatal {
        return Err(ProcessError::FatalDiagnostic {
            program: program.to_string(),
            line: line.to_string(),
        });
    }

    if !outcome.success() {
        let stderr: Vec<&str> = stderr
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !is_benign(line))
            .collect();
        return Err(ProcessError::NonZeroExit {
            program: program.to_string(),
            code: outcome.code,
            stderr: stderr.join("\n"),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const FAILED: ExitOutcome = ExitOutcome { code: Some(2) };

    #[test]
    fn test_password_warning_is_not_failure() {
        let stderr = "mysqldump: [Warning] Using a password on the command line interface can be insecure.\n";
        assert_eq!(check_exit("mysqldump", ExitOutcome::SUCCESS, stderr), Ok(()));
    }

    #[rstest]
    #[case("mysqldump: Got error: 1044: Access denied for user")]
    #[case("ERROR 1146 (42S02) at line 3: Table 'x' doesn't exist")]
    #[case("Couldn't execute query: error in syntax")]
    fn test_error_line_fails_despite_zero_exit(#[case] line: &str) {
        let err = check_exit("mysqldump", ExitOutcome::SUCCESS, line).unwrap_err();
        assert_eq!(
            err,
            ProcessError::FatalDiagnostic {
                program: "mysqldump".to_string(),
                line: line.to_string(),
            }
        );
    }

    #[test]
    fn test_nonzero_exit_carries_stderr() {
        let stderr = "[Warning] Using a password\nsomething went sideways\n";
        let err = check_exit("gzip", FAILED, stderr).unwrap_err();
        assert_eq!(
            err,
            ProcessError::NonZeroExit {
                program: "gzip".to_string(),
                code: Some(2),
                stderr: "something went sideways".to_string(),
            }
        );
    }

    #[test]
    fn test_killed_child_is_failure() {
        let err = check_exit("mysql", ExitOutcome { code: None }, "").unwrap_err();
        assert!(err.to_string().contains("a signal"));
    }

    #[test]
    fn test_debug_hides_env_values() {
        let spec = CommandSpec::new("mysqldump")
            .arg("shopdb")
            .env("MYSQL_PWD", "hunter2");
        let debug = format!("{spec:?}");
        assert!(debug.contains("MYSQL_PWD"));
        assert!(!debug.contains("hunter2"));
        assert_eq!(spec.display(), "mysqldump shopdb");
    }
}
