use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::debug;

use dumpvault_core::error::ProcessError;

use super::{
    CommandSpec, ExitOutcome, ProcessHandle, ProcessReader, ProcessRunner, ProcessWriter, Signal,
};

/// Runs programs with `tokio::process`.
///
/// Children are killed when their handle is dropped, so an operation future
/// that is abandoned never leaves a dump or restore running in the
/// background.
#[derive(Debug, Clone, Default)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn start(&self, spec: &CommandSpec) -> Result<Box<dyn ProcessHandle>, ProcessError> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if spec.stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| ProcessError::SpawnFailed {
            program: spec.program.clone(),
            message: e.to_string(),
        })?;
        debug!(program = %spec.program, pid = ?child.id(), "spawned child process");

        Ok(Box::new(TokioProcess {
            program: spec.program.clone(),
            child,
        }))
    }
}

struct TokioProcess {
    program: String,
    child: Child,
}

#[async_trait]
impl ProcessHandle for TokioProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn take_stdin(&mut self) -> Option<ProcessWriter> {
        self.child
            .stdin
            .take()
            .map(|stdin| Box::new(stdin) as ProcessWriter)
    }

    fn take_stdout(&mut self) -> Option<ProcessReader> {
        self.child
            .stdout
            .take()
            .map(|stdout| Box::new(stdout) as ProcessReader)
    }

    fn take_stderr(&mut self) -> Option<ProcessReader> {
        self.child
            .stderr
            .take()
            .map(|stderr| Box::new(stderr) as ProcessReader)
    }

    async fn wait(&mut self) -> Result<ExitOutcome, ProcessError> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| ProcessError::Stream {
                program: self.program.clone(),
                message: e.to_string(),
            })?;
        Ok(ExitOutcome {
            code: status.code(),
        })
    }

    async fn signal(&mut self, signal: Signal) -> Result<(), ProcessError> {
        match signal {
            Signal::Terminate => self.terminate(),
            Signal::Kill => self.child.start_kill().map_err(|e| ProcessError::Stream {
                program: self.program.clone(),
                message: e.to_string(),
            }),
        }
    }
}

impl TokioProcess {
    #[cfg(unix)]
    fn terminate(&mut self) -> Result<(), ProcessError> {
        let Some(pid) = self.child.id() else {
            // Already reaped.
            return Ok(());
        };
        let pid = libc::pid_t::try_from(pid).map_err(|e| ProcessError::Stream {
            program: self.program.clone(),
            message: e.to_string(),
        })?;
        // SAFETY: `pid` belongs to a child we spawned and have not reaped yet.
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc == 0 {
            Ok(())
        } else {
            Err(ProcessError::Stream {
                program: self.program.clone(),
                message: std::io::Error::last_os_error().to_string(),
            })
        }
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> Result<(), ProcessError> {
        self.child.start_kill().map_err(|e| ProcessError::Stream {
            program: self.program.clone(),
            message: e.to_string(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::{check_exit, read_stderr, terminate};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_missing_program_fails_to_spawn() {
        let runner = TokioProcessRunner::new();
        let err = runner
            .start(&CommandSpec::new("dumpvault-no-such-program"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ProcessError::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn test_stdin_round_trips_through_cat() {
        let runner = TokioProcessRunner::new();
        let mut child = runner
            .start(&CommandSpec::new("cat").piped_stdin())
            .await
            .unwrap();

        let mut stdin = child.take_stdin().unwrap();
        stdin.write_all(b"REPLACE INTO t VALUES (1);\n").await.unwrap();
        drop(stdin);

        let mut out = String::new();
        child
            .take_stdout()
            .unwrap()
            .read_to_string(&mut out)
            .await
            .unwrap();
        let stderr = read_stderr(child.take_stderr()).await;
        let outcome = child.wait().await.unwrap();

        assert_eq!(out, "REPLACE INTO t VALUES (1);\n");
        assert_eq!(check_exit("cat", outcome, &stderr), Ok(()));
    }

    #[tokio::test]
    async fn test_terminate_stops_sleeping_child() {
        let runner = TokioProcessRunner::new();
        let mut child = runner
            .start(&CommandSpec::new("sleep").arg("30"))
            .await
            .unwrap();

        let started = std::time::Instant::now();
        terminate(child.as_mut(), Duration::from_secs(2)).await;
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(child.id(), None);
    }
}
