use std::future::Future;
use std::path::Path;
use std::time::Duration;

use futures::future::join_all;
use tokio::fs::File;
use tokio::io::AsyncWrite;
use tracing::{debug, warn};

use dumpvault_core::{VaultError, VaultResult};
use dumpvault_core::error::{FilesystemError, FsOperation, ProcessError};

use super::{CommandSpec, CopyError, ProcessRunner, check_exit, copy_counting, read_stderr, terminate};
use crate::registry::{AbortSignal, OperationTicket};

/// Runs children on behalf of one operation, tearing them down when the
/// operation is cancelled or times out.
pub struct Supervisor<'a> {
    runner: &'a dyn ProcessRunner,
    grace: Duration,
    ticket: Option<&'a OperationTicket>,
    abort: AbortSignal,
}

impl<'a> Supervisor<'a> {
    /// A supervisor that is never aborted.
    pub fn new(runner: &'a dyn ProcessRunner, grace: Duration) -> Self {
        Self {
            runner,
            grace,
            ticket: None,
            abort: AbortSignal::never(),
        }
    }

    /// A supervisor bound to a registered operation: child pids and progress
    /// are reported to `ticket` and its cancellation and deadline apply.
    pub fn attached(
        runner: &'a dyn ProcessRunner,
        grace: Duration,
        ticket: &'a OperationTicket,
    ) -> Self {
        Self {
            runner,
            grace,
            ticket: Some(ticket),
            abort: ticket.abort_signal(),
        }
    }

    pub fn runner(&self) -> &'a dyn ProcessRunner {
        self.runner
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn ticket(&self) -> Option<&'a OperationTicket> {
        self.ticket
    }

    pub fn abort_signal(&mut self) -> &mut AbortSignal {
        &mut self.abort
    }

    /// Run `spec` to completion, discarding its stdout.
    pub async fn run(&mut self, spec: &CommandSpec) -> VaultResult<()> {
        let mut sink = tokio::io::sink();
        self.drive(spec, &mut sink, None, false).await.map(|_| ())
    }

    /// Run `spec`, streaming its stdout into a new file at `path`. Returns
    /// the number of bytes written. With `track`, every chunk counts towards
    /// the operation's progress.
    pub async fn run_to_file(
        &mut self,
        spec: &CommandSpec,
        path: &Path,
        track: bool,
    ) -> VaultResult<u64> {
        let mut file = File::create(path)
            .await
            .map_err(|e| FilesystemError::io(FsOperation::Create, path, &e))?;
        self.drive(spec, &mut file, Some(path), track).await
    }

    /// Run `spec` and collect its stdout.
    pub async fn output(&mut self, spec: &CommandSpec) -> VaultResult<Vec<u8>> {
        let mut out = Vec::new();
        self.drive(spec, &mut out, None, false).await?;
        Ok(out)
    }

    /// Stream the file at `source` through `stages`. The file feeds the first
    /// stage's stdin, each stage's stdout feeds the next one and the last
    /// stage's stdout is discarded. Bytes read from `source` count towards
    /// progress. Returns the number of bytes fed.
    ///
    /// Exit statuses are checked from the last stage backwards so a consumer
    /// failure is reported instead of the broken pipe it causes upstream.
    pub async fn feed_file(&mut self, source: &Path, stages: &[CommandSpec]) -> VaultResult<u64> {
        if stages.is_empty() {
            return Ok(0);
        }
        let input = File::open(source)
            .await
            .map_err(|e| FilesystemError::io(FsOperation::Read, source, &e))?;

        let mut children = Vec::with_capacity(stages.len());
        for spec in stages {
            debug!(command = %spec.display(), "starting pipeline stage");
            children.push(self.runner.start(spec).await?);
        }
        let ticket = self.ticket;
        if let Some(ticket) = ticket {
            ticket.set_pid(children.last().and_then(|c| c.id()));
        }

        let head = children[0].take_stdin();
        let mut links = Vec::with_capacity(children.len() - 1);
        for i in 1..children.len() {
            let upstream = children[i - 1].take_stdout();
            let downstream = children[i].take_stdin();
            links.push((upstream, downstream));
        }
        let tail = children.last_mut().and_then(|c| c.take_stdout());
        let stderrs: Vec<_> = children.iter_mut().map(|c| c.take_stderr()).collect();

        let feed = async move {
            let mut input = input;
            match head {
                Some(mut stdin) => {
                    copy_counting(&mut input, &mut stdin, |n| {
                        if let Some(ticket) = ticket {
                            ticket.add_progress(n);
                        }
                    })
                    .await
                }
                None => Ok(0),
            }
        };
        let links = join_all(links.into_iter().map(|(upstream, downstream)| async move {
            match (upstream, downstream) {
                (Some(mut out), Some(mut stdin)) => copy_counting(&mut out, &mut stdin, |_| {}).await,
                _ => Ok(0),
            }
        }));
        let drain = async move {
            match tail {
                Some(mut out) => copy_counting(&mut out, &mut tokio::io::sink(), |_| {}).await,
                None => Ok(0),
            }
        };
        let stderr = join_all(stderrs.into_iter().map(read_stderr));

        let work = async {
            let waits = join_all(children.iter_mut().map(|c| c.wait()));
            tokio::join!(feed, links, drain, stderr, waits)
        };
        let finished = tokio::select! {
            done = work => Ok(done),
            reason = self.abort.triggered() => Err(reason),
        };

        let (fed, linked, drained, stderrs, exits) = match finished {
            Ok(done) => done,
            Err(reason) => {
                warn!(source = %source.display(), reason = %reason, "aborting pipeline");
                for child in children.iter_mut().rev() {
                    terminate(child.as_mut(), self.grace).await;
                }
                if let Some(ticket) = ticket {
                    ticket.set_pid(None);
                }
                return Err(ProcessError::Aborted(reason).into());
            }
        };
        if let Some(ticket) = ticket {
            ticket.set_pid(None);
        }

        for ((spec, exit), stderr) in stages.iter().zip(exits).zip(stderrs.iter()).rev() {
            check_exit(&spec.program, exit?, stderr)?;
        }

        let stream_error = |program: &str, e: CopyError| -> VaultError {
            ProcessError::Stream {
                program: program.to_string(),
                message: e.into_io().to_string(),
            }
            .into()
        };
        for (i, result) in linked.into_iter().enumerate() {
            result.map_err(|e| stream_error(&stages[i + 1].program, e))?;
        }
        drained.map_err(|e| stream_error(&stages[stages.len() - 1].program, e))?;
        fed.map_err(|e| match e {
            CopyError::Read(e) => FilesystemError::io(FsOperation::Read, source, &e).into(),
            e => stream_error(&stages[0].program, e),
        })
    }

    /// Await `work` unless the operation is aborted first. Dropping `work`
    /// must release whatever it holds.
    pub async fn guard<T, F>(&mut self, work: F) -> VaultResult<T>
    where
        F: Future<Output = VaultResult<T>>,
    {
        tokio::select! {
            result = work => result,
            reason = self.abort.triggered() => Err(ProcessError::Aborted(reason).into()),
        }
    }

    async fn drive<W>(
        &mut self,
        spec: &CommandSpec,
        sink: &mut W,
        sink_path: Option<&Path>,
        track: bool,
    ) -> VaultResult<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut child = self.runner.start(spec).await?;
        let ticket = self.ticket;
        if let Some(ticket) = ticket {
            ticket.set_pid(child.id());
        }
        debug!(command = %spec.display(), "running child");

        let stdout = child.take_stdout();
        let stderr = child.take_stderr();
        let progress = ticket.filter(|_| track);

        let work = async {
            let copy = async {
                match stdout {
                    Some(mut out) => {
                        copy_counting(&mut out, sink, |n| {
                            if let Some(ticket) = progress {
                                ticket.add_progress(n);
                            }
                        })
                        .await
                    }
                    None => Ok(0),
                }
            };
            tokio::join!(copy, read_stderr(stderr), child.wait())
        };

        let finished = tokio::select! {
            done = work => Ok(done),
            reason = self.abort.triggered() => Err(reason),
        };

        let (copied, stderr, exit) = match finished {
            Ok(done) => done,
            Err(reason) => {
                warn!(program = %spec.program, reason = %reason, "aborting child");
                terminate(&mut *child, self.grace).await;
                if let Some(ticket) = ticket {
                    ticket.set_pid(None);
                }
                return Err(ProcessError::Aborted(reason).into());
            }
        };
        if let Some(ticket) = ticket {
            ticket.set_pid(None);
        }

        check_exit(&spec.program, exit?, &stderr)?;
        copied.map_err(|e| match (e, sink_path) {
            (CopyError::Write(e), Some(path)) => FilesystemError::io(FsOperation::Write, path, &e).into(),
            (e, _) => ProcessError::Stream {
                program: spec.program.clone(),
                message: e.into_io().to_string(),
            }
            .into(),
        })
    }
}
