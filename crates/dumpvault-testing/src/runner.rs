//! # Scripted process runner
//!
//! [`FakeProcessRunner`] stands in for `mysqldump`, `mysql`, `gzip` and
//! `rclone`. Each program name is bound to a [`FakeProgram`] describing how
//! it behaves; every invocation, every byte written to a child's stdin and
//! every signal delivered is recorded for assertions.
//!
//! The gzip stand-in does not compress: `gzip -f x.sql` renames the file to
//! `x.sql.gz` and `gzip -dc` copies bytes through unchanged, so artifacts
//! stay readable in tests.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use dumpvault_core::error::ProcessError;
use dumpvault_engine::{
    CommandSpec, ExitOutcome, ProcessHandle, ProcessReader, ProcessRunner, ProcessWriter, Signal,
};

use crate::fixtures::DumpFixture;

const PIPE_CAPACITY: usize = 64 * 1024;

/// Connection flags that take a value in MySQL tool command lines.
const VALUED_FLAGS: &[&str] = &["-h", "-P", "-u", "-e"];

/// How a scripted program behaves.
#[derive(Debug, Clone)]
pub enum FakeProgram {
    /// Print `stdout` and `stderr`, then exit with `code`.
    Output {
        stdout: Vec<u8>,
        stderr: String,
        code: i32,
    },
    /// `mysqldump` printing the fixture, restricted to the tables named on
    /// the command line.
    Dump(DumpFixture),
    /// Print `stdout`, then block until signalled. With `ignore_terminate`
    /// only a kill ends it.
    Hang {
        stdout: Vec<u8>,
        ignore_terminate: bool,
    },
    /// Read stdin to the end, recording it, then exit with `code`.
    Sink { stderr: String, code: i32 },
    /// Identity `gzip`.
    Gzip,
    /// `rclone copyto` into a local directory standing for the remote.
    Rclone { remote_root: PathBuf, fail: bool },
    /// Fail to start, as if the executable were missing.
    Missing,
}

impl FakeProgram {
    /// Successful program printing `stdout`
    pub fn prints(stdout: impl Into<Vec<u8>>) -> Self {
        FakeProgram::Output {
            stdout: stdout.into(),
            stderr: String::new(),
            code: 0,
        }
    }

    /// Program failing with `stderr`
    pub fn fails(stderr: impl Into<String>, code: i32) -> Self {
        FakeProgram::Output {
            stdout: Vec::new(),
            stderr: stderr.into(),
            code,
        }
    }

    /// Client accepting any input
    pub fn sink() -> Self {
        FakeProgram::Sink {
            stderr: String::new(),
            code: 0,
        }
    }

    /// Program that runs until signalled
    pub fn hang(stdout: impl Into<Vec<u8>>) -> Self {
        FakeProgram::Hang {
            stdout: stdout.into(),
            ignore_terminate: false,
        }
    }
}

#[derive(Debug, Default)]
struct Journal {
    calls: Vec<CommandSpec>,
    stdin: HashMap<String, Vec<u8>>,
    signals: Vec<(String, Signal)>,
    live: usize,
}

/// Scripted [`ProcessRunner`].
#[derive(Clone, Default)]
pub struct FakeProcessRunner {
    programs: Arc<Mutex<HashMap<String, FakeProgram>>>,
    journal: Arc<Mutex<Journal>>,
    next_pid: Arc<AtomicU32>,
}

impl FakeProcessRunner {
    /// Create a runner with no programs; unknown programs fail to start
    pub fn new() -> Self {
        Self {
            next_pid: Arc::new(AtomicU32::new(40_000)),
            ..Self::default()
        }
    }

    /// Bind `program` to `behavior`
    pub fn with_program(self, program: impl Into<String>, behavior: FakeProgram) -> Self {
        self.set_program(program, behavior);
        self
    }

    /// Rebind `program`, affecting later invocations only
    pub fn set_program(&self, program: impl Into<String>, behavior: FakeProgram) {
        self.programs
            .lock()
            .unwrap()
            .insert(program.into(), behavior);
    }

    /// Every command started, in order
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.journal.lock().unwrap().calls.clone()
    }

    /// Commands started for `program`
    pub fn calls_to(&self, program: &str) -> Vec<CommandSpec> {
        self.calls()
            .into_iter()
            .filter(|spec| spec.program == program)
            .collect()
    }

    /// Everything written to `program`'s stdin across invocations
    pub fn stdin_of(&self, program: &str) -> Vec<u8> {
        self.journal
            .lock()
            .unwrap()
            .stdin
            .get(program)
            .cloned()
            .unwrap_or_default()
    }

    /// Signals delivered, in order
    pub fn signals(&self) -> Vec<(String, Signal)> {
        self.journal.lock().unwrap().signals.clone()
    }

    /// Children started and not yet reaped or killed
    pub fn live_children(&self) -> usize {
        self.journal.lock().unwrap().live
    }

    fn behavior(&self, program: &str) -> Option<FakeProgram> {
        self.programs.lock().unwrap().get(program).cloned()
    }
}

#[async_trait]
impl ProcessRunner for FakeProcessRunner {
    async fn start(&self, spec: &CommandSpec) -> Result<Box<dyn ProcessHandle>, ProcessError> {
        let behavior = self.behavior(&spec.program);
        {
            let mut journal = self.journal.lock().unwrap();
            journal.calls.push(spec.clone());
        }
        let behavior = match behavior {
            None | Some(FakeProgram::Missing) => {
                return Err(ProcessError::SpawnFailed {
                    program: spec.program.clone(),
                    message: "No such file or directory (os error 2)".to_string(),
                });
            }
            Some(behavior) => behavior,
        };

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let mut handle = FakeHandle::new(spec, pid, Arc::clone(&self.journal));

        match behavior {
            FakeProgram::Output {
                stdout,
                stderr,
                code,
            } => handle.finish_with(stdout, stderr, code),
            FakeProgram::Dump(fixture) => {
                let tables = positional_args(&spec.args).into_iter().skip(1).collect::<Vec<_>>();
                handle.finish_with(fixture.render(&tables).into_bytes(), String::new(), 0);
            }
            FakeProgram::Hang {
                stdout,
                ignore_terminate,
            } => handle.hang(stdout, ignore_terminate),
            FakeProgram::Sink { stderr, code } => handle.sink(stderr, code),
            FakeProgram::Gzip => gzip(&mut handle, &spec.args).await,
            FakeProgram::Rclone { remote_root, fail } => {
                rclone(&mut handle, &spec.args, &remote_root, fail).await
            }
            FakeProgram::Missing => unreachable!("handled above"),
        }

        self.journal.lock().unwrap().live += 1;
        Ok(Box::new(handle))
    }
}

/// Non-flag arguments: database first, then tables.
fn positional_args(args: &[String]) -> Vec<String> {
    let mut positional = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if VALUED_FLAGS.contains(&arg.as_str()) {
            iter.next();
        } else if !arg.starts_with('-') {
            positional.push(arg.clone());
        }
    }
    positional
}

async fn gzip(handle: &mut FakeHandle, args: &[String]) {
    match args {
        [flag, path] if flag == "-f" => {
            let source = PathBuf::from(path);
            let target = PathBuf::from(format!("{path}.gz"));
            match tokio::fs::rename(&source, &target).await {
                Ok(()) => handle.finish_with(Vec::new(), String::new(), 0),
                Err(e) => handle.finish_with(Vec::new(), format!("gzip: {path}: {e}"), 1),
            }
        }
        [flag, path] if flag == "-dc" => match tokio::fs::read(path).await {
            Ok(bytes) => handle.finish_with(bytes, String::new(), 0),
            Err(e) => handle.finish_with(Vec::new(), format!("gzip: {path}: {e}"), 1),
        },
        [flag] if flag == "-dc" => handle.pass_through(),
        _ => handle.finish_with(Vec::new(), format!("gzip: unexpected arguments {args:?}"), 1),
    }
}

async fn rclone(handle: &mut FakeHandle, args: &[String], remote_root: &Path, fail: bool) {
    if fail {
        handle.finish_with(Vec::new(), "ERROR : Failed to copy: remote unavailable".to_string(), 1);
        return;
    }
    let [command, local, remote, ..] = args else {
        handle.finish_with(Vec::new(), "Usage: rclone copyto source:path dest:path".to_string(), 1);
        return;
    };
    if command != "copyto" {
        handle.finish_with(Vec::new(), format!("unknown command {command:?}"), 1);
        return;
    }
    let relative = remote.split_once(':').map_or(remote.as_str(), |(_, path)| path);
    let target = remote_root.join(relative.trim_start_matches('/'));
    let copied = async {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(local, &target).await
    }
    .await;
    match copied {
        Ok(_) => handle.finish_with(Vec::new(), String::new(), 0),
        Err(e) => handle.finish_with(Vec::new(), format!("ERROR : {local}: {e}"), 1),
    }
}

enum Exit {
    Ready(ExitOutcome),
    Task(JoinHandle<ExitOutcome>),
    UntilSignalled {
        ignore_terminate: bool,
        stop: watch::Sender<bool>,
    },
    Done(ExitOutcome),
}

struct FakeHandle {
    program: String,
    pid: u32,
    stdin: Option<ProcessWriter>,
    stdout: Option<ProcessReader>,
    stderr: Option<ProcessReader>,
    exit: Exit,
    journal: Arc<Mutex<Journal>>,
    reaped: bool,
}

impl FakeHandle {
    fn new(spec: &CommandSpec, pid: u32, journal: Arc<Mutex<Journal>>) -> Self {
        Self {
            program: spec.program.clone(),
            pid,
            stdin: None,
            stdout: None,
            stderr: None,
            exit: Exit::Ready(ExitOutcome::SUCCESS),
            journal,
            reaped: false,
        }
    }

    fn finish_with(&mut self, stdout: Vec<u8>, stderr: String, code: i32) {
        self.stdout = Some(Box::new(Cursor::new(stdout)));
        self.stderr = Some(Box::new(Cursor::new(stderr.into_bytes())));
        self.exit = Exit::Ready(ExitOutcome { code: Some(code) });
    }

    fn sink(&mut self, stderr: String, code: i32) {
        let (writer, mut reader) = tokio::io::duplex(PIPE_CAPACITY);
        let journal = Arc::clone(&self.journal);
        let program = self.program.clone();
        let task = tokio::spawn(async move {
            let mut received = Vec::new();
            let _ = reader.read_to_end(&mut received).await;
            journal
                .lock()
                .unwrap()
                .stdin
                .entry(program)
                .or_default()
                .extend_from_slice(&received);
            ExitOutcome { code: Some(code) }
        });
        self.stdin = Some(Box::new(writer));
        self.stdout = Some(Box::new(Cursor::new(Vec::new())));
        self.stderr = Some(Box::new(Cursor::new(stderr.into_bytes())));
        self.exit = Exit::Task(task);
    }

    fn pass_through(&mut self) {
        let (writer, mut input) = tokio::io::duplex(PIPE_CAPACITY);
        let (mut output, reader) = tokio::io::duplex(PIPE_CAPACITY);
        let task = tokio::spawn(async move {
            match tokio::io::copy(&mut input, &mut output).await {
                Ok(_) => {
                    let _ = output.shutdown().await;
                    ExitOutcome::SUCCESS
                }
                Err(_) => ExitOutcome { code: Some(1) },
            }
        });
        self.stdin = Some(Box::new(writer));
        self.stdout = Some(Box::new(reader));
        self.stderr = Some(Box::new(Cursor::new(Vec::new())));
        self.exit = Exit::Task(task);
    }

    fn hang(&mut self, stdout: Vec<u8>, ignore_terminate: bool) {
        let (stop, mut stopped) = watch::channel(false);
        let (mut out_writer, out_reader) = tokio::io::duplex(stdout.len().max(PIPE_CAPACITY));
        let (in_writer, in_reader): (DuplexStream, DuplexStream) = tokio::io::duplex(PIPE_CAPACITY);
        tokio::spawn(async move {
            let _ = out_writer.write_all(&stdout).await;
            let _ = stopped.wait_for(|stop| *stop).await;
            // Both pipe ends close here, like a dying process's descriptors.
            drop(out_writer);
            drop(in_reader);
        });
        self.stdin = Some(Box::new(in_writer));
        self.stdout = Some(Box::new(out_reader));
        self.stderr = Some(Box::new(Cursor::new(Vec::new())));
        self.exit = Exit::UntilSignalled {
            ignore_terminate,
            stop,
        };
    }

    fn reap(&mut self, outcome: ExitOutcome) -> ExitOutcome {
        self.exit = Exit::Done(outcome);
        if !self.reaped {
            self.reaped = true;
            let mut journal = self.journal.lock().unwrap();
            journal.live = journal.live.saturating_sub(1);
        }
        outcome
    }
}

#[async_trait]
impl ProcessHandle for FakeHandle {
    fn id(&self) -> Option<u32> {
        (!self.reaped).then_some(self.pid)
    }

    fn take_stdin(&mut self) -> Option<ProcessWriter> {
        self.stdin.take()
    }

    fn take_stdout(&mut self) -> Option<ProcessReader> {
        self.stdout.take()
    }

    fn take_stderr(&mut self) -> Option<ProcessReader> {
        self.stderr.take()
    }

    async fn wait(&mut self) -> Result<ExitOutcome, ProcessError> {
        let outcome = match &mut self.exit {
            Exit::Ready(outcome) | Exit::Done(outcome) => *outcome,
            Exit::Task(task) => task.await.unwrap_or(ExitOutcome { code: None }),
            Exit::UntilSignalled { stop, .. } => {
                let mut stopped = stop.subscribe();
                let _ = stopped.wait_for(|stop| *stop).await;
                ExitOutcome { code: None }
            }
        };
        Ok(self.reap(outcome))
    }

    async fn signal(&mut self, signal: Signal) -> Result<(), ProcessError> {
        self.journal
            .lock()
            .unwrap()
            .signals
            .push((self.program.clone(), signal));
        let killed = match &self.exit {
            Exit::UntilSignalled {
                ignore_terminate,
                stop,
            } => {
                if signal == Signal::Kill || !*ignore_terminate {
                    stop.send_replace(true);
                }
                false
            }
            Exit::Task(task) => {
                task.abort();
                true
            }
            Exit::Ready(_) | Exit::Done(_) => false,
        };
        if killed {
            self.reap(ExitOutcome { code: None });
        }
        Ok(())
    }
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        if let Exit::UntilSignalled { stop, .. } = &self.exit {
            stop.send_replace(true);
        }
        if let Exit::Task(task) = &self.exit {
            task.abort();
        }
        if !self.reaped {
            self.reaped = true;
            let mut journal = self.journal.lock().unwrap();
            journal.live = journal.live.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(program: &str, args: &[&str]) -> CommandSpec {
        CommandSpec::new(program).args(args.iter().copied())
    }

    #[test]
    fn test_positional_args_skip_connection_flags() {
        let args: Vec<String> = ["-h", "db", "-P", "3306", "-u", "root", "--quick", "shopdb", "orders"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(positional_args(&args), ["shopdb", "orders"]);
    }

    #[tokio::test]
    async fn test_sink_records_stdin() {
        let runner = FakeProcessRunner::new().with_program("mysql", FakeProgram::sink());
        let mut child = runner.start(&spec("mysql", &["shopdb"]).piped_stdin()).await.unwrap();
        let mut stdin = child.take_stdin().unwrap();
        stdin.write_all(b"SELECT 1;\n").await.unwrap();
        stdin.shutdown().await.unwrap();
        drop(stdin);

        assert_eq!(child.wait().await.unwrap(), ExitOutcome::SUCCESS);
        assert_eq!(runner.stdin_of("mysql"), b"SELECT 1;\n");
        assert_eq!(runner.live_children(), 0);
    }

    #[tokio::test]
    async fn test_hang_ends_on_terminate() {
        let runner = FakeProcessRunner::new().with_program("mysqldump", FakeProgram::hang("-- partial\n"));
        let mut child = runner.start(&spec("mysqldump", &["shopdb"])).await.unwrap();
        let mut out = child.take_stdout().unwrap();
        let mut first = [0u8; 11];
        out.read_exact(&mut first).await.unwrap();
        assert_eq!(&first, b"-- partial\n");

        child.signal(Signal::Terminate).await.unwrap();
        assert_eq!(child.wait().await.unwrap(), ExitOutcome { code: None });
        assert_eq!(runner.signals(), [("mysqldump".to_string(), Signal::Terminate)]);
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_start() {
        let runner = FakeProcessRunner::new();
        let err = runner.start(&spec("mysqldump", &[])).await.err().unwrap();
        assert!(matches!(err, ProcessError::SpawnFailed { .. }));
        assert_eq!(runner.calls().len(), 1);
    }
}
