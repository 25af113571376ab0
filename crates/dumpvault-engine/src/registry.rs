//! Operation registry
//!
//! In-memory table of the backup and restore operations currently running,
//! keyed by job id and lane. Registering hands out an [`OperationTicket`];
//! the ticket is how the running task reports progress and learns about
//! cancellation, and it unregisters the operation when it finishes or is
//! dropped.
//!
//! A job has at most one live operation per lane: a second registration on
//! an occupied lane fails with a conflict. Finished restores stay visible
//! for a short linger period so a poller can observe the terminal state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::debug;

use dumpvault_core::error::{AbortReason, ConflictError};
use dumpvault_core::status::progress_percent;
use dumpvault_core::{
    DatabaseName, JobId, OperationKind, OperationState, StatusSnapshot, TableName,
};
use dumpvault_observability::EngineMetrics;

type Key = (JobId, OperationKind);

#[derive(Clone)]
pub struct OperationRegistry {
    state: Arc<Mutex<RegistryState>>,
    linger: Duration,
    metrics: Option<EngineMetrics>,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<Key, Entry>,
    next_generation: u64,
}

struct Entry {
    generation: u64,
    state: OperationState,
    database: DatabaseName,
    tables: Vec<TableName>,
    started: Instant,
    finished: Option<Instant>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    current_bytes: u64,
    total_bytes: Option<u64>,
    scale: f64,
    pid: Option<u32>,
    error: Option<String>,
    cancel: watch::Sender<Option<AbortReason>>,
    done: watch::Receiver<bool>,
}

impl Entry {
    fn snapshot(&self, job_id: JobId, operation: OperationKind) -> StatusSnapshot {
        let elapsed = self
            .finished
            .unwrap_or_else(Instant::now)
            .duration_since(self.started);
        let progress = match self.state {
            OperationState::Completed => Some(100),
            _ => self
                .total_bytes
                .map(|total| progress_percent(self.current_bytes, total, self.scale)),
        };
        StatusSnapshot {
            job_id,
            operation,
            state: self.state,
            progress,
            current_bytes: self.current_bytes,
            total_bytes: self.total_bytes,
            elapsed_secs: Some(elapsed.as_secs()),
            database: Some(self.database.clone()),
            tables: self.tables.clone(),
            file_size: None,
            created_at: Some(self.created_at),
            completed_at: self.completed_at,
            error: self.error.clone(),
        }
    }
}

/// Outcome of a cancellation request.
pub enum CancelRequest {
    /// The running task was told to abort; await the completion to know it
    /// has cleaned up.
    Signalled(Completion),
    /// Nothing is registered on that lane.
    NotRegistered,
}

/// Resolves once a signalled operation has finished.
pub struct Completion(watch::Receiver<bool>);

impl Completion {
    pub async fn wait(mut self) {
        // A dropped sender means the ticket is gone, which is also done.
        let _ = self.0.wait_for(|done| *done).await;
    }
}

impl OperationRegistry {
    pub fn new(linger: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState::default())),
            linger,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: EngineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the `operation` lane of `job`.
    ///
    /// Fails with [`ConflictError::OperationActive`] while another operation
    /// is running on that lane. A lingering finished entry is replaced.
    pub fn register(
        &self,
        job_id: JobId,
        operation: OperationKind,
        database: DatabaseName,
        tables: Vec<TableName>,
        timeout: Option<Duration>,
    ) -> Result<OperationTicket, ConflictError> {
        let mut state = self.lock();
        let key = (job_id, operation);
        if let Some(existing) = state.entries.get(&key)
            && !existing.state.is_terminal()
        {
            return Err(ConflictError::OperationActive {
                job: job_id,
                operation,
            });
        }

        state.next_generation += 1;
        let generation = state.next_generation;
        let (cancel_tx, cancel_rx) = watch::channel(None);
        let (done_tx, done_rx) = watch::channel(false);
        let started = Instant::now();

        state.entries.insert(
            key,
            Entry {
                generation,
                state: OperationState::Running,
                database,
                tables,
                started,
                finished: None,
                created_at: Utc::now(),
                completed_at: None,
                current_bytes: 0,
                total_bytes: None,
                scale: 100.0,
                pid: None,
                error: None,
                cancel: cancel_tx,
                done: done_rx,
            },
        );
        drop(state);

        if let Some(metrics) = &self.metrics {
            metrics.operation_started();
        }
        debug!(job.id = %job_id, operation = %operation, "operation registered");

        Ok(OperationTicket {
            registry: self.clone(),
            key,
            generation,
            cancel: cancel_rx,
            done: done_tx,
            deadline: timeout.map(|limit| (tokio::time::Instant::now() + limit, limit)),
            finished: false,
        })
    }

    /// Ask the operation on `job`'s `operation` lane to abort.
    ///
    /// A second request while the first is still being honoured fails with
    /// [`ConflictError::CancelPending`].
    pub fn request_cancel(
        &self,
        job_id: JobId,
        operation: OperationKind,
    ) -> Result<CancelRequest, ConflictError> {
        let state = self.lock();
        let Some(entry) = state.entries.get(&(job_id, operation)) else {
            return Ok(CancelRequest::NotRegistered);
        };
        if entry.state.is_terminal() {
            return Ok(CancelRequest::NotRegistered);
        }
        if entry.cancel.borrow().is_some() {
            return Err(ConflictError::CancelPending(job_id));
        }
        entry.cancel.send_replace(Some(AbortReason::Cancelled));
        Ok(CancelRequest::Signalled(Completion(entry.done.clone())))
    }

    pub fn snapshot(&self, job_id: JobId, operation: OperationKind) -> Option<StatusSnapshot> {
        self.lock()
            .entries
            .get(&(job_id, operation))
            .map(|entry| entry.snapshot(job_id, operation))
    }

    /// Whether any lane of `job` has a running operation.
    pub fn is_active(&self, job_id: JobId) -> bool {
        self.active_operation(job_id).is_some()
    }

    /// The lane of `job` with a running operation, backups first.
    pub fn active_operation(&self, job_id: JobId) -> Option<OperationKind> {
        let state = self.lock();
        [OperationKind::Backup, OperationKind::Restore]
            .into_iter()
            .find(|op| {
                state
                    .entries
                    .get(&(job_id, *op))
                    .is_some_and(|entry| !entry.state.is_terminal())
            })
    }

    /// Ids with a running operation on `operation`'s lane.
    pub fn active_jobs(&self, operation: OperationKind) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self
            .lock()
            .entries
            .iter()
            .filter(|((_, op), entry)| *op == operation && !entry.state.is_terminal())
            .map(|((id, _), _)| *id)
            .collect();
        ids.sort();
        ids
    }

    pub fn pid(&self, job_id: JobId, operation: OperationKind) -> Option<u32> {
        self.lock()
            .entries
            .get(&(job_id, operation))
            .and_then(|entry| entry.pid)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn update(&self, key: Key, generation: u64, f: impl FnOnce(&mut Entry)) {
        let mut state = self.lock();
        if let Some(entry) = state.entries.get_mut(&key)
            && entry.generation == generation
        {
            f(entry);
        }
    }

    fn remove(&self, key: Key, generation: u64) {
        let mut state = self.lock();
        if state
            .entries
            .get(&key)
            .is_some_and(|entry| entry.generation == generation)
        {
            state.entries.remove(&key);
        }
    }

    fn finish(&self, key: Key, generation: u64, outcome: Result<(), String>) {
        let now = Utc::now();
        self.update(key, generation, |entry| {
            entry.finished = Some(Instant::now());
            entry.completed_at = Some(now);
            entry.pid = None;
            match outcome {
                Ok(()) => {
                    entry.state = OperationState::Completed;
                    if let Some(total) = entry.total_bytes {
                        entry.current_bytes = entry.current_bytes.max(total);
                    }
                }
                Err(error) => {
                    entry.state = OperationState::Failed;
                    entry.error = Some(error);
                }
            }
        });

        if let Some(metrics) = &self.metrics {
            metrics.operation_finished();
        }

        // Backup state lives in the persisted job, so only restores linger.
        let (job_id, operation) = key;
        if operation == OperationKind::Backup || self.linger.is_zero() {
            self.remove(key, generation);
            return;
        }

        let registry = self.clone();
        let linger = self.linger;
        tokio::spawn(async move {
            tokio::time::sleep(linger).await;
            registry.remove(key, generation);
            debug!(job.id = %job_id, operation = %operation, "lingering entry removed");
        });
    }
}

impl std::fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("entries", &self.len())
            .field("linger", &self.linger)
            .finish()
    }
}

/// Proof that an operation holds its lane.
///
/// Finish it with [`OperationTicket::complete`] or
/// [`OperationTicket::fail`]. Dropping an unfinished ticket removes the
/// entry at once.
pub struct OperationTicket {
    registry: OperationRegistry,
    key: Key,
    generation: u64,
    cancel: watch::Receiver<Option<AbortReason>>,
    done: watch::Sender<bool>,
    deadline: Option<(tokio::time::Instant, Duration)>,
    finished: bool,
}

impl OperationTicket {
    pub fn job_id(&self) -> JobId {
        self.key.0
    }

    pub fn operation(&self) -> OperationKind {
        self.key.1
    }

    pub fn set_pid(&self, pid: Option<u32>) {
        self.registry
            .update(self.key, self.generation, |entry| entry.pid = pid);
    }

    /// Declare the amount of work. `scale` inflates the ratio when progress
    /// is counted on something smaller than the real work.
    pub fn set_total(&self, total: u64, scale: f64) {
        self.registry.update(self.key, self.generation, |entry| {
            entry.total_bytes = Some(total);
            entry.scale = scale;
        });
    }

    pub fn add_progress(&self, bytes: u64) {
        self.registry.update(self.key, self.generation, |entry| {
            entry.current_bytes += bytes;
        });
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.borrow().is_some()
    }

    /// A fresh abort signal for this operation.
    pub fn abort_signal(&self) -> AbortSignal {
        AbortSignal {
            cancel: Some(self.cancel.clone()),
            deadline: self.deadline,
        }
    }

    pub fn complete(mut self) {
        self.finished = true;
        self.registry.finish(self.key, self.generation, Ok(()));
        self.done.send_replace(true);
    }

    pub fn fail(mut self, error: impl Into<String>) {
        self.finished = true;
        self.registry
            .finish(self.key, self.generation, Err(error.into()));
        self.done.send_replace(true);
    }
}

impl Drop for OperationTicket {
    fn drop(&mut self) {
        if !self.finished {
            self.registry.remove(self.key, self.generation);
            if let Some(metrics) = &self.registry.metrics {
                metrics.operation_finished();
            }
            self.done.send_replace(true);
        }
    }
}

/// Resolves when an operation must stop: on cancellation or once its
/// deadline passes.
pub struct AbortSignal {
    cancel: Option<watch::Receiver<Option<AbortReason>>>,
    deadline: Option<(tokio::time::Instant, Duration)>,
}

impl AbortSignal {
    pub fn never() -> Self {
        Self {
            cancel: None,
            deadline: None,
        }
    }

    pub async fn triggered(&mut self) -> AbortReason {
        let deadline = self.deadline;
        let timed_out = async move {
            match deadline {
                Some((at, limit)) => {
                    tokio::time::sleep_until(at).await;
                    AbortReason::TimedOut(limit)
                }
                None => std::future::pending().await,
            }
        };
        let cancelled = async {
            match self.cancel.as_mut() {
                Some(rx) => {
                    let waited = rx
                        .wait_for(Option::is_some)
                        .await
                        .map(|reason| (*reason).unwrap_or(AbortReason::Cancelled));
                    match waited {
                        Ok(reason) => reason,
                        Err(_) => std::future::pending().await,
                    }
                }
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            reason = timed_out => reason,
            reason = cancelled => reason,
        }
    }
}
