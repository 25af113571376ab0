//! Cron-driven triggers
//!
//! The scheduler re-reads the enabled schedules every
//! `scheduler.refresh_interval` and keeps one timer task per schedule. A
//! schedule whose definition changed is re-armed; one that disappeared or
//! was disabled is stopped. A separate timer runs retention cleanup on
//! `scheduler.cleanup_cron`.

use std::collections::HashMap;

use chrono::Local;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use dumpvault_core::{CronExpression, ScheduleDefinition, ScheduleId, VaultResult};

use crate::engine::BackupEngine;

/// Runs schedule timers for one engine.
pub struct Scheduler {
    engine: BackupEngine,
    cleanup: Option<CronExpression>,
}

/// Stops the scheduler when told to, or when dropped.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop every timer and wait for the scheduler task to exit. Backups
    /// already started keep running.
    pub async fn stop(mut self) {
        self.shutdown.send_replace(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

struct ArmedTimer {
    definition: ScheduleDefinition,
    handle: JoinHandle<()>,
}

impl Scheduler {
    pub fn new(engine: BackupEngine) -> VaultResult<Self> {
        let expression = engine.config().scheduler.cleanup_cron.trim();
        let cleanup = if expression.is_empty() {
            None
        } else {
            Some(CronExpression::parse(expression)?)
        };
        Ok(Self { engine, cleanup })
    }

    pub fn start(self) -> SchedulerHandle {
        let (shutdown, stop) = watch::channel(false);
        let task = tokio::spawn(self.run(stop));
        SchedulerHandle {
            shutdown,
            task: Some(task),
        }
    }

    async fn run(self, mut stop: watch::Receiver<bool>) {
        let config = &self.engine.config().scheduler;
        let enabled = config.enabled;
        let mut interval = tokio::time::interval(config.refresh_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let cleanup = self
            .cleanup
            .clone()
            .map(|cron| tokio::spawn(cleanup_loop(self.engine.clone(), cron)));
        let mut timers: HashMap<ScheduleId, ArmedTimer> = HashMap::new();
        info!(schedules = enabled, "scheduler started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if enabled {
                        self.refresh_timers(&mut timers).await;
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        for (_, timer) in timers.drain() {
            timer.handle.abort();
        }
        if let Some(cleanup) = cleanup {
            cleanup.abort();
        }
        info!("scheduler stopped");
    }

    async fn refresh_timers(&self, timers: &mut HashMap<ScheduleId, ArmedTimer>) {
        let schedules = match self.engine.list_schedules(true).await {
            Ok(schedules) => schedules,
            Err(e) => {
                warn!(error = %e, "failed to load schedules; keeping current timers");
                return;
            }
        };

        let mut seen = HashMap::with_capacity(schedules.len());
        for schedule in schedules {
            seen.insert(schedule.id, schedule);
        }

        timers.retain(|id, timer| {
            let keep = seen
                .get(id)
                .is_some_and(|current| *current == timer.definition);
            if !keep {
                timer.handle.abort();
                debug!(schedule.id = %id, "schedule timer stopped");
            }
            keep
        });

        for (id, definition) in seen {
            if timers.contains_key(&id) {
                continue;
            }
            let handle = tokio::spawn(schedule_loop(self.engine.clone(), definition.clone()));
            debug!(schedule.id = %id, cron = %definition.cron.as_str(), "schedule timer armed");
            timers.insert(id, ArmedTimer { definition, handle });
        }
    }
}

/// Sleep until the next local-time occurrence of `cron`, or `None` when it
/// never fires again.
async fn sleep_until_next(cron: &CronExpression) -> Option<()> {
    let now = Local::now();
    let next = cron.next_after(&now)?;
    let wait = (next - now).to_std().unwrap_or_default();
    tokio::time::sleep(wait).await;
    Some(())
}

async fn schedule_loop(engine: BackupEngine, schedule: ScheduleDefinition) {
    while sleep_until_next(&schedule.cron).await.is_some() {
        match engine.trigger_schedule(&schedule).await {
            Ok(jobs) => info!(
                schedule.id = %schedule.id,
                database = %schedule.database,
                kind = %schedule.kind,
                jobs = jobs.len(),
                "schedule fired"
            ),
            Err(e) => warn!(schedule.id = %schedule.id, error = %e, "scheduled backup rejected"),
        }
    }
    debug!(schedule.id = %schedule.id, "schedule has no further occurrences");
}

async fn cleanup_loop(engine: BackupEngine, cron: CronExpression) {
    while sleep_until_next(&cron).await.is_some() {
        let report = engine.run_cleanup().await;
        debug!(deleted = report.deleted_count, "scheduled cleanup done");
    }
}
