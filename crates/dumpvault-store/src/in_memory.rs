//! In-memory store backed by ordered maps behind a mutex.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use dumpvault_core::error::{NotFoundError, StoreBackend, StoreError};
use dumpvault_core::{
    BackupFilter, BackupJob, BackupKind, BackupStatus, DatabaseName, JobId, JobTransition,
    NewBackupJob, NewSchedule, ScheduleDefinition, ScheduleId, ScheduleUpdate, VaultResult,
};

use crate::{JobStore, ScheduleStore};

#[derive(Default)]
struct State {
    jobs: BTreeMap<JobId, BackupJob>,
    schedules: BTreeMap<ScheduleId, ScheduleDefinition>,
    next_job: i64,
    next_schedule: i64,
}

/// Non-persistent store. Ids start at 1 and are never reused.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state.lock().map_err(|_| StoreError::LockPoisoned {
            backend: StoreBackend::InMemory,
        })
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn insert_job(&self, new: NewBackupJob, at: DateTime<Utc>) -> VaultResult<BackupJob> {
        let mut state = self.lock()?;
        state.next_job += 1;
        let id = JobId::new(state.next_job);
        let job = BackupJob::from_new(id, new, at);
        state.jobs.insert(id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: JobId) -> VaultResult<Option<BackupJob>> {
        Ok(self.lock()?.jobs.get(&id).cloned())
    }

    async fn transition(
        &self,
        id: JobId,
        transition: JobTransition,
        at: DateTime<Utc>,
    ) -> VaultResult<BackupJob> {
        let mut state = self.lock()?;
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or(NotFoundError::Job(id))?;
        job.apply(transition, at)?;
        Ok(job.clone())
    }

    async fn set_remote_path(&self, id: JobId, remote_path: Option<String>) -> VaultResult<()> {
        let mut state = self.lock()?;
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or(NotFoundError::Job(id))?;
        job.remote_path = remote_path;
        Ok(())
    }

    async fn list_jobs(&self, filter: &BackupFilter) -> VaultResult<Vec<BackupJob>> {
        let state = self.lock()?;
        let mut jobs: Vec<BackupJob> = state
            .jobs
            .values()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        if let Some(limit) = filter.limit {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }

    async fn delete_job(&self, id: JobId) -> VaultResult<bool> {
        Ok(self.lock()?.jobs.remove(&id).is_some())
    }

    async fn latest_completion(
        &self,
        database: &DatabaseName,
        kinds: &[BackupKind],
    ) -> VaultResult<Option<DateTime<Utc>>> {
        let state = self.lock()?;
        Ok(state
            .jobs
            .values()
            .filter(|job| {
                &job.database == database
                    && job.status == BackupStatus::Completed
                    && kinds.contains(&job.kind)
            })
            .filter_map(|job| job.completed_at)
            .max())
    }
}

#[async_trait]
impl ScheduleStore for InMemoryStore {
    async fn insert_schedule(
        &self,
        new: NewSchedule,
        at: DateTime<Utc>,
    ) -> VaultResult<ScheduleDefinition> {
        let mut state = self.lock()?;
        state.next_schedule += 1;
        let id = ScheduleId::new(state.next_schedule);
        let schedule = ScheduleDefinition::from_new(id, new, at);
        state.schedules.insert(id, schedule.clone());
        Ok(schedule)
    }

    async fn get_schedule(&self, id: ScheduleId) -> VaultResult<Option<ScheduleDefinition>> {
        Ok(self.lock()?.schedules.get(&id).cloned())
    }

    async fn list_schedules(&self, enabled_only: bool) -> VaultResult<Vec<ScheduleDefinition>> {
        let state = self.lock()?;
        Ok(state
            .schedules
            .values()
            .filter(|s| !enabled_only || s.enabled)
            .cloned()
            .collect())
    }

    async fn update_schedule(
        &self,
        id: ScheduleId,
        update: ScheduleUpdate,
        at: DateTime<Utc>,
    ) -> VaultResult<ScheduleDefinition> {
        let mut state = self.lock()?;
        let schedule = state
            .schedules
            .get_mut(&id)
            .ok_or(NotFoundError::Schedule(id))?;
        schedule.apply(update, at);
        Ok(schedule.clone())
    }

    async fn delete_schedule(&self, id: ScheduleId) -> VaultResult<bool> {
        Ok(self.lock()?.schedules.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract;

    #[tokio::test]
    async fn test_job_lifecycle() {
        contract::job_lifecycle(&InMemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_listing_and_baseline() {
        contract::listing_and_baseline(&InMemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_schedule_crud() {
        contract::schedule_crud(&InMemoryStore::new()).await;
    }
}
