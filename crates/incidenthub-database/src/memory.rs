//! In-process job store.
//!
//! Keeps jobs in memory behind a mutex. Holding the mutex for the whole
//! claim gives the same guarantee as `FOR UPDATE SKIP LOCKED` within one
//! process: a pending job is handed to exactly one caller.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use incidenthub_core::result::AppResult;
use incidenthub_entity::job::{CreateJob, Job, JobStatus};

use crate::store::JobStore;

#[derive(Debug, Default)]
struct Inner {
    /// Jobs in insertion order; later entries are newer.
    jobs: Vec<Job>,
    index: HashMap<Uuid, usize>,
}

impl Inner {
    fn get(&self, id: Uuid) -> Option<&Job> {
        self.jobs.get(*self.index.get(&id)?)
    }

    fn get_mut(&mut self, id: Uuid) -> Option<&mut Job> {
        let pos = *self.index.get(&id)?;
        self.jobs.get_mut(pos)
    }

    fn newest_first(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter().rev()
    }
}

/// Job store that lives in process memory.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

impl MemoryJobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every mutation completes before the guard drops, so a poisoned
        // lock still protects consistent data.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, id: Uuid, next: JobStatus, apply: impl FnOnce(&mut Job)) -> bool {
        let mut inner = self.lock();
        let Some(job) = inner.get_mut(id) else {
            return false;
        };
        if !job.status.can_transition_to(next) {
            tracing::warn!(
                job_id = %id,
                from = %job.status,
                to = %next,
                "Rejected job status transition"
            );
            return false;
        }

        let now = Utc::now();
        job.status = next;
        job.updated_at = now;
        apply(job);
        true
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, data: &CreateJob) -> AppResult<Job> {
        let job = Job::pending(Uuid::now_v7(), data, Utc::now());

        let mut inner = self.lock();
        let pos = inner.jobs.len();
        inner.index.insert(job.id, pos);
        inner.jobs.push(job.clone());
        Ok(job)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Job>> {
        Ok(self.lock().get(id).cloned())
    }

    async fn claim_pending(&self, limit: usize) -> AppResult<Vec<Job>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut inner = self.lock();
        let now = Utc::now();
        let mut claimed = Vec::new();

        for job in inner.jobs.iter_mut().rev() {
            if claimed.len() == limit {
                break;
            }
            if job.status != JobStatus::Pending {
                continue;
            }
            job.status = JobStatus::Processing;
            job.processing_at = Some(now);
            job.updated_at = now;
            claimed.push(job.clone());
        }

        Ok(claimed)
    }

    async fn mark_processed(
        &self,
        id: Uuid,
        result: Option<&serde_json::Value>,
    ) -> AppResult<bool> {
        Ok(self.finish(id, JobStatus::Processed, |job| {
            job.result = result.cloned();
            job.processed_at = Some(job.updated_at);
        }))
    }

    async fn mark_errored(&self, id: Uuid, exception: &str) -> AppResult<bool> {
        Ok(self.finish(id, JobStatus::Error, |job| {
            job.exception = Some(exception.to_string());
            job.errored_at = Some(job.updated_at);
        }))
    }

    async fn count_by_status(&self, status: JobStatus) -> AppResult<i64> {
        let inner = self.lock();
        Ok(inner.jobs.iter().filter(|job| job.status == status).count() as i64)
    }

    async fn list(&self, status: Option<JobStatus>, limit: usize) -> AppResult<Vec<Job>> {
        let inner = self.lock();
        Ok(inner
            .newest_first()
            .filter(|job| status.is_none_or(|s| job.status == s))
            .take(limit)
            .cloned()
            .collect())
    }
}
