//! Job queue: the producer side of background jobs.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing;
use uuid::Uuid;

use incidenthub_core::error::AppError;
use incidenthub_core::result::AppResult;
use incidenthub_database::store::JobStore;
use incidenthub_entity::job::{CreateJob, Job, JobStatus};

use crate::registry::JobHandler;

/// Job queue for enqueuing and inspecting work.
///
/// Each enqueue is committed on its own, independently of any caller
/// transaction.
#[derive(Debug, Clone)]
pub struct JobQueue {
    /// Backing job store.
    store: Arc<dyn JobStore>,
}

impl JobQueue {
    /// Create a new job queue
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Enqueue a job by name.
    ///
    /// `queue` defaults to `"default"`; `payload` defaults to `{}` and must
    /// be a JSON object.
    pub async fn enqueue(
        &self,
        name: &str,
        queue: Option<&str>,
        payload: Option<Value>,
    ) -> AppResult<Job> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::validation("job name cannot be empty"));
        }

        let mut data = CreateJob::new(name);
        if let Some(queue) = queue {
            data = data.with_queue(queue);
        }
        if let Some(payload) = payload {
            if !payload.is_object() {
                return Err(AppError::validation("job payload must be a JSON object"));
            }
            data = data.with_payload(payload);
        }

        let job = self.store.create(&data).await?;

        tracing::debug!(
            job_id = %job.id,
            job_name = %job.name,
            queue = %job.queue,
            "Enqueued job"
        );

        Ok(job)
    }

    /// Enqueue a job for handler `H`, serializing its typed parameters.
    pub async fn enqueue_job<H: JobHandler>(
        &self,
        queue: Option<&str>,
        params: &H::Params,
    ) -> AppResult<Job> {
        let payload = serde_json::to_value(params)?;
        self.enqueue(H::NAME, queue, Some(payload)).await
    }

    /// Look up a job by ID.
    pub async fn get(&self, id: Uuid) -> AppResult<Option<Job>> {
        self.store.find_by_id(id).await
    }

    /// Look up a job by ID, failing with a not-found error if it is missing.
    pub async fn require(&self, id: Uuid) -> AppResult<Job> {
        self.get(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Job {id} not found")))
    }

    /// List jobs newest first.
    pub async fn list(&self, status: Option<JobStatus>, limit: usize) -> AppResult<Vec<Job>> {
        self.store.list(status, limit).await
    }

    /// Get queue statistics
    pub async fn stats(&self) -> AppResult<QueueStats> {
        Ok(QueueStats {
            pending: self.store.count_by_status(JobStatus::Pending).await?,
            processing: self.store.count_by_status(JobStatus::Processing).await?,
            processed: self.store.count_by_status(JobStatus::Processed).await?,
            error: self.store.count_by_status(JobStatus::Error).await?,
        })
    }
}

/// Queue statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Number of pending jobs
    pub pending: i64,
    /// Number of claimed, unfinished jobs
    pub processing: i64,
    /// Number of successful jobs
    pub processed: i64,
    /// Number of failed jobs
    pub error: i64,
}
