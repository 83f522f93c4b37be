//! Job store abstraction shared by the producer and the scheduler.

use async_trait::async_trait;
use uuid::Uuid;

use incidenthub_core::result::AppResult;
use incidenthub_entity::job::{CreateJob, Job, JobStatus};

/// Persistence contract for background jobs.
///
/// Implementations are the only code that mutates job rows. Missing rows
/// are reported as `None` or an empty vector, never as errors.
#[async_trait]
pub trait JobStore: Send + Sync + std::fmt::Debug + 'static {
    /// Insert a new `pending` job and return the stored record.
    async fn create(&self, data: &CreateJob) -> AppResult<Job>;

    /// Find a job by ID.
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Job>>;

    /// Atomically claim up to `limit` pending jobs, newest first.
    ///
    /// Every returned job is already `processing`. A job is never returned
    /// to two concurrent callers.
    async fn claim_pending(&self, limit: usize) -> AppResult<Vec<Job>>;

    /// Move a `processing` job to `processed`.
    ///
    /// Returns `false` when the job was not `processing`.
    async fn mark_processed(&self, id: Uuid, result: Option<&serde_json::Value>)
    -> AppResult<bool>;

    /// Move a `processing` job to `error`, recording `exception`.
    ///
    /// Returns `false` when the job was not `processing`.
    async fn mark_errored(&self, id: Uuid, exception: &str) -> AppResult<bool>;

    /// Count jobs with the given status.
    async fn count_by_status(&self, status: JobStatus) -> AppResult<i64>;

    /// List jobs newest first, optionally filtered by status.
    async fn list(&self, status: Option<JobStatus>, limit: usize) -> AppResult<Vec<Job>>;
}
