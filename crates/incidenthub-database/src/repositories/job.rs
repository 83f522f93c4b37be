//! Job repository implementation.

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use incidenthub_core::error::{AppError, ErrorKind};
use incidenthub_core::result::AppResult;
use incidenthub_entity::job::{CreateJob, Job, JobStatus};

use crate::store::JobStore;

/// Repository for background job persistence and queue operations.
#[derive(Debug, Clone)]
pub struct JobRepository {
    pool: PgPool,
}

impl JobRepository {
    /// Create a new job repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Lock up to `limit` pending jobs, newest first (SKIP LOCKED).
    ///
    /// Rows locked by another open transaction are skipped rather than
    /// waited on. The locks are held by `conn`'s transaction, so the caller
    /// must move the rows to `processing` and commit on the same connection.
    pub async fn get_pending_tasks(conn: &mut PgConnection, limit: i64) -> AppResult<Vec<Job>> {
        sqlx::query_as::<_, Job>(
            "SELECT * FROM background_jobs \
             WHERE status = 'pending' \
             ORDER BY created_at DESC \
             LIMIT $1 \
             FOR UPDATE SKIP LOCKED",
        )
        .bind(limit)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to fetch pending jobs", e))
    }
}

#[async_trait]
impl JobStore for JobRepository {
    async fn create(&self, data: &CreateJob) -> AppResult<Job> {
        sqlx::query_as::<_, Job>(
            "INSERT INTO background_jobs (name, queue, payload, is_retryable) \
             VALUES ($1, $2, $3, $4) RETURNING *",
        )
        .bind(&data.name)
        .bind(data.queue_or_default())
        .bind(&data.payload)
        .bind(data.is_retryable)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to create job", e))
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Job>> {
        sqlx::query_as::<_, Job>("SELECT * FROM background_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find job", e))
    }

    async fn claim_pending(&self, limit: usize) -> AppResult<Vec<Job>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to begin claim transaction", e)
        })?;

        let pending = Self::get_pending_tasks(&mut tx, limit as i64).await?;
        if pending.is_empty() {
            tx.rollback().await.map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to end claim transaction", e)
            })?;
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = pending.iter().map(|job| job.id).collect();

        let mut claimed = sqlx::query_as::<_, Job>(
            "UPDATE background_jobs \
             SET status = 'processing', processing_at = NOW(), updated_at = NOW() \
             WHERE id = ANY($1) AND status = 'pending' \
             RETURNING *",
        )
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to claim jobs", e))?;

        tx.commit().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to commit job claim", e)
        })?;

        claimed.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        tracing::debug!(count = claimed.len(), "Claimed pending jobs");
        Ok(claimed)
    }

    async fn mark_processed(
        &self,
        id: Uuid,
        result: Option<&serde_json::Value>,
    ) -> AppResult<bool> {
        let outcome = sqlx::query(
            "UPDATE background_jobs \
             SET status = 'processed', result = $2, processed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(id)
        .bind(result)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to complete job", e))?;

        Ok(outcome.rows_affected() == 1)
    }

    async fn mark_errored(&self, id: Uuid, exception: &str) -> AppResult<bool> {
        let outcome = sqlx::query(
            "UPDATE background_jobs \
             SET status = 'error', exception = $2, errored_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(id)
        .bind(exception)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to mark job as errored", e)
        })?;

        Ok(outcome.rows_affected() == 1)
    }

    async fn count_by_status(&self, status: JobStatus) -> AppResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM background_jobs WHERE status = $1")
            .bind(status)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to count jobs", e))
    }

    async fn list(&self, status: Option<JobStatus>, limit: usize) -> AppResult<Vec<Job>> {
        sqlx::query_as::<_, Job>(
            "SELECT * FROM background_jobs \
             WHERE ($1::background_job_status IS NULL OR status = $1) \
             ORDER BY created_at DESC \
             LIMIT $2",
        )
        .bind(status)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to list jobs", e))
    }
}
