//! Job entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::status::JobStatus;

/// Queue label used when a producer does not name one.
pub const DEFAULT_QUEUE: &str = "default";

/// A background job.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Job {
    /// Unique job identifier.
    pub id: Uuid,
    /// Registered handler name (e.g., `"SendIncidentDigest"`).
    pub name: String,
    /// Queue name.
    pub queue: String,
    /// Current job status.
    pub status: JobStatus,
    /// Handler parameters (JSON object).
    pub payload: serde_json::Value,
    /// Data returned by a successful handler.
    pub result: Option<serde_json::Value>,
    /// Failure description when `status` is `error`.
    pub exception: Option<String>,
    /// Persisted for producers; the scheduler does not retry.
    pub is_retryable: bool,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
    /// When the job was claimed.
    pub processing_at: Option<DateTime<Utc>>,
    /// When the job finished successfully.
    pub processed_at: Option<DateTime<Utc>>,
    /// When the job failed.
    pub errored_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Build a pending job from creation data, as stored by a fresh insert.
    pub fn pending(id: Uuid, data: &CreateJob, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: data.name.clone(),
            queue: data.queue_or_default().to_string(),
            status: JobStatus::Pending,
            payload: data.payload.clone(),
            result: None,
            exception: None,
            is_retryable: data.is_retryable,
            created_at: now,
            updated_at: now,
            processing_at: None,
            processed_at: None,
            errored_at: None,
        }
    }

    /// Check if the job reached `processed` or `error`.
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Data required to create a new job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJob {
    /// Handler name.
    pub name: String,
    /// Queue name (`None` = [`DEFAULT_QUEUE`]).
    pub queue: Option<String>,
    /// Handler parameters.
    pub payload: serde_json::Value,
    /// Retry hint stored alongside the job.
    pub is_retryable: bool,
}

impl CreateJob {
    /// Creation data for `name` with an empty payload on the default queue.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue: None,
            payload: serde_json::Value::Object(Default::default()),
            is_retryable: false,
        }
    }

    /// Set the queue.
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Set the payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// The queue label that will be persisted.
    pub fn queue_or_default(&self) -> &str {
        self.queue
            .as_deref()
            .filter(|q| !q.trim().is_empty())
            .unwrap_or(DEFAULT_QUEUE)
    }
}
