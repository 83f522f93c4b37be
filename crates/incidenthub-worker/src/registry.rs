//! Job registry mapping job names to typed handlers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::{Deserialize, DeserializeOwned};
use serde_json::Value;
use tracing;

use incidenthub_core::error::AppError;
use incidenthub_entity::job::Job;

/// Trait for job handler implementations.
///
/// Each handler declares the name jobs are enqueued under and the typed
/// parameters its payload decodes into.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Name jobs for this handler are enqueued with.
    const NAME: &'static str;

    /// Parameters decoded from the job payload.
    type Params: DeserializeOwned + Serialize + Send + 'static;

    /// Execute the job.
    async fn execute(&self, params: Self::Params) -> Result<Option<Value>, JobExecutionError>;
}

/// Error from job dispatch or execution.
///
/// The `Display` text is what gets persisted in the job's `exception`.
#[derive(Debug, thiserror::Error)]
pub enum JobExecutionError {
    /// No handler is registered under the job's name.
    #[error("no handler registered for job '{0}'")]
    UnknownJob(String),

    /// The payload does not decode into the handler's parameters.
    #[error("invalid job payload: {0}")]
    InvalidPayload(#[source] serde_json::Error),

    /// The handler reported a failure.
    #[error("{0}")]
    Failed(String),

    /// The handler exceeded the configured execution limit.
    #[error("job timed out after {0:?}")]
    Timeout(Duration),

    /// The handler panicked.
    #[error("job handler panicked: {0}")]
    Panicked(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(#[from] AppError),
}

impl JobExecutionError {
    /// Build a handler failure from any displayable error.
    pub fn failed(message: impl fmt::Display) -> Self {
        Self::Failed(message.to_string())
    }
}

#[async_trait]
trait ErasedHandler: Send + Sync {
    async fn call(&self, payload: &Value) -> Result<Option<Value>, JobExecutionError>;
}

struct Typed<H>(H);

#[async_trait]
impl<H: JobHandler> ErasedHandler for Typed<H> {
    async fn call(&self, payload: &Value) -> Result<Option<Value>, JobExecutionError> {
        let params = H::Params::deserialize(payload).map_err(JobExecutionError::InvalidPayload)?;
        self.0.execute(params).await
    }
}

/// Dispatches jobs to the handler registered under their name.
///
/// Populate the registry before the scheduler starts; it is shared
/// read-only afterwards.
#[derive(Default)]
pub struct JobRegistry {
    handlers: HashMap<&'static str, Arc<dyn ErasedHandler>>,
}

impl JobRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under [`JobHandler::NAME`].
    ///
    /// A later registration for the same name replaces the earlier one.
    pub fn register<H: JobHandler>(&mut self, handler: H) -> &mut Self {
        if self
            .handlers
            .insert(H::NAME, Arc::new(Typed(handler)))
            .is_some()
        {
            tracing::warn!("Replaced job handler for '{}'", H::NAME);
        } else {
            tracing::debug!("Registered job handler for '{}'", H::NAME);
        }
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<H: JobHandler>(mut self, handler: H) -> Self {
        self.register(handler);
        self
    }

    /// Resolve, decode, and execute a job.
    pub async fn dispatch(&self, job: &Job) -> Result<Option<Value>, JobExecutionError> {
        let handler = self
            .handlers
            .get(job.name.as_str())
            .ok_or_else(|| JobExecutionError::UnknownJob(job.name.clone()))?;

        handler.call(&job.payload).await
    }

    /// Check if a handler is registered for a job name.
    pub fn has_handler(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered job names, sorted.
    pub fn registered_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("handlers", &self.registered_names())
            .finish()
    }
}
