//! Echo job: logs a message and returns it as the job result.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing;

use crate::registry::{JobExecutionError, JobHandler};

/// Parameters for [`EchoJob`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoParams {
    /// Text to log and return.
    #[serde(default)]
    pub message: String,
}

/// Diagnostic job for checking that a scheduler picks up work.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoJob;

#[async_trait]
impl JobHandler for EchoJob {
    const NAME: &'static str = "Echo";
    type Params = EchoParams;

    async fn execute(&self, params: EchoParams) -> Result<Option<Value>, JobExecutionError> {
        tracing::info!(message = %params.message, "Echo job");
        Ok(Some(serde_json::json!({ "message": params.message })))
    }
}
