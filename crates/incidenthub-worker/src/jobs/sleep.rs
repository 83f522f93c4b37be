//! Sleep job: holds a worker slot for a fixed time.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::{JobExecutionError, JobHandler};

/// Longest sleep a job may request.
pub const MAX_SLEEP_MS: u64 = 10 * 60 * 1000;

/// Parameters for [`SleepJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepParams {
    /// Sleep duration in milliseconds.
    pub millis: u64,
}

/// Diagnostic job for exercising concurrency limits and timeouts.
#[derive(Debug, Default, Clone, Copy)]
pub struct SleepJob;

#[async_trait]
impl JobHandler for SleepJob {
    const NAME: &'static str = "Sleep";
    type Params = SleepParams;

    async fn execute(&self, params: SleepParams) -> Result<Option<Value>, JobExecutionError> {
        if params.millis > MAX_SLEEP_MS {
            return Err(JobExecutionError::failed(format!(
                "sleep of {}ms exceeds the {}ms limit",
                params.millis, MAX_SLEEP_MS
            )));
        }

        tokio::time::sleep(Duration::from_millis(params.millis)).await;
        Ok(Some(serde_json::json!({ "slept_ms": params.millis })))
    }
}
