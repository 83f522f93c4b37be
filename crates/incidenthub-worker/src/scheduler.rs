//! Background job scheduler. Claims pending jobs and runs them on a
//! bounded pool of tokio tasks.
//!
//! The loop never waits on workers: it claims at most as many jobs as there
//! are free worker permits, spawns one task per job, and backs off briefly
//! when the pool is full or the queue is empty. Each worker holds its permit
//! until the job's terminal status has been written, so the number of jobs
//! in flight never exceeds the configured concurrency.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::time;
use tracing::{self, Instrument};
use uuid::Uuid;

use incidenthub_core::config::WorkerConfig;
use incidenthub_database::store::JobStore;
use incidenthub_entity::job::Job;

use crate::registry::{JobExecutionError, JobRegistry};

/// Largest usable concurrency: bounded by the semaphore's permit limit and
/// by `acquire_many`, which takes a `u32`.
pub const MAX_CONCURRENCY: usize = if Semaphore::MAX_PERMITS < u32::MAX as usize {
    Semaphore::MAX_PERMITS
} else {
    u32::MAX as usize
};

/// Lifecycle of the scheduler loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Polling and dispatching jobs.
    Running,
    /// Shutdown requested; no new claims, in-flight jobs may still run.
    Draining,
    /// Not running.
    Stopped,
}

/// Polling scheduler that executes claimed jobs concurrently.
#[derive(Debug)]
pub struct BackgroundJobScheduler {
    /// Job store used to claim and finish jobs
    store: Arc<dyn JobStore>,
    /// Handlers by job name
    registry: Arc<JobRegistry>,
    /// Scheduler configuration
    config: WorkerConfig,
    /// Identifier used in logs
    worker_id: String,
    /// Maximum concurrent jobs
    concurrency: usize,
    /// One permit per free worker slot
    permits: Arc<Semaphore>,
    state: watch::Sender<SchedulerState>,
}

impl BackgroundJobScheduler {
    /// Create a new scheduler.
    ///
    /// The configured concurrency is clamped to `1..=MAX_CONCURRENCY`.
    pub fn new(store: Arc<dyn JobStore>, registry: Arc<JobRegistry>, config: WorkerConfig) -> Self {
        let concurrency = config.concurrency.clamp(1, MAX_CONCURRENCY);
        if concurrency != config.concurrency {
            tracing::warn!(
                configured = config.concurrency,
                effective = concurrency,
                "Worker concurrency out of range; clamped"
            );
        }
        let worker_id = format!("worker-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let (state, _) = watch::channel(SchedulerState::Stopped);

        Self {
            store,
            registry,
            config,
            worker_id,
            concurrency,
            permits: Arc::new(Semaphore::new(concurrency)),
            state,
        }
    }

    /// Override the worker identifier.
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    /// Worker identifier used in logs.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Maximum number of concurrently executing jobs.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Whether `run` will poll at all.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Number of jobs currently executing.
    pub fn in_flight(&self) -> usize {
        self.concurrency - self.permits.available_permits()
    }

    /// Current loop state.
    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Watch loop state changes.
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Run the scheduler until `shutdown` becomes `true` (or its sender is
    /// dropped). Returns immediately when `enabled` is off.
    ///
    /// With `drain_on_shutdown` the call returns once in-flight jobs finish
    /// or the grace period elapses; otherwise it returns right away and
    /// running jobs complete in the background.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if !self.config.enabled {
            tracing::warn!(
                worker_id = %self.worker_id,
                "Background worker disabled by configuration; not polling"
            );
            return;
        }

        self.state.send_replace(SchedulerState::Running);

        tracing::info!(
            worker_id = %self.worker_id,
            concurrency = self.concurrency,
            handlers = ?self.registry.registered_names(),
            "Background job scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                tracing::info!(worker_id = %self.worker_id, "Scheduler received shutdown signal");
                break;
            }

            let Some(backoff) = self.poll_once().await else {
                continue;
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        tracing::info!(worker_id = %self.worker_id, "Shutdown channel closed");
                        break;
                    }
                }
                _ = time::sleep(backoff) => {}
            }
        }

        self.state.send_replace(SchedulerState::Draining);

        if self.config.drain_on_shutdown {
            self.drain().await;
        } else if self.in_flight() > 0 {
            tracing::info!(
                worker_id = %self.worker_id,
                in_flight = self.in_flight(),
                "Not waiting for in-flight jobs"
            );
        }

        self.state.send_replace(SchedulerState::Stopped);
        tracing::info!(worker_id = %self.worker_id, "Background job scheduler stopped");
    }

    /// One polling iteration. Returns the back-off to apply before the next
    /// one, or `None` to poll again immediately.
    async fn poll_once(&self) -> Option<Duration> {
        let available = self.permits.available_permits();
        if available == 0 {
            tracing::trace!("All worker slots occupied");
            return Some(self.config.busy_backoff());
        }

        let jobs = match self.store.claim_pending(available).await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!(worker_id = %self.worker_id, error = %e, "Failed to claim pending jobs");
                return Some(self.config.idle_backoff());
            }
        };

        if jobs.is_empty() {
            tracing::trace!("No pending jobs");
            return Some(self.config.idle_backoff());
        }

        tracing::debug!(worker_id = %self.worker_id, count = jobs.len(), "Claimed jobs");

        for job in jobs {
            match Arc::clone(&self.permits).acquire_owned().await {
                Ok(permit) => self.spawn_worker(job, permit),
                Err(_) => {
                    let reason = "scheduler stopped before the job was dispatched";
                    if let Err(e) = self.store.mark_errored(job.id, reason).await {
                        tracing::error!(job_id = %job.id, error = %e, "Failed to record job error");
                    }
                }
            }
        }

        None
    }

    fn spawn_worker(&self, job: Job, permit: OwnedSemaphorePermit) {
        let store = Arc::clone(&self.store);
        let registry = Arc::clone(&self.registry);
        let timeout = self.config.job_timeout();
        let span = tracing::info_span!(
            "job",
            job_id = %job.id,
            job_name = %job.name,
            worker_id = %self.worker_id
        );

        tokio::spawn(
            async move {
                let _permit = permit;
                process_job(store.as_ref(), &registry, job.id, timeout).await;
            }
            .instrument(span),
        );
    }

    async fn drain(&self) {
        let in_flight = self.in_flight();
        if in_flight == 0 {
            return;
        }

        tracing::info!(
            worker_id = %self.worker_id,
            in_flight,
            "Waiting for in-flight jobs to complete..."
        );

        let Ok(all) = u32::try_from(self.concurrency) else {
            tracing::error!(
                worker_id = %self.worker_id,
                concurrency = self.concurrency,
                "Concurrency exceeds the drainable permit count; not waiting"
            );
            return;
        };
        match time::timeout(self.config.shutdown_grace(), self.permits.acquire_many(all)).await {
            Ok(Ok(_)) => tracing::info!(worker_id = %self.worker_id, "In-flight jobs drained"),
            Ok(Err(e)) => tracing::error!(
                worker_id = %self.worker_id,
                error = %e,
                "Worker permits closed while draining"
            ),
            Err(_) => tracing::warn!(
                worker_id = %self.worker_id,
                in_flight = self.in_flight(),
                "Shutdown grace period elapsed with jobs still running"
            ),
        }
    }
}

/// Execute one claimed job and record its terminal status.
///
/// Failures of any kind end in `error`; nothing propagates to the caller.
async fn process_job(
    store: &dyn JobStore,
    registry: &JobRegistry,
    job_id: Uuid,
    timeout: Option<Duration>,
) {
    let job = match store.find_by_id(job_id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            tracing::warn!("Claimed job disappeared before execution");
            return;
        }
        Err(e) => {
            tracing::error!(%job_id, error = %e, "Failed to load claimed job");
            let reason = format!("failed to load claimed job: {e}");
            match store.mark_errored(job_id, &reason).await {
                Ok(true) => {}
                Ok(false) => tracing::warn!(%job_id, "Claimed job was no longer processing"),
                Err(e) => tracing::error!(
                    %job_id,
                    error = %e,
                    "Failed to record job error; job left in processing"
                ),
            }
            return;
        }
    };

    tracing::info!("Processing job");
    let started = Instant::now();

    match execute(registry, &job, timeout).await {
        Ok(result) => match store.mark_processed(job.id, result.as_ref()).await {
            Ok(true) => tracing::info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Job processed"
            ),
            Ok(false) => tracing::warn!("Job was no longer processing; result discarded"),
            Err(e) => tracing::error!(error = %e, "Failed to mark job as processed"),
        },
        Err(err) => {
            tracing::warn!(
                error = %err,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Job failed"
            );
            match store.mark_errored(job.id, &err.to_string()).await {
                Ok(true) => {}
                Ok(false) => tracing::warn!("Job was no longer processing; error discarded"),
                Err(e) => tracing::error!(error = %e, "Failed to mark job as errored"),
            }
        }
    }
}

/// Dispatch with panic capture and the optional time limit.
async fn execute(
    registry: &JobRegistry,
    job: &Job,
    timeout: Option<Duration>,
) -> Result<Option<Value>, JobExecutionError> {
    let guarded = AssertUnwindSafe(registry.dispatch(job)).catch_unwind();

    let outcome = match timeout {
        Some(limit) => match time::timeout(limit, guarded).await {
            Ok(outcome) => outcome,
            Err(_) => return Err(JobExecutionError::Timeout(limit)),
        },
        None => guarded.await,
    };

    outcome.unwrap_or_else(|panic| Err(JobExecutionError::Panicked(panic_message(panic.as_ref()))))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
