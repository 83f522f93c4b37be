//! Integration tests for the scheduler loop against the in-memory store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use incidenthub_core::config::WorkerConfig;
use incidenthub_database::{JobStore, MemoryJobStore};
use incidenthub_entity::job::JobStatus;
use incidenthub_worker::{BackgroundJobScheduler, JobQueue, SchedulerState};

use crate::helpers::{self, CountingStore, RunningScheduler, TestHandlers};

fn scheduler(
    store: Arc<dyn JobStore>,
    handlers: &TestHandlers,
    config: WorkerConfig,
) -> BackgroundJobScheduler {
    BackgroundJobScheduler::new(store, handlers.registry(), config).with_worker_id("worker-test")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failing_job_does_not_stop_the_loop() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let handlers = TestHandlers::new();
    let running = RunningScheduler::start(scheduler(
        Arc::clone(&store),
        &handlers,
        helpers::fast_config(2),
    ));

    let failing = helpers::enqueue(store.as_ref(), "AlwaysFails", json!({})).await;
    let jobs = helpers::wait_until_finished(store.as_ref(), &[failing]).await;
    assert_eq!(jobs[0].status, JobStatus::Error);
    assert!(jobs[0].exception.as_deref().unwrap().contains("always fails"));
    assert!(jobs[0].errored_at.is_some());

    // Enqueued after the failure: still picked up.
    let echo = helpers::enqueue(store.as_ref(), "Echo", json!({ "x": 7 })).await;
    let jobs = helpers::wait_until_finished(store.as_ref(), &[echo]).await;
    assert_eq!(jobs[0].status, JobStatus::Processed);
    assert_eq!(running.scheduler.state(), SchedulerState::Running);

    running.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failure_and_success_in_one_batch() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let handlers = TestHandlers::new();
    let failing = helpers::enqueue(store.as_ref(), "AlwaysFails", json!({})).await;
    let echo = helpers::enqueue(store.as_ref(), "Echo", json!({ "x": 5 })).await;

    let running = RunningScheduler::start(scheduler(
        Arc::clone(&store),
        &handlers,
        helpers::fast_config(2),
    ));
    let jobs = helpers::wait_until_finished(store.as_ref(), &[failing, echo]).await;

    // Claimed together: the memory store stamps a batch with one instant.
    assert!(jobs[0].processing_at.is_some());
    assert_eq!(jobs[0].processing_at, jobs[1].processing_at);

    assert_eq!(jobs[0].status, JobStatus::Error);
    assert!(!jobs[0].exception.as_deref().unwrap_or_default().is_empty());
    assert_eq!(jobs[1].status, JobStatus::Processed);
    assert_eq!(jobs[1].result, Some(json!({ "x": 5 })));
    assert!(jobs[1].exception.is_none());

    let later = helpers::enqueue(store.as_ref(), "Echo", json!({ "x": 6 })).await;
    let jobs = helpers::wait_until_finished(store.as_ref(), &[later]).await;
    assert_eq!(jobs[0].status, JobStatus::Processed);
    assert_eq!(*handlers.echo.seen.lock().unwrap(), vec![5, 6]);

    running.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_disabled_scheduler_never_claims() {
    let store = Arc::new(CountingStore::default());
    let handlers = TestHandlers::new();
    let id = helpers::enqueue(&*store, "Echo", json!({ "x": 1 })).await;
    let config = WorkerConfig {
        enabled: false,
        ..helpers::fast_config(2)
    };

    let scheduler = scheduler(store.clone(), &handlers, config);
    assert!(!scheduler.is_enabled());

    let (_shutdown, rx) = tokio::sync::watch::channel(false);
    tokio::time::timeout(Duration::from_secs(1), scheduler.run(rx))
        .await
        .expect("disabled scheduler kept running");

    assert_eq!(store.claim_calls(), 0);
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
    let job = store.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_handler_receives_decoded_payload() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let handlers = TestHandlers::new();
    let queue = JobQueue::new(Arc::clone(&store));
    let job = queue
        .enqueue("Echo", None, Some(json!({ "x": 1 })))
        .await
        .unwrap();

    let running = RunningScheduler::start(scheduler(
        Arc::clone(&store),
        &handlers,
        helpers::fast_config(4),
    ));
    let jobs = helpers::wait_until_finished(store.as_ref(), &[job.id]).await;
    running.stop().await;

    assert_eq!(jobs[0].status, JobStatus::Processed);
    assert_eq!(jobs[0].result, Some(json!({ "x": 1 })));
    assert!(jobs[0].exception.is_none());
    assert_eq!(*handlers.echo.seen.lock().unwrap(), vec![1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unknown_job_name_is_errored() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let handlers = TestHandlers::new();
    let id = helpers::enqueue(store.as_ref(), "DoesNotExist", json!({})).await;

    let running = RunningScheduler::start(scheduler(
        Arc::clone(&store),
        &handlers,
        helpers::fast_config(2),
    ));
    let jobs = helpers::wait_until_finished(store.as_ref(), &[id]).await;
    running.stop().await;

    assert_eq!(jobs[0].status, JobStatus::Error);
    assert_eq!(
        jobs[0].exception.as_deref(),
        Some("no handler registered for job 'DoesNotExist'")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_invalid_payload_is_errored() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let handlers = TestHandlers::new();
    let id = helpers::enqueue(store.as_ref(), "Echo", json!({ "x": "not a number" })).await;

    let running = RunningScheduler::start(scheduler(
        Arc::clone(&store),
        &handlers,
        helpers::fast_config(2),
    ));
    let jobs = helpers::wait_until_finished(store.as_ref(), &[id]).await;
    running.stop().await;

    assert_eq!(jobs[0].status, JobStatus::Error);
    assert!(
        jobs[0]
            .exception
            .as_deref()
            .unwrap()
            .starts_with("invalid job payload")
    );
    assert!(handlers.echo.seen.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_idle_scheduler_keeps_polling() {
    let store = Arc::new(CountingStore::default());
    let handlers = TestHandlers::new();
    let running = RunningScheduler::start(scheduler(
        store.clone(),
        &handlers,
        helpers::fast_config(2),
    ));

    tokio::time::sleep(Duration::from_millis(200)).await;
    let idle_polls = store.claim_calls();
    assert!(idle_polls >= 3, "only {idle_polls} polls while idle");

    // Work arriving after a long idle stretch is still picked up.
    let id = helpers::enqueue(&*store, "Echo", json!({ "x": 2 })).await;
    let jobs = helpers::wait_until_finished(&*store, &[id]).await;
    assert_eq!(jobs[0].status, JobStatus::Processed);

    running.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_cap_is_exact() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let handlers = TestHandlers::new();

    let mut ids = Vec::new();
    for _ in 0..12 {
        ids.push(helpers::enqueue(store.as_ref(), "Gate", json!({ "millis": 50 })).await);
    }

    let running = RunningScheduler::start(scheduler(
        Arc::clone(&store),
        &handlers,
        helpers::fast_config(3),
    ));

    let mut observed_in_flight = 0;
    loop {
        observed_in_flight = observed_in_flight.max(running.scheduler.in_flight());
        let processed = store.count_by_status(JobStatus::Processed).await.unwrap();
        if processed == ids.len() as i64 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    running.stop().await;

    assert_eq!(handlers.gate.peak(), 3);
    assert!(observed_in_flight <= 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_job_timeout_is_recorded_as_error() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let handlers = TestHandlers::new();
    let config = WorkerConfig {
        job_timeout_seconds: 1,
        ..helpers::fast_config(2)
    };
    let id = helpers::enqueue(store.as_ref(), "Gate", json!({ "millis": 5_000 })).await;

    let running = RunningScheduler::start(scheduler(Arc::clone(&store), &handlers, config));
    let jobs = helpers::wait_until_finished(store.as_ref(), &[id]).await;
    running.stop().await;

    assert_eq!(jobs[0].status, JobStatus::Error);
    assert_eq!(jobs[0].exception.as_deref(), Some("job timed out after 1s"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_panicking_handler_is_isolated() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let handlers = TestHandlers::new();
    let panicking = helpers::enqueue(store.as_ref(), "Panics", json!({})).await;

    let running = RunningScheduler::start(scheduler(
        Arc::clone(&store),
        &handlers,
        helpers::fast_config(1),
    ));
    let jobs = helpers::wait_until_finished(store.as_ref(), &[panicking]).await;
    assert_eq!(jobs[0].status, JobStatus::Error);
    assert!(
        jobs[0]
            .exception
            .as_deref()
            .unwrap()
            .contains("handler exploded")
    );

    // The worker slot was released.
    let echo = helpers::enqueue(store.as_ref(), "Echo", json!({ "x": 3 })).await;
    let jobs = helpers::wait_until_finished(store.as_ref(), &[echo]).await;
    assert_eq!(jobs[0].status, JobStatus::Processed);

    running.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_drains_in_flight_jobs() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let handlers = TestHandlers::new();
    let id = helpers::enqueue(store.as_ref(), "Gate", json!({ "millis": 300 })).await;

    let running = RunningScheduler::start(scheduler(
        Arc::clone(&store),
        &handlers,
        helpers::fast_config(2),
    ));
    helpers::wait_for(store.as_ref(), &[id], |job| {
        job.status == JobStatus::Processing
    })
    .await;

    let mut state = running.scheduler.subscribe();
    running.stop().await;

    // `run` returned only after the job finished.
    let job = store.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Processed);
    assert_eq!(*state.borrow_and_update(), SchedulerState::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_without_drain_returns_immediately() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let handlers = TestHandlers::new();
    let config = WorkerConfig {
        drain_on_shutdown: false,
        ..helpers::fast_config(2)
    };
    let id = helpers::enqueue(store.as_ref(), "Gate", json!({ "millis": 1_000 })).await;

    let running = RunningScheduler::start(scheduler(Arc::clone(&store), &handlers, config));
    helpers::wait_for(store.as_ref(), &[id], |job| {
        job.status == JobStatus::Processing
    })
    .await;

    running.stop().await;
    let job = store.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Processing);

    // The detached worker still records the outcome.
    let jobs = helpers::wait_until_finished(store.as_ref(), &[id]).await;
    assert_eq!(jobs[0].status, JobStatus::Processed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_new_claims_after_shutdown() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let handlers = TestHandlers::new();
    let running = RunningScheduler::start(scheduler(
        Arc::clone(&store),
        &handlers,
        helpers::fast_config(2),
    ));
    running.stop().await;

    let id = helpers::enqueue(store.as_ref(), "Echo", json!({ "x": 4 })).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let job = store.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_closed_shutdown_channel_stops_scheduler() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let handlers = TestHandlers::new();
    let running = RunningScheduler::start(scheduler(
        Arc::clone(&store),
        &handlers,
        helpers::fast_config(2),
    ));

    drop(running.shutdown);
    tokio::time::timeout(Duration::from_secs(5), running.handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();
    assert_eq!(running.scheduler.state(), SchedulerState::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_status_only_moves_forward() {
    fn rank(status: JobStatus) -> u8 {
        match status {
            JobStatus::Pending => 0,
            JobStatus::Processing => 1,
            JobStatus::Processed | JobStatus::Error => 2,
        }
    }

    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let handlers = TestHandlers::new();

    let mut ids = Vec::new();
    for i in 0..20 {
        let (name, payload) = match i % 4 {
            0 => ("Echo", json!({ "x": i })),
            1 => ("AlwaysFails", json!({})),
            2 => ("Gate", json!({ "millis": 20 })),
            _ => ("DoesNotExist", json!({})),
        };
        ids.push(helpers::enqueue(store.as_ref(), name, payload).await);
    }

    let running = RunningScheduler::start(scheduler(
        Arc::clone(&store),
        &handlers,
        helpers::fast_config(3),
    ));

    let mut last_seen: HashMap<_, JobStatus> = HashMap::new();
    loop {
        let mut all_finished = true;
        for job in store.list(None, 100).await.unwrap() {
            if let Some(previous) = last_seen.get(&job.id) {
                assert!(
                    rank(job.status) >= rank(*previous),
                    "job {} went from {} to {}",
                    job.id,
                    previous,
                    job.status
                );
                if previous.is_terminal() {
                    assert_eq!(job.status, *previous);
                }
            }
            all_finished &= job.status.is_terminal();
            last_seen.insert(job.id, job.status);
        }
        if all_finished {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    running.stop().await;

    assert_eq!(last_seen.len(), ids.len());
    assert_eq!(store.count_by_status(JobStatus::Processed).await.unwrap(), 10);
    assert_eq!(store.count_by_status(JobStatus::Error).await.unwrap(), 10);
}
