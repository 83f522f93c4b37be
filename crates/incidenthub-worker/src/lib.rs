//! Background job processing for IncidentHub.
//!
//! This crate provides:
//! - A typed handler trait and the registry that dispatches jobs by name
//! - A job queue for producers to enqueue and inspect work
//! - A polling scheduler that claims pending jobs and runs them on a
//!   bounded pool of tokio tasks
//! - Built-in diagnostic job handlers
//! - Signal handling shared by the scheduler binaries

pub mod jobs;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod signal;

pub use queue::{JobQueue, QueueStats};
pub use registry::{JobExecutionError, JobHandler, JobRegistry};
pub use scheduler::{BackgroundJobScheduler, SchedulerState};
