//! Background job domain entities.

pub mod model;
pub mod status;

pub use model::{CreateJob, DEFAULT_QUEUE, Job};
pub use status::JobStatus;
