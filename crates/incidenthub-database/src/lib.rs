//! # incidenthub-database
//!
//! PostgreSQL connection management, migrations, and the job stores used
//! by the background scheduler: [`JobRepository`] on PostgreSQL and
//! [`MemoryJobStore`] for single-process use.

pub mod connection;
pub mod memory;
pub mod migration;
pub mod repositories;
pub mod store;

pub use connection::DatabasePool;
pub use memory::MemoryJobStore;
pub use repositories::JobRepository;
pub use store::JobStore;
