//! Convenience result type alias for IncidentHub.

use crate::error::AppError;

/// A specialized `Result` type for IncidentHub operations.
pub type AppResult<T> = Result<T, AppError>;
