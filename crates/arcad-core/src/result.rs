//! Convenience result type alias for ARCAD.

use crate::error::AppError;

/// A specialized `Result` type for ARCAD operations.
pub type AppResult<T> = Result<T, AppError>;
