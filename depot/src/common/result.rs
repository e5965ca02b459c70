//! Common Result Type

use super::error::DepotError;

/// Handler result type; the error side renders as an HTTP status.
pub type DepotResult<T> = Result<T, DepotError>;
