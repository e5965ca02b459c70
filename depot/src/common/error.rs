//! Request Error Types
//!
//! Handler-level failures and their HTTP status mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Errors a request handler can answer with.
///
/// Manifest load failures never show up here: handlers only ever see a
/// snapshot or its absence.
#[derive(Debug, thiserror::Error)]
pub enum DepotError {
    #[error("Package not loaded")]
    NotLoaded,

    #[error("No versions published")]
    NoVersions,

    #[error("Version not found")]
    NotFound(String),

    #[error("Too many requests")]
    OverCapacity,

    #[error("Package file unavailable: {0}")]
    Io(#[from] std::io::Error),
}

impl DepotError {
    pub fn status(&self) -> StatusCode {
        match self {
            DepotError::NotLoaded => StatusCode::SERVICE_UNAVAILABLE,
            DepotError::NoVersions | DepotError::NotFound(_) => StatusCode::NOT_FOUND,
            DepotError::OverCapacity => StatusCode::TOO_MANY_REQUESTS,
            DepotError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DepotError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
            // I/O details stay in the log.
            return (status, "Internal server error").into_response();
        }
        (status, self.to_string()).into_response()
    }
}
