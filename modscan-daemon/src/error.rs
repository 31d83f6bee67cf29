//! HTTP-facing error type.
//!
//! Every handler error becomes a plain-text body with a non-200 status;
//! clients show the body verbatim.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use modscan_core::error::{StorageError, WarehouseError};
use modscan_jobs::JobError;
use modscan_scanner::ScanError;

/// Error returned by control-surface handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed or incomplete request.
    #[error("{0}")]
    BadRequest(String),

    /// Missing or wrong bearer token.
    #[error("unauthorized")]
    Unauthorized,

    /// Unknown job or object.
    #[error("{0}")]
    NotFound(String),

    /// Job ID already taken.
    #[error("{0}")]
    Conflict(String),

    /// Task queue is closed.
    #[error("{0}")]
    Unavailable(String),

    /// Backend failure.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "request rejected");
        }
        (status, self.to_string()).into_response()
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(_) => Self::NotFound(err.to_string()),
            JobError::AlreadyExists(_) => Self::Conflict(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<ScanError> for ApiError {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::InvalidRequest(_) => Self::BadRequest(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<WarehouseError> for ApiError {
    fn from(err: WarehouseError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => Self::NotFound(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_errors_map_to_status() {
        let bad = ApiError::from(ScanError::InvalidRequest("empty version".to_owned()));
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

        let backend = ApiError::from(ScanError::Warehouse(WarehouseError::Query(
            "connection reset".to_owned(),
        )));
        assert_eq!(backend.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(backend.to_string().contains("connection reset"));
    }
}
