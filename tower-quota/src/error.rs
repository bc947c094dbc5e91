use std::time::Duration;

use quota_limit::StoreError;
use quota_limit::TaskId;

/// Errors produced at the Tower Quota boundary.
///
/// `NotFound` and `QuotaExceeded` are ordinary outcomes of a submission, kept
/// distinct from `StoreUnavailable` so clients can show "no longer available"
/// instead of "try again".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuotaError {
    /// The referenced task does not exist.
    ///
    /// When the `axum` feature is enabled, this converts to `404 Not Found`.
    #[error("Task not found")]
    NotFound { task_id: TaskId },

    /// The task has already admitted all the submissions it allows.
    ///
    /// When the `axum` feature is enabled, this converts to `409 Conflict`.
    #[error("Max submissions reached")]
    QuotaExceeded {
        task_id: TaskId,
        max_submissions: u32,
    },

    /// A task definition was rejected.
    ///
    /// When the `axum` feature is enabled, this converts to `400 Bad Request`.
    #[error("Invalid payload")]
    InvalidPayload,

    /// The counter store failed. Nothing was committed.
    ///
    /// The string contains the `Display` representation of the store error.
    /// When the `axum` feature is enabled, this converts to `500 Internal Server Error`.
    #[error("Counter store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<StoreError> for QuotaError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidTask(_) => Self::InvalidPayload,
            other => Self::StoreUnavailable(other.to_string()),
        }
    }
}

/// Why a notification was not delivered. Only ever logged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    #[error("notification timed out after {0:?}")]
    Timeout(Duration),

    #[error("notification transport failed: {0}")]
    Transport(String),

    #[error("notification receiver answered with status {0}")]
    Status(u16),
}

impl From<reqwest::Error> for NotifyError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::Status(status.as_u16()),
            None => Self::Transport(err.to_string()),
        }
    }
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for QuotaError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::QuotaExceeded { .. } => StatusCode::CONFLICT,
            Self::InvalidPayload => StatusCode::BAD_REQUEST,
            Self::StoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
