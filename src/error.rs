use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

/// Error type shared by the backend client, the route handlers and startup.
#[derive(Debug, thiserror::Error)]
pub enum DashboardError {
    /// The request to the backend never produced a response.
    #[error("request to {endpoint} failed: {source}")]
    Network {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The backend answered but the body could not be decoded.
    #[error("unreadable response from {endpoint}: {message}")]
    Decode {
        endpoint: &'static str,
        message: String,
    },

    /// Non-2xx status, or a mutation answered with `status != 1`.
    #[error("{message}")]
    Application {
        endpoint: &'static str,
        http_status: Option<u16>,
        message: String,
    },

    /// Rejected before any network call.
    #[error("{0}")]
    Validation(String),

    #[error("Invalid access code. Please try again.")]
    InvalidPassword,

    #[error("admin session required")]
    Unauthorized,

    #[error("{0} is already in progress")]
    Busy(String),

    #[error("no pending action with id {0}")]
    NotFound(Uuid),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a failure should be presented to the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientNetwork,
    Application,
    Validation,
    Unauthorized,
    Conflict,
    NotFound,
    Internal,
}

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: &'static str,
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_action: Option<Uuid>,
}

impl DashboardError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DashboardError::Network { .. } | DashboardError::Decode { .. } => {
                ErrorKind::TransientNetwork
            }
            DashboardError::Application { .. } => ErrorKind::Application,
            DashboardError::Validation(_) => ErrorKind::Validation,
            DashboardError::InvalidPassword | DashboardError::Unauthorized => {
                ErrorKind::Unauthorized
            }
            DashboardError::Busy(_) => ErrorKind::Conflict,
            DashboardError::NotFound(_) => ErrorKind::NotFound,
            DashboardError::Config(_) | DashboardError::Io(_) => ErrorKind::Internal,
        }
    }

    /// Only failures that reached (or tried to reach) the backend are worth re-sending.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TransientNetwork | ErrorKind::Application
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::TransientNetwork | ErrorKind::Application => StatusCode::BAD_GATEWAY,
            ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            status: "error",
            kind: self.kind(),
            message: self.to_string(),
            retryable: self.is_retryable(),
            retry_action: None,
        }
    }

    /// Response for a failed mutation that was parked in the action queue.
    pub fn into_response_with_retry(self, action: Uuid) -> Response {
        let mut body = self.to_body();
        body.retry_action = Some(action);
        (self.status_code(), Json(body)).into_response()
    }
}

impl IntoResponse for DashboardError {
    fn into_response(self) -> Response {
        match self.kind() {
            ErrorKind::Internal => tracing::error!(error = %self, "request failed"),
            ErrorKind::TransientNetwork | ErrorKind::Application => {
                tracing::warn!(error = %self, "backend call failed")
            }
            _ => tracing::debug!(error = %self, "request rejected"),
        }
        (self.status_code(), Json(self.to_body())).into_response()
    }
}
