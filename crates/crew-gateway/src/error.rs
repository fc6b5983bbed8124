//! Gateway error types and HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crew_flow::error::Error as FlowError;

/// Gateway result type.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Standard JSON error response body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayErrorBody {
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message (safe for clients).
    pub message: String,
}

/// HTTP/WebSocket-facing error with a stable machine-readable code.
#[derive(Debug)]
pub struct GatewayError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl GatewayError {
    /// Returns an error response for invalid input.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
    }

    /// Returns an error response when the bearer token is missing or invalid.
    pub fn authentication_failed(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "AUTHENTICATION_FAILED", message)
    }

    /// Returns an error response for authorization failures.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    /// Returns an error response for missing resources.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// Returns the 409 response for a claim that lost the race.
    pub fn claim_conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CLAIM_CONFLICT", message)
    }

    /// Returns the 409 response for a forbidden status transition.
    pub fn invalid_transition(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "INVALID_TRANSITION", message)
    }

    /// Returns an internal error response.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the stable machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    /// Returns the human-readable error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for GatewayError {}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(GatewayErrorBody {
                code: self.code.to_string(),
                message: self.message,
            }),
        )
            .into_response()
    }
}

impl From<FlowError> for GatewayError {
    fn from(value: FlowError) -> Self {
        match value {
            FlowError::InvalidTransition { from, to } => {
                Self::invalid_transition(format!("cannot transition from {from} to {to}"))
            }
            FlowError::TaskNotFound { task_id } => Self::not_found(format!("task {task_id}")),
            FlowError::NotificationNotFound { notification_id } => {
                Self::not_found(format!("notification {notification_id}"))
            }
            FlowError::NotOwner { .. } => {
                Self::forbidden("notification belongs to another contractor")
            }
            FlowError::Validation { message } => Self::bad_request(message),
            FlowError::Core(err) => Self::bad_request(err.to_string()),
            FlowError::Storage { message, .. } => Self::internal(message),
        }
    }
}

impl From<crew_core::Error> for GatewayError {
    fn from(value: crew_core::Error) -> Self {
        Self::bad_request(value.to_string())
    }
}
