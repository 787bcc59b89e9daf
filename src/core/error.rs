//! Error type system for Rent Kenya
//!
//! This module provides the error taxonomy shared by the store, the auth core
//! and the HTTP layer:
//! - HTTP status code mapping
//! - Client-safe messages (internal failures never leak driver details)
//! - Trace IDs on every error response

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generic message returned for every 5xx error
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Fixed message for reset-ticket failures, whatever the underlying cause
pub const INVALID_TICKET_MESSAGE: &str = "Password reset token is invalid or has expired";

/// Main error type for the Rent Kenya system
#[derive(Debug, thiserror::Error)]
pub enum RentError {
    // System-level errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    PoolError(String),

    #[error("Password hashing failed: {0}")]
    HashingError(String),

    #[error("Token encoding failed: {0}")]
    TokenError(String),

    // API-related errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Password reset token is invalid or has expired")]
    InvalidOrExpiredTicket,

    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Account locked until {until}")]
    AccountLocked { until: DateTime<Utc> },

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    // I/O errors
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Task error: {0}")]
    TaskError(String),
}

impl RentError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            RentError::InvalidRequest(_)
            | RentError::ValidationError(_)
            | RentError::InvalidOrExpiredTicket => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            RentError::AuthenticationError(_) => StatusCode::UNAUTHORIZED,

            // 403 Forbidden
            RentError::PermissionDenied(_) => StatusCode::FORBIDDEN,

            // 404 Not Found
            RentError::NotFound(_) => StatusCode::NOT_FOUND,

            // 409 Conflict
            RentError::Conflict(_) => StatusCode::CONFLICT,

            // 423 Locked
            RentError::AccountLocked { .. } => StatusCode::LOCKED,

            // 429 Too Many Requests
            RentError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            RentError::ConfigError(_)
            | RentError::DatabaseError(_)
            | RentError::PoolError(_)
            | RentError::HashingError(_)
            | RentError::TokenError(_)
            | RentError::IoError(_)
            | RentError::TaskError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error type name for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            RentError::InvalidRequest(_) | RentError::ValidationError(_) => "ValidationError",
            RentError::InvalidOrExpiredTicket => "InvalidOrExpiredTicket",
            RentError::AuthenticationError(_) => "AuthenticationError",
            RentError::PermissionDenied(_) => "AuthorizationError",
            RentError::NotFound(_) => "NotFoundError",
            RentError::Conflict(_) => "ConflictError",
            RentError::AccountLocked { .. } => "LockedError",
            RentError::RateLimited(_) => "RateLimitExceeded",
            RentError::ConfigError(_)
            | RentError::DatabaseError(_)
            | RentError::PoolError(_)
            | RentError::HashingError(_)
            | RentError::TokenError(_)
            | RentError::IoError(_)
            | RentError::TaskError(_) => "InternalError",
        }
    }

    /// Message that is safe to hand to the caller
    pub fn public_message(&self) -> String {
        match self {
            RentError::InvalidRequest(msg)
            | RentError::ValidationError(msg)
            | RentError::AuthenticationError(msg)
            | RentError::PermissionDenied(msg)
            | RentError::NotFound(msg)
            | RentError::Conflict(msg)
            | RentError::RateLimited(msg) => msg.clone(),
            RentError::InvalidOrExpiredTicket => INVALID_TICKET_MESSAGE.to_string(),
            RentError::AccountLocked { until } => {
                let minutes = (*until - Utc::now()).num_minutes().max(0) + 1;
                format!(
                    "Account is temporarily locked after repeated failed logins. Try again in {} minute(s)",
                    minutes
                )
            }
            _ => INTERNAL_ERROR_MESSAGE.to_string(),
        }
    }

    /// Whether this is a server-side failure that must be logged with full context
    pub fn is_internal(&self) -> bool {
        self.status_code().is_server_error()
    }
}

/// Malformed or mistyped JSON bodies are client errors
impl From<axum::extract::rejection::JsonRejection> for RentError {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        RentError::InvalidRequest(rejection.body_text())
    }
}

/// Map SQLite UNIQUE violations to a conflict, everything else stays a store failure
pub fn map_unique_violation(err: rusqlite::Error, what: &str) -> RentError {
    if let rusqlite::Error::SqliteFailure(ref code, _) = err {
        if code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE {
            return RentError::Conflict(format!("{} already exists", what));
        }
    }
    RentError::DatabaseError(err)
}

/// Error response structure for API endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error type identifier
    pub error: String,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Unique trace ID for this error
    pub trace_id: String,
}

impl ErrorResponse {
    /// Create a new error response carrying the current request's trace ID
    ///
    /// Outside a request a fresh ID is generated.
    pub fn new(error: String, message: String) -> Self {
        Self {
            error,
            message,
            details: None,
            trace_id: crate::api::middleware::trace::current_trace_id()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
        }
    }

    /// Create an error response with additional details
    pub fn with_details(error: String, message: String, details: serde_json::Value) -> Self {
        Self {
            details: Some(details),
            ..Self::new(error, message)
        }
    }

    /// Create an error response from a RentError
    pub fn from_error(error: &RentError) -> Self {
        let response = Self::new(error.error_type().to_string(), error.public_message());
        match error {
            RentError::AccountLocked { until } => Self {
                details: Some(serde_json::json!({ "lockout_until": until.to_rfc3339() })),
                ..response
            },
            _ => response,
        }
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} (trace_id: {})", self.error, self.message, self.trace_id)
    }
}

/// Implement IntoResponse for RentError to enable automatic error handling in Axum
impl IntoResponse for RentError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let error_response = ErrorResponse::from_error(&self);

        if self.is_internal() {
            tracing::error!(
                error_type = self.error_type(),
                trace_id = %error_response.trace_id,
                status_code = %status_code,
                "Request failed: {}",
                self
            );
        } else {
            tracing::debug!(
                error_type = self.error_type(),
                trace_id = %error_response.trace_id,
                status_code = %status_code,
                "Request rejected: {}",
                self
            );
        }

        (status_code, Json(error_response)).into_response()
    }
}

/// Result type alias for operations that can fail with RentError
pub type Result<T> = std::result::Result<T, RentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            RentError::ValidationError("test".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RentError::InvalidOrExpiredTicket.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RentError::AuthenticationError("test".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            RentError::PermissionDenied("test".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            RentError::Conflict("test".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            RentError::AccountLocked { until: Utc::now() }.status_code(),
            StatusCode::LOCKED
        );
        assert_eq!(
            RentError::DatabaseError(rusqlite::Error::InvalidQuery).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_errors_do_not_leak_details() {
        let error = RentError::DatabaseError(rusqlite::Error::InvalidColumnName("password_hash".into()));
        let response = ErrorResponse::from_error(&error);

        assert_eq!(response.error, "InternalError");
        assert_eq!(response.message, INTERNAL_ERROR_MESSAGE);
        assert!(!response.message.contains("password_hash"));
    }

    #[test]
    fn test_locked_response_carries_lockout_until() {
        let until = Utc::now() + chrono::Duration::minutes(30);
        let response = ErrorResponse::from_error(&RentError::AccountLocked { until });

        assert_eq!(response.error, "LockedError");
        assert!(response.message.contains("minute"));
        assert_eq!(
            response.details.unwrap()["lockout_until"],
            serde_json::json!(until.to_rfc3339())
        );
    }

    #[test]
    fn test_ticket_message_is_fixed() {
        let response = ErrorResponse::from_error(&RentError::InvalidOrExpiredTicket);
        assert_eq!(response.error, "InvalidOrExpiredTicket");
        assert_eq!(response.message, INVALID_TICKET_MESSAGE);
    }

    #[test]
    fn test_error_response_with_details() {
        let details = serde_json::json!({ "field": "email" });
        let response = ErrorResponse::with_details(
            "ValidationError".into(),
            "Email is required".into(),
            details.clone(),
        );

        assert_eq!(response.error, "ValidationError");
        assert_eq!(response.details, Some(details));
        assert!(!response.trace_id.is_empty());
    }
}
