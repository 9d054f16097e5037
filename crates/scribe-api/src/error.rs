//! API error handling
//!
//! [`AuthError`] is the auth service's error taxonomy. [`AppError`] is what
//! handlers return; it renders an [`ApiError`] JSON body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::middleware::rate_limit::Operation;

/// API error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Error code
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn not_found(resource: &str) -> Self {
        Self::new("NOT_FOUND", format!("{resource} not found"))
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }

    pub fn unauthorized() -> Self {
        Self::new("UNAUTHORIZED", "Authentication required")
    }

    pub fn invalid_token() -> Self {
        Self::new("INVALID_TOKEN", "Invalid or expired token")
    }

    pub fn forbidden() -> Self {
        Self::new("FORBIDDEN", "Access denied")
    }

    pub fn internal_error() -> Self {
        Self::new("INTERNAL_ERROR", "Internal server error")
    }
}

/// Auth service errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Username already exists")]
    DuplicateUsername,

    #[error("Email already exists")]
    DuplicateEmail,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has been revoked")]
    TokenRevoked,

    #[error("Revocation store unavailable")]
    StoreUnavailable,

    #[error("Rate limit exceeded for {0}")]
    RateLimited(Operation),

    #[error("{0}")]
    WeakPassword(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Unauthorized,
    /// Rejected token; the reason is never rendered
    InvalidToken,
    InvalidCredentials,
    Forbidden(String),
    Conflict(String),
    TooManyRequests(String),
    ServiceUnavailable(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, ApiError::not_found(&msg)),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ApiError::bad_request(msg)),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, ApiError::unauthorized()),
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, ApiError::invalid_token()),
            AppError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                ApiError::new("INVALID_CREDENTIALS", "Invalid username/email or password"),
            ),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, ApiError::new("FORBIDDEN", msg)),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, ApiError::new("CONFLICT", msg)),
            AppError::TooManyRequests(operation) => (
                StatusCode::TOO_MANY_REQUESTS,
                ApiError::new("RATE_LIMITED", "Too many requests").with_details(operation),
            ),
            AppError::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ApiError::new("SERVICE_UNAVAILABLE", msg),
            ),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, ApiError::internal_error())
            }
        };

        (status, Json(error)).into_response()
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => AppError::InvalidCredentials,
            // revoked and garbage tokens are indistinguishable to clients
            AuthError::InvalidToken | AuthError::TokenRevoked => AppError::InvalidToken,
            AuthError::DuplicateUsername | AuthError::DuplicateEmail => {
                AppError::Conflict(err.to_string())
            }
            AuthError::StoreUnavailable => {
                AppError::ServiceUnavailable("Token store unavailable, try again later".to_string())
            }
            AuthError::RateLimited(operation) => AppError::TooManyRequests(operation.to_string()),
            AuthError::WeakPassword(msg) | AuthError::Validation(msg) => AppError::BadRequest(msg),
            AuthError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<scribe_core::ScribeError> for AppError {
    fn from(err: scribe_core::ScribeError) -> Self {
        use scribe_core::ScribeError;

        match err {
            ScribeError::NotFound(msg) => AppError::NotFound(msg),
            ScribeError::Validation(msg) => AppError::BadRequest(msg),
            ScribeError::Store(msg) => AppError::ServiceUnavailable(msg),
            ScribeError::Config(err) => AppError::Internal(format!("Configuration error: {err}")),
            ScribeError::Other(err) => AppError::Internal(err.to_string()),
        }
    }
}
