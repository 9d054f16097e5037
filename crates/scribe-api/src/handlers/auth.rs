//! Authentication API handlers
//!
//! Provides HTTP endpoints for registration, login, token rotation, logout
//! and the caller's profile.

use crate::audit::RequestContext;
use crate::auth::{
    bearer_token, AuthResponse, AuthenticatedUser, LoginRequest, LogoutRequest, RefreshRequest,
    RegisterRequest, UserInfo,
};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

/// Logout response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LogoutResponse {
    pub message: String,
}

/// Register a new user account
///
/// New accounts get the `user` role and are signed in immediately.
///
/// # Responses
///
/// * `201 Created` - Account created, returns tokens
/// * `400 Bad Request` - Invalid input or weak password
/// * `409 Conflict` - Username or email already taken
#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered successfully", body = AuthResponse),
        (status = 400, description = "Invalid input", body = crate::error::ApiError),
        (status = 409, description = "Username or email already exists", body = crate::error::ApiError),
        (status = 429, description = "Too many requests", body = crate::error::ApiError),
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let context = RequestContext::from_headers(&headers);
    let response = state.auth.register(request, &context).await?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// Login with username or email and password
///
/// Attempts are rate limited per identifier.
///
/// # Responses
///
/// * `200 OK` - Authentication successful, returns tokens
/// * `401 Unauthorized` - Invalid credentials
/// * `429 Too Many Requests` - Too many attempts for this identifier
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials", body = crate::error::ApiError),
        (status = 429, description = "Too many login attempts", body = crate::error::ApiError),
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let context = RequestContext::from_headers(&headers);
    let response = state.auth.login(request, &context).await?;

    Ok(Json(response))
}

/// Refresh access token
///
/// Exchanges a refresh token for a new pair. The presented refresh token is
/// revoked and cannot be used again.
///
/// # Responses
///
/// * `200 OK` - New tokens issued
/// * `401 Unauthorized` - Invalid, expired or already-used refresh token
/// * `503 Service Unavailable` - Revocation store unavailable
#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh",
    tag = "auth",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Tokens refreshed", body = AuthResponse),
        (status = 401, description = "Invalid refresh token", body = crate::error::ApiError),
        (status = 503, description = "Revocation store unavailable", body = crate::error::ApiError),
    )
)]
pub async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let context = RequestContext::from_headers(&headers);
    let response = state.auth.refresh(&request.refresh_token, &context).await?;

    Ok(Json(response))
}

/// Logout
///
/// Revokes the refresh token and, if an `Authorization: Bearer` header is
/// sent, the access token too. Repeating a logout succeeds.
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    tag = "auth",
    request_body = LogoutRequest,
    responses(
        (status = 200, description = "Logged out", body = LogoutResponse),
        (status = 401, description = "Invalid refresh token", body = crate::error::ApiError),
        (status = 503, description = "Revocation store unavailable", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<LogoutRequest>,
) -> Result<impl IntoResponse, AppError> {
    let context = RequestContext::from_headers(&headers);
    state
        .auth
        .logout(&request.refresh_token, bearer_token(&headers), &context)
        .await?;

    Ok(Json(LogoutResponse {
        message: "Logged out successfully".to_string(),
    }))
}

/// Get current user profile
#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Current user", body = UserInfo),
        (status = 401, description = "Not authenticated", body = crate::error::ApiError),
        (status = 404, description = "Account no longer active", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, AppError> {
    let record = state
        .identities
        .find_active_by_id(user.user_id)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .ok_or_else(|| AppError::NotFound("User".to_string()))?;

    Ok(Json(UserInfo::from(&record)))
}
