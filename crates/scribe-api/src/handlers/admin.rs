//! Administrative handlers
//!
//! Revocation store maintenance and rate-limit resets. Every route here sits
//! behind `require_role(UserRole::Admin)`.

use crate::audit::{audit_log, AuditEvent, RequestContext};
use crate::auth::{token_fingerprint, AuthenticatedUser};
use crate::error::AppError;
use crate::middleware::rate_limit::Operation;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;

/// Revocation store status
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RevocationStatus {
    pub backend: String,
    pub healthy: bool,
    /// Absent when the store could not be read
    pub revoked_count: Option<u64>,
}

/// Result of clearing every revocation
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ClearRevocationsResponse {
    pub removed: u64,
}

/// Token whose revocation should be lifted
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UnrevokeRequest {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UnrevokeResponse {
    /// Whether a revocation entry existed
    pub existed: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReconcileResponse {
    /// Live revocation entries after recount
    pub revoked_count: u64,
}

/// Rate-limit window for one `(operation, actor)`
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RateLimitStatus {
    pub operation: Operation,
    pub actor: String,
    pub remaining: u32,
    pub max_requests: u32,
    pub window_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RateLimitResetResponse {
    /// Whether a window existed for the key
    pub existed: bool,
}

fn store_error(err: impl std::fmt::Display) -> AppError {
    AppError::ServiceUnavailable(format!("Revocation store unavailable: {err}"))
}

fn parse_operation(raw: &str) -> Result<Operation, AppError> {
    raw.parse::<Operation>().map_err(AppError::BadRequest)
}

/// Revocation store status
#[utoipa::path(
    get,
    path = "/api/v1/admin/revocations",
    tag = "admin",
    responses(
        (status = 200, description = "Store status", body = RevocationStatus),
        (status = 403, description = "Admin role required", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn revocation_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let healthy = state.revocations.healthy().await;
    let revoked_count = state.revocations.count().await.ok();

    Json(RevocationStatus {
        backend: state.revocations.backend().to_string(),
        healthy,
        revoked_count,
    })
}

/// Remove every revocation entry
///
/// Previously revoked tokens that have not expired become usable again.
#[utoipa::path(
    post,
    path = "/api/v1/admin/revocations/clear",
    tag = "admin",
    responses(
        (status = 200, description = "Revocations cleared", body = ClearRevocationsResponse),
        (status = 403, description = "Admin role required", body = crate::error::ApiError),
        (status = 503, description = "Revocation store unavailable", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn clear_revocations(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<AuthenticatedUser>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let removed = state.revocations.clear_all().await.map_err(store_error)?;

    audit_log(&AuditEvent::RevocationsCleared {
        admin_id: admin.user_id,
        removed,
        context: RequestContext::from_headers(&headers),
    });

    Ok(Json(ClearRevocationsResponse { removed }))
}

/// Lift the revocation of a single token
#[utoipa::path(
    delete,
    path = "/api/v1/admin/revocations",
    tag = "admin",
    request_body = UnrevokeRequest,
    responses(
        (status = 200, description = "Revocation removed if present", body = UnrevokeResponse),
        (status = 403, description = "Admin role required", body = crate::error::ApiError),
        (status = 503, description = "Revocation store unavailable", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn unrevoke_token(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<AuthenticatedUser>,
    headers: HeaderMap,
    Json(request): Json<UnrevokeRequest>,
) -> Result<impl IntoResponse, AppError> {
    if request.token.is_empty() {
        return Err(AppError::BadRequest("token must not be empty".to_string()));
    }

    let existed = state
        .revocations
        .remove(&request.token)
        .await
        .map_err(store_error)?;

    audit_log(&AuditEvent::TokenUnrevoked {
        admin_id: admin.user_id,
        token_fingerprint: token_fingerprint(&request.token),
        existed,
        context: RequestContext::from_headers(&headers),
    });

    Ok(Json(UnrevokeResponse { existed }))
}

/// Recount live revocation entries and reset the counter
#[utoipa::path(
    post,
    path = "/api/v1/admin/revocations/reconcile",
    tag = "admin",
    responses(
        (status = 200, description = "Counter reconciled", body = ReconcileResponse),
        (status = 403, description = "Admin role required", body = crate::error::ApiError),
        (status = 503, description = "Revocation store unavailable", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn reconcile_revocations(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let revoked_count = state
        .revocations
        .reconcile_count()
        .await
        .map_err(store_error)?;

    info!(revoked_count, "Revocation counter reconciled");
    Ok(Json(ReconcileResponse { revoked_count }))
}

/// Current window for one `(operation, actor)`
#[utoipa::path(
    get,
    path = "/api/v1/admin/rate-limits/{operation}/{actor}",
    tag = "admin",
    params(
        ("operation" = String, Path, description = "Operation tag, e.g. `auth`"),
        ("actor" = String, Path, description = "User id or client IP"),
    ),
    responses(
        (status = 200, description = "Window status", body = RateLimitStatus),
        (status = 400, description = "Unknown operation", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn rate_limit_status(
    State(state): State<Arc<AppState>>,
    Path((operation, actor)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let operation = parse_operation(&operation)?;
    let rule = state.limiter.rule(operation);

    Ok(Json(RateLimitStatus {
        operation,
        remaining: state.limiter.remaining(operation, &actor),
        actor,
        max_requests: rule.max_requests,
        window_secs: rule.window_secs,
    }))
}

/// Drop the window for one `(operation, actor)`
#[utoipa::path(
    delete,
    path = "/api/v1/admin/rate-limits/{operation}/{actor}",
    tag = "admin",
    params(
        ("operation" = String, Path, description = "Operation tag, e.g. `auth`"),
        ("actor" = String, Path, description = "User id or client IP"),
    ),
    responses(
        (status = 200, description = "Window reset", body = RateLimitResetResponse),
        (status = 400, description = "Unknown operation", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn reset_rate_limit(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<AuthenticatedUser>,
    Path((operation, actor)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let operation = parse_operation(&operation)?;
    let existed = state.limiter.reset(operation, &actor);

    info!(
        target: "audit",
        admin_id = %admin.user_id,
        operation = %operation,
        actor = %actor,
        existed,
        "Rate limit reset"
    );
    Ok(Json(RateLimitResetResponse { existed }))
}
