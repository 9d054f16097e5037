//! Authentication middleware for protecting routes
//!
//! Extracts the bearer token from the Authorization header, rejects it if it
//! has been revoked, then validates it as an access token. On success the
//! caller's identity is added to request extensions.

use crate::audit::{audit_log, AuditEvent, RequestContext};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use scribe_core::{TokenKind, UserRole};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::claims::TokenClaims;

/// Authenticated user information extracted from an access token
///
/// Handlers extract it with `Extension<AuthenticatedUser>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub username: String,
    pub role: UserRole,
    /// The raw access token presented with the request
    #[serde(skip)]
    pub token: String,
}

impl AuthenticatedUser {
    fn from_claims(claims: TokenClaims, token: &str) -> Result<Self, AppError> {
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AppError::InvalidToken)?;
        Ok(Self {
            user_id,
            username: claims.username,
            role: claims.role,
            token: token.to_string(),
        })
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// Admin satisfies every role requirement
    pub fn has_role(&self, required: UserRole) -> bool {
        self.is_admin() || self.role == required
    }
}

/// Bearer token from the Authorization header, if present and well-formed
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Authentication middleware that requires a valid, unrevoked access token
///
/// The revocation check runs first and fails secure: if the store cannot
/// answer, the token is treated as revoked.
///
/// # Usage
///
/// ```ignore
/// use axum::{Router, routing::get, middleware};
/// use scribe_api::auth::middleware::auth_middleware;
///
/// let app = Router::new()
///     .route("/protected", get(protected_handler))
///     .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));
/// ```
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(request.headers())
        .ok_or(AppError::Unauthorized)?
        .to_string();

    let reject = |reason: &str, headers: &HeaderMap| {
        audit_log(&AuditEvent::InvalidToken {
            reason: reason.to_string(),
            context: RequestContext::from_headers(headers),
        });
        AppError::InvalidToken
    };

    if state.revocations.is_revoked(&token).await {
        return Err(reject("token revoked", request.headers()));
    }

    let claims = match state.tokens.validate_kind(&token, TokenKind::Access) {
        Ok(claims) => claims,
        Err(e) => return Err(reject(&e.to_string(), request.headers())),
    };

    let user = AuthenticatedUser::from_claims(claims, &token)?;
    debug!(user_id = %user.user_id, "Request authenticated");
    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

/// Type alias for role middleware future
type RoleMiddlewareFuture =
    std::pin::Pin<Box<dyn std::future::Future<Output = Result<Response, AppError>> + Send>>;

/// Middleware factory for role-based access control
///
/// Must run after [`auth_middleware`]. Admin passes every check.
///
/// # Example
///
/// ```ignore
/// let app = Router::new()
///     .route("/admin", get(admin_handler))
///     .route_layer(middleware::from_fn(require_role(UserRole::Admin)))
///     .route_layer(middleware::from_fn_with_state(state, auth_middleware));
/// ```
pub fn require_role(
    required_role: UserRole,
) -> impl Fn(Request<Body>, Next) -> RoleMiddlewareFuture + Clone {
    move |request: Request<Body>, next: Next| {
        Box::pin(async move {
            let user = request
                .extensions()
                .get::<AuthenticatedUser>()
                .ok_or(AppError::Unauthorized)?;

            if !user.has_role(required_role) {
                debug!(
                    user_id = %user.user_id,
                    role = %user.role,
                    required = %required_role,
                    "Insufficient role"
                );
                return Err(AppError::Forbidden(format!(
                    "Requires role: {required_role}"
                )));
            }

            Ok(next.run(request).await)
        })
    }
}
