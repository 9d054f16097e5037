//! API route definitions

use crate::auth::middleware::{auth_middleware, require_role};
use crate::handlers::{admin, auth};
use crate::middleware::rate_limit::rate_limit_middleware;
use crate::state::AppState;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use scribe_core::UserRole;
use std::sync::Arc;

/// Create API v1 routes
pub fn api_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Public routes, limited per client IP
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/refresh", post(auth::refresh_handler))
        .route("/auth/logout", post(auth::logout_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ));

    // Protected routes (authentication required)
    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // Admin routes; auth runs first, then the role check
    let admin_routes = Router::new()
        .route(
            "/admin/revocations",
            get(admin::revocation_status).delete(admin::unrevoke_token),
        )
        .route("/admin/revocations/clear", post(admin::clear_revocations))
        .route(
            "/admin/revocations/reconcile",
            post(admin::reconcile_revocations),
        )
        .route(
            "/admin/rate-limits/:operation/:actor",
            get(admin::rate_limit_status).delete(admin::reset_rate_limit),
        )
        .route_layer(middleware::from_fn(require_role(UserRole::Admin)))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(admin_routes)
}
