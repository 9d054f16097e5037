//! Scribe API - token lifecycle and revocation service
//!
//! Issues and rotates access/refresh token pairs, keeps a revocation list in
//! a shared key-value store, and rate limits user operations.

pub mod audit;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

use axum::{http::HeaderValue, routing::get, Router};
use state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::warn;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health_check,
        handlers::health::readiness_check,
        handlers::auth::register_handler,
        handlers::auth::login_handler,
        handlers::auth::refresh_handler,
        handlers::auth::logout_handler,
        handlers::auth::me_handler,
        handlers::admin::revocation_status,
        handlers::admin::clear_revocations,
        handlers::admin::unrevoke_token,
        handlers::admin::reconcile_revocations,
        handlers::admin::rate_limit_status,
        handlers::admin::reset_rate_limit,
    ),
    components(schemas(
        error::ApiError,
        auth::RegisterRequest,
        auth::LoginRequest,
        auth::RefreshRequest,
        auth::LogoutRequest,
        auth::AuthResponse,
        auth::UserInfo,
        auth::TokenPair,
        handlers::auth::LogoutResponse,
        handlers::admin::RevocationStatus,
        handlers::admin::ClearRevocationsResponse,
        handlers::admin::UnrevokeRequest,
        handlers::admin::UnrevokeResponse,
        handlers::admin::ReconcileResponse,
        handlers::admin::RateLimitStatus,
        handlers::admin::RateLimitResetResponse,
        handlers::health::HealthResponse,
        handlers::health::ReadinessResponse,
        handlers::health::ReadinessChecks,
        middleware::rate_limit::Operation,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "health", description = "Liveness, readiness and metrics"),
        (name = "auth", description = "Registration, login and token rotation"),
        (name = "admin", description = "Revocation and rate-limit administration")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);
    if origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(tower_http::cors::Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    layer.allow_origin(allowed)
}

/// Build the application router over shared state
pub fn create_router(state: Arc<AppState>) -> Router {
    let timeout = Duration::from_secs(state.config.server.request_timeout_secs);
    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/metrics", get(handlers::health::prometheus_metrics))
        .nest("/api/v1", routes::api_routes(state.clone()))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::metrics_middleware,
        ))
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Configuration for tests: cheap password hashing, fixed secrets
#[cfg(any(test, feature = "test-utils"))]
pub fn test_config() -> scribe_core::AppConfig {
    let mut config = scribe_core::AppConfig::default();
    config.auth.access_secret = "test-access-secret".to_string();
    config.auth.refresh_secret = "test-refresh-secret".to_string();
    config.auth.password_memory_cost = 8 * 1024;
    config.auth.password_time_cost = 1;
    config.auth.password_parallelism = 1;
    config
}

/// Router over fresh in-memory state
#[cfg(any(test, feature = "test-utils"))]
pub fn create_router_for_testing() -> Router {
    let state = AppState::in_memory(test_config()).expect("test config is valid");
    create_router(Arc::new(state))
}
