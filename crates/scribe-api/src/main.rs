//! Scribe API Server
//!
//! REST API server for the scribe token lifecycle service.

use scribe_api::{create_router, state::AppState};
use scribe_core::config::AppConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn load_config() -> anyhow::Result<AppConfig> {
    let config = match std::env::var("SCRIBE_CONFIG") {
        Ok(path) => AppConfig::from_file(path)?.with_env_override()?,
        Err(_) => AppConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.logging.level;
        format!("scribe_api={level},scribe_store={level},tower_http={level},audit=info").into()
    });
    if config.logging.json_format {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let sweep_every = config.rate_limits.sweep_interval_secs;

    // Create application state
    let state = Arc::new(AppState::from_config(config).await?);
    tracing::info!(backend = state.revocations.backend(), "Revocation store ready");

    let _maintenance = if sweep_every > 0 {
        state.spawn_maintenance(Duration::from_secs(sweep_every))
    } else {
        Vec::new()
    };

    // Create router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Scribe API Server starting on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/swagger-ui/", addr);
    tracing::info!("OpenAPI document at http://{}/api-docs/openapi.json", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
