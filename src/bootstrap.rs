use anyhow::{Context, Result};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::{app_state::AppState, config::Config, jobs::pending_sweep, routes, swagger};

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "restaurant_orderservice=info,tower_http=info".into()),
        )
        .init();
}

/// Loads `.env` when present. Real environment variables win.
pub fn init_env() {
    if let Err(err) = dotenvy::dotenv()
        && !err.not_found()
    {
        tracing::warn!("Failed to read .env: {}", err);
    }
}

/// The full HTTP surface, with docs and request tracing.
pub fn app(state: AppState) -> Router {
    let routes = routes::routes_with_openapi();
    let swagger_ui = swagger::create_swagger_ui(routes.get_openapi().clone());

    Router::new()
        .merge(routes)
        .merge(swagger_ui)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn bootstrap(name: &str, config: &Config, state: AppState) -> Result<()> {
    let sweeper = tokio::spawn(pending_sweep::run(
        state.db_pool.clone(),
        config.sweep.clone(),
        state.broadcaster.clone(),
    ));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("{} listening on {}", name, addr);

    let served = axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error");

    sweeper.abort();
    tracing::info!("{} stopped", name);
    served
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
