use axum::http::Method;
use runbox_runner::SessionRegistry;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub mod api;
pub mod config;
pub mod error;

#[cfg(test)]
mod tests;

pub use api::{create_router, AppState};
pub use config::{Config, ConfigError};
pub use error::AppError;

/// Serve the HTTP API until Ctrl-C, then shut the registry down.
pub async fn run_server(
    config: Config,
    registry: SessionRegistry,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Create CORS layer
    let cors = CorsLayer::new()
        .allow_origin(config.cors_header()?)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    let app = create_router(AppState::new(registry.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped, cleaning up executions");
    registry.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
