/**
 * Collaboration Engine Server Entry Point
 *
 * Loads configuration, initializes tracing, builds and starts the engine, then
 * serves the WebSocket and admin routes until Ctrl-C.
 */

use collabcore::backend::server::init::create_app;
use collabcore::shared::CollabConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenv::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .init();

    let config = CollabConfig::from_env()?;
    tracing::info!("[Startup] Configuration loaded (port {})", config.server_port);

    let port = config.server_port;
    let (app, state) = create_app(config).await?;

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("[Startup] Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("[Startup] Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("[Startup] Shutdown signal received");
        })
        .await?;

    state.services.shutdown().await;
    Ok(())
}
