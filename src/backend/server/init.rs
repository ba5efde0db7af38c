/**
 * Server Initialization
 *
 * 1. Load the optional database (and run migrations)
 * 2. Build the engine services for that backend
 * 3. Start the relay listener and the sweeps
 * 4. Create the router
 *
 * The caller keeps the returned `AppState` to shut the services down when the
 * server stops.
 */

use axum::Router;

use crate::backend::error::CollabResult;
use crate::backend::routes::router::create_router;
use crate::backend::server::config::load_database;
use crate::backend::server::state::AppState;
use crate::backend::services::CollabServices;
use crate::shared::CollabConfig;

/// Create and start the application
pub async fn create_app(config: CollabConfig) -> CollabResult<(Router<()>, AppState)> {
    tracing::info!(
        "[Server] Initializing collaboration engine (instance {})",
        config.relay.instance_id
    );

    // Step 1: Optional database
    let db_pool = load_database(&config).await;

    // Step 2: Services
    let services = CollabServices::from_config(config, db_pool.clone()).await;

    // Step 3: Background tasks
    services.start().await?;

    // Step 4: Router
    let app_state = AppState::new(services, db_pool);
    let app = create_router(app_state.clone());

    tracing::info!("[Server] Router configured");
    Ok((app, app_state))
}
