/**
 * Router Configuration
 *
 * - `GET /ws` - WebSocket endpoint for collaborating clients
 * - `GET /health` - liveness probe
 * - `/admin/...` - admin routes behind `admin_auth`
 *
 * Every request passes through `TraceLayer`.
 */

use axum::{middleware, routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::backend::middleware::admin_auth;
use crate::backend::routes::admin_routes::admin_routes;
use crate::backend::server::state::AppState;
use crate::backend::ws::ws_handler;

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Create the Axum router with all routes configured
pub fn create_router(app_state: AppState) -> Router<()> {
    let admin = admin_routes().route_layer(middleware::from_fn_with_state(
        app_state.clone(),
        admin_auth,
    ));

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .merge(admin)
        .fallback(|| async { (axum::http::StatusCode::NOT_FOUND, "404 Not Found") })
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
