/**
 * Application State
 *
 * `AppState` is the router state. It holds the engine services and the
 * optional database pool, and implements `FromRef` so handlers can extract
 * just the part they need:
 *
 * ```rust,ignore
 * async fn handler(State(services): State<Arc<CollabServices>>) {
 *     let stats = services.registry.stats().await;
 * }
 * ```
 */

use axum::extract::FromRef;
use sqlx::PgPool;
use std::sync::Arc;

use crate::backend::services::CollabServices;

#[derive(Clone)]
pub struct AppState {
    /// Every engine component, constructed once at startup
    pub services: Arc<CollabServices>,

    /// `None` when `DATABASE_URL` is unset or the connection failed
    pub db_pool: Option<PgPool>,
}

impl AppState {
    pub fn new(services: Arc<CollabServices>, db_pool: Option<PgPool>) -> Self {
        Self { services, db_pool }
    }
}

impl FromRef<AppState> for Arc<CollabServices> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.services.clone()
    }
}

impl FromRef<AppState> for Option<PgPool> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.db_pool.clone()
    }
}
