/**
 * Database Loading
 *
 * The database is optional. Without `database_url`, or when the connection
 * fails, the engine runs with its in-memory backends. Migrations create the
 * `user_presence` and `activities` tables used by the Postgres backends.
 */

use sqlx::PgPool;

use crate::shared::CollabConfig;

/// Database configuration result
pub type DatabaseConfig = Option<PgPool>;

/// Connect to the configured database and run migrations
///
/// Errors are logged and turn into `None`; they never stop startup.
pub async fn load_database(config: &CollabConfig) -> DatabaseConfig {
    let Some(database_url) = config.database_url.as_deref() else {
        tracing::warn!("[Server] DATABASE_URL not set, using in-memory backends");
        return None;
    };

    tracing::info!("[Server] Connecting to database...");
    let pool = match PgPool::connect(database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("[Server] Failed to create database connection pool: {:?}", e);
            tracing::warn!("[Server] Falling back to in-memory backends");
            return None;
        }
    };

    tracing::info!("[Server] Running database migrations...");
    match sqlx::migrate!().run(&pool).await {
        Ok(()) => tracing::info!("[Server] Database migrations completed"),
        Err(e) => {
            // Tables may already exist from an earlier deployment
            tracing::error!("[Server] Failed to run database migrations: {}", e);
        }
    }

    Some(pool)
}
