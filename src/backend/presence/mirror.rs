/**
 * Presence Mirror
 *
 * Best-effort external copy of presence state, kept for durability and
 * analytics. The coordinator never waits on it: writes are queued to one
 * writer task and their failures are logged. The Postgres upsert also refuses
 * to replace a row with an older snapshot, so writers on several instances
 * cannot regress each other.
 */

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::backend::error::{CollabError, CollabResult};
use crate::shared::PresenceRecord;

/// Sink for presence snapshots
#[async_trait]
pub trait PresenceMirror: Send + Sync {
    /// Insert or replace the stored presence of `record.user_id`
    async fn upsert_presence(&self, record: &PresenceRecord) -> CollabResult<()>;

    fn name(&self) -> &'static str;
}

/// Mirror that stores nothing, used when no database is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMirror;

#[async_trait]
impl PresenceMirror for NoopMirror {
    async fn upsert_presence(&self, _record: &PresenceRecord) -> CollabResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// Mirror into the `user_presence` table
#[derive(Debug, Clone)]
pub struct PgPresenceMirror {
    pool: PgPool,
}

impl PgPresenceMirror {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PresenceMirror for PgPresenceMirror {
    async fn upsert_presence(&self, record: &PresenceRecord) -> CollabResult<()> {
        sqlx::query(
            "INSERT INTO user_presence (
                user_id, project_id, status, current_location, current_activity,
                session_id, metadata, last_heartbeat, last_activity, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                project_id = EXCLUDED.project_id,
                status = EXCLUDED.status,
                current_location = EXCLUDED.current_location,
                current_activity = EXCLUDED.current_activity,
                session_id = EXCLUDED.session_id,
                metadata = EXCLUDED.metadata,
                last_heartbeat = EXCLUDED.last_heartbeat,
                last_activity = EXCLUDED.last_activity,
                updated_at = NOW()
            WHERE user_presence.last_activity <= EXCLUDED.last_activity",
        )
        .bind(&record.user_id)
        .bind(&record.project_id)
        .bind(record.status.as_str())
        .bind(&record.current_location)
        .bind(&record.current_activity)
        .bind(&record.session_id)
        .bind(Json(&record.metadata))
        .bind(record.last_heartbeat)
        .bind(record.last_activity)
        .execute(&self.pool)
        .await
        .map_err(|e| CollabError::persistence(format!("presence upsert failed: {}", e)))?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}
