/**
 * Activity Sources
 *
 * The detector reads recent windows of activity from an external log and never
 * writes to it. `ActivityRecorder` is the write side used by the WebSocket
 * layer when it is the one producing activity.
 *
 * - `InMemoryActivityLog` - bounded ring of events kept in process
 * - `PgActivityStore` - the `activities` table
 */

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::collections::{BTreeSet, VecDeque};
use tokio::sync::RwLock;

use crate::backend::error::{CollabError, CollabResult};
use crate::shared::{ActivityEvent, ProjectId};

/// Read side of the activity log
#[async_trait]
pub trait ActivitySource: Send + Sync {
    /// Events in `project_id` at or after `since`, oldest first
    async fn recent_activities(
        &self,
        project_id: &str,
        since: DateTime<Utc>,
    ) -> CollabResult<Vec<ActivityEvent>>;

    /// Events at one location at or after `since`
    async fn location_history(
        &self,
        project_id: &str,
        location: &str,
        since: DateTime<Utc>,
    ) -> CollabResult<Vec<ActivityEvent>> {
        let events = self.recent_activities(project_id, since).await?;
        Ok(events
            .into_iter()
            .filter(|e| e.location.as_deref() == Some(location))
            .collect())
    }

    /// Projects with any activity at or after `since`
    async fn active_projects(&self, since: DateTime<Utc>) -> CollabResult<Vec<ProjectId>>;
}

/// Write side of the activity log
#[async_trait]
pub trait ActivityRecorder: Send + Sync {
    async fn record(&self, event: ActivityEvent) -> CollabResult<()>;
}

/// Process-local activity log holding at most `capacity` events
#[derive(Debug)]
pub struct InMemoryActivityLog {
    events: RwLock<VecDeque<ActivityEvent>>,
    capacity: usize,
}

impl InMemoryActivityLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }
}

impl Default for InMemoryActivityLog {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl ActivityRecorder for InMemoryActivityLog {
    async fn record(&self, event: ActivityEvent) -> CollabResult<()> {
        let mut events = self.events.write().await;
        events.push_back(event);
        while events.len() > self.capacity {
            events.pop_front();
        }
        Ok(())
    }
}

#[async_trait]
impl ActivitySource for InMemoryActivityLog {
    async fn recent_activities(
        &self,
        project_id: &str,
        since: DateTime<Utc>,
    ) -> CollabResult<Vec<ActivityEvent>> {
        let events = self.events.read().await;
        let mut recent: Vec<ActivityEvent> = events
            .iter()
            .filter(|e| e.project_id == project_id && e.timestamp >= since)
            .cloned()
            .collect();
        recent.sort_by_key(|e| e.timestamp);
        Ok(recent)
    }

    async fn active_projects(&self, since: DateTime<Utc>) -> CollabResult<Vec<ProjectId>> {
        let events = self.events.read().await;
        let projects: BTreeSet<ProjectId> = events
            .iter()
            .filter(|e| e.timestamp >= since)
            .map(|e| e.project_id.clone())
            .collect();
        Ok(projects.into_iter().collect())
    }
}

/// Activity log backed by the `activities` table
#[derive(Debug, Clone)]
pub struct PgActivityStore {
    pool: PgPool,
}

impl PgActivityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_event(row: &sqlx::postgres::PgRow) -> CollabResult<ActivityEvent> {
        let metadata: Option<Json<Map<String, Value>>> = row.try_get("metadata")?;
        Ok(ActivityEvent {
            user_id: row.try_get("user_id")?,
            project_id: row.try_get("project_id")?,
            activity_type: row.try_get("activity_type")?,
            location: row.try_get("location")?,
            timestamp: row.try_get("created_at")?,
            metadata: metadata.map(|m| m.0).unwrap_or_default(),
        })
    }
}

#[async_trait]
impl ActivitySource for PgActivityStore {
    async fn recent_activities(
        &self,
        project_id: &str,
        since: DateTime<Utc>,
    ) -> CollabResult<Vec<ActivityEvent>> {
        let rows = sqlx::query(
            "SELECT user_id, project_id, activity_type, location, created_at, metadata
             FROM activities
             WHERE project_id = $1 AND created_at >= $2
             ORDER BY created_at ASC",
        )
        .bind(project_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_event).collect()
    }

    async fn location_history(
        &self,
        project_id: &str,
        location: &str,
        since: DateTime<Utc>,
    ) -> CollabResult<Vec<ActivityEvent>> {
        let rows = sqlx::query(
            "SELECT user_id, project_id, activity_type, location, created_at, metadata
             FROM activities
             WHERE project_id = $1 AND location = $2 AND created_at >= $3
             ORDER BY created_at ASC",
        )
        .bind(project_id)
        .bind(location)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_event).collect()
    }

    async fn active_projects(&self, since: DateTime<Utc>) -> CollabResult<Vec<ProjectId>> {
        let rows = sqlx::query(
            "SELECT DISTINCT project_id FROM activities WHERE created_at >= $1 ORDER BY project_id",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get("project_id").map_err(CollabError::from))
            .collect()
    }
}

#[async_trait]
impl ActivityRecorder for PgActivityStore {
    async fn record(&self, event: ActivityEvent) -> CollabResult<()> {
        sqlx::query(
            "INSERT INTO activities (user_id, project_id, activity_type, location, created_at, metadata)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&event.user_id)
        .bind(&event.project_id)
        .bind(&event.activity_type)
        .bind(&event.location)
        .bind(event.timestamp)
        .bind(Json(&event.metadata))
        .execute(&self.pool)
        .await
        .map_err(|e| CollabError::persistence(format!("activity insert failed: {}", e)))?;
        Ok(())
    }
}
