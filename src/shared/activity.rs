/**
 * Activity Events
 *
 * Activity records produced by the external activity log. The detector only
 * reads recent windows of these.
 */
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::shared::{ProjectId, UserId};

/// A single user activity inside a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub user_id: UserId,
    pub project_id: ProjectId,
    pub activity_type: String,
    pub location: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ActivityEvent {
    pub fn new(
        user_id: impl Into<UserId>,
        project_id: impl Into<ProjectId>,
        activity_type: impl Into<String>,
        location: Option<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            project_id: project_id.into(),
            activity_type: activity_type.into(),
            location,
            timestamp: Utc::now(),
            metadata: Map::new(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Activity reported by a connected client, relayed to the project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityReport {
    pub activity_type: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}
