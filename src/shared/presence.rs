/**
 * Presence Types
 *
 * Session status and presence records shared between the presence coordinator,
 * the relay and connected clients.
 */
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::shared::error::SharedError;
use crate::shared::{ProjectId, UserId};

/// Presence status of a user session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    /// Connected, no activity reported yet
    Online,
    /// Connected and recently active
    Active,
    /// Connected but idle past the idle threshold
    Away,
    /// Gone, or silent past the offline threshold
    Offline,
}

impl PresenceStatus {
    pub const ALL: [PresenceStatus; 4] = [
        PresenceStatus::Online,
        PresenceStatus::Active,
        PresenceStatus::Away,
        PresenceStatus::Offline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Active => "active",
            Self::Away => "away",
            Self::Offline => "offline",
        }
    }

    /// Online or active
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Online | Self::Active)
    }

    /// Away or offline
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Away | Self::Offline)
    }
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PresenceStatus {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "online" => Ok(Self::Online),
            "active" => Ok(Self::Active),
            "away" => Ok(Self::Away),
            "offline" => Ok(Self::Offline),
            other => Err(SharedError::validation(
                "status",
                format!("unknown presence status '{}'", other),
            )),
        }
    }
}

/// In-memory presence record for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub project_id: Option<ProjectId>,
    pub session_id: String,
    pub status: PresenceStatus,
    pub current_location: Option<String>,
    pub current_activity: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Instance that owns the session when it was learned through the relay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_instance: Option<String>,
}

impl PresenceRecord {
    pub fn new(
        user_id: UserId,
        session_id: String,
        project_id: Option<ProjectId>,
        status: PresenceStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            project_id,
            session_id,
            status,
            current_location: None,
            current_activity: None,
            started_at: now,
            last_heartbeat: now,
            last_activity: now,
            metadata: Map::new(),
            remote_instance: None,
        }
    }

    pub fn is_remote(&self) -> bool {
        self.remote_instance.is_some()
    }

    /// Seconds the session has been open at `now`
    pub fn session_duration_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.started_at).num_seconds().max(0)
    }
}

/// Explicit presence change requested by a client or a sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    #[serde(default)]
    pub status: Option<PresenceStatus>,
    #[serde(default)]
    pub current_location: Option<String>,
    #[serde(default)]
    pub current_activity: Option<String>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

impl PresenceUpdate {
    pub fn status(status: PresenceStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.current_location.is_none()
            && self.current_activity.is_none()
            && self.metadata.is_none()
    }
}

/// Location and activity carried by a heartbeat
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatData {
    #[serde(default, alias = "current_location")]
    pub location: Option<String>,
    #[serde(default, alias = "current_activity")]
    pub activity: Option<String>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}
