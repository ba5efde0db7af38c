/**
 * Real-time Message Envelopes
 *
 * Every frame exchanged with clients (and replayed through the relay) is a JSON
 * object of the form:
 *
 * ```json
 * {"type": "presence_update", "data": {...}, "timestamp": "2026-01-01T00:00:00Z"}
 * ```
 *
 * `data` is never an open map: outbound payloads are the `ServerMessage` sum type
 * and inbound frames are validated into `ClientMessage` before anything acts on
 * them.
 */
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::shared::activity::ActivityReport;
use crate::shared::detection::{CollaborationOpportunity, ConflictDetection};
use crate::shared::error::SharedError;
use crate::shared::presence::{HeartbeatData, PresenceRecord, PresenceUpdate};
use crate::shared::{ProjectId, UserId};

/// Longest location string accepted from a client
pub const MAX_LOCATION_LEN: usize = 1024;

/// Connection-level status announced to project members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

/// Messages sent from the server to connected clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    PresenceUpdate(PresenceRecord),
    UserStatusChange {
        user_id: UserId,
        project_id: Option<ProjectId>,
        status: ConnectionStatus,
    },
    UserActivityUpdate {
        user_id: UserId,
        project_id: Option<ProjectId>,
        activity: ActivityReport,
    },
    ConflictDetected(ConflictDetection),
    CollaborationOpportunity(CollaborationOpportunity),
    ProjectPresence {
        project_id: ProjectId,
        users: Vec<PresenceRecord>,
    },
    Broadcast {
        from_user: Option<UserId>,
        project_id: Option<ProjectId>,
        content: Value,
    },
    Pong {},
    Error {
        code: String,
        message: String,
    },
}

impl ServerMessage {
    /// The `type` tag this message is sent with
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::PresenceUpdate(_) => "presence_update",
            Self::UserStatusChange { .. } => "user_status_change",
            Self::UserActivityUpdate { .. } => "user_activity_update",
            Self::ConflictDetected(_) => "conflict_detected",
            Self::CollaborationOpportunity(_) => "collaboration_opportunity",
            Self::ProjectPresence { .. } => "project_presence",
            Self::Broadcast { .. } => "broadcast",
            Self::Pong {} => "pong",
            Self::Error { .. } => "error",
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Timestamped outbound message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub message: ServerMessage,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    pub fn new(message: ServerMessage) -> Self {
        Self {
            message,
            timestamp: Utc::now(),
        }
    }

    pub fn message_type(&self) -> &'static str {
        self.message.message_type()
    }

    /// Render the client-facing `{"type", "data", "timestamp"}` frame
    pub fn to_wire(&self) -> Result<String, SharedError> {
        let mut value = serde_json::to_value(&self.message)?;
        if let Value::Object(ref mut map) = value {
            map.insert(
                "timestamp".to_string(),
                Value::String(self.timestamp.to_rfc3339()),
            );
        }
        Ok(serde_json::to_string(&value)?)
    }

    /// Parse a client-facing frame back into an envelope
    pub fn from_wire(text: &str) -> Result<Self, SharedError> {
        let value: Value = serde_json::from_str(text)?;
        let timestamp = value
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let message: ServerMessage = serde_json::from_value(value)?;
        Ok(Self { message, timestamp })
    }
}

impl From<ServerMessage> for Envelope {
    fn from(message: ServerMessage) -> Self {
        Self::new(message)
    }
}

/// Messages accepted from connected clients
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Ping,
    Heartbeat(HeartbeatData),
    PresenceUpdate(PresenceUpdate),
    Activity(ActivityReport),
    JoinProject { project_id: ProjectId },
    LeaveProject,
    Broadcast { content: Value },
    GetPresence,
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct JoinProjectData {
    project_id: ProjectId,
}

#[derive(Deserialize)]
struct BroadcastData {
    content: Value,
}

impl ClientMessage {
    /// Parse and validate an inbound text frame
    pub fn parse(text: &str) -> Result<Self, SharedError> {
        let frame: RawFrame = serde_json::from_str(text)?;
        let data = if frame.data.is_null() {
            Value::Object(Default::default())
        } else {
            frame.data
        };

        let message = match frame.kind.as_str() {
            "ping" => Self::Ping,
            "heartbeat" => {
                let data: HeartbeatData = decode(data)?;
                validate_location(data.location.as_deref())?;
                Self::Heartbeat(data)
            }
            "presence_update" => {
                let update: PresenceUpdate = decode(data)?;
                validate_location(update.current_location.as_deref())?;
                if update.is_empty() {
                    return Err(SharedError::validation(
                        "data",
                        "presence update carries no changes",
                    ));
                }
                Self::PresenceUpdate(update)
            }
            "activity" | "user_activity" => {
                let report: ActivityReport = decode(data)?;
                if report.activity_type.trim().is_empty() {
                    return Err(SharedError::validation(
                        "activity_type",
                        "activity type cannot be empty",
                    ));
                }
                validate_location(report.location.as_deref())?;
                Self::Activity(report)
            }
            "join_project" => {
                let join: JoinProjectData = decode(data)?;
                if join.project_id.trim().is_empty() {
                    return Err(SharedError::validation(
                        "project_id",
                        "project id cannot be empty",
                    ));
                }
                Self::JoinProject {
                    project_id: join.project_id,
                }
            }
            "leave_project" => Self::LeaveProject,
            "broadcast" => {
                let broadcast: BroadcastData = decode(data)?;
                Self::Broadcast {
                    content: broadcast.content,
                }
            }
            "get_presence" => Self::GetPresence,
            other => {
                return Err(SharedError::validation(
                    "type",
                    format!("unknown message type '{}'", other),
                ))
            }
        };
        Ok(message)
    }
}

fn decode<T: serde::de::DeserializeOwned>(data: Value) -> Result<T, SharedError> {
    serde_json::from_value(data).map_err(|e| SharedError::validation("data", e.to_string()))
}

fn validate_location(location: Option<&str>) -> Result<(), SharedError> {
    match location {
        Some(loc) if loc.len() > MAX_LOCATION_LEN => Err(SharedError::validation(
            "location",
            format!("location exceeds {} bytes", MAX_LOCATION_LEN),
        )),
        _ => Ok(()),
    }
}
