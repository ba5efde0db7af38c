/**
 * Detection Types
 *
 * Conflicts and collaboration opportunities computed by the detector. Both are
 * transient: they live in bounded per-project caches and are pushed to clients
 * inside `conflict_detected` / `collaboration_opportunity` envelopes.
 *
 * Constructors refuse to build a detection with fewer than two distinct users,
 * and user lists are de-duplicated preserving first appearance.
 */
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::shared::{ProjectId, UserId};

/// Kind of conflict between collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Two or more users touched the identical location
    ConcurrentEditing,
    /// Users touched related locations
    OverlappingWork,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConcurrentEditing => "concurrent_editing",
            Self::OverlappingWork => "overlapping_work",
        }
    }
}

/// Conflict severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opportunity priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// Kind of collaboration opportunity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityType {
    SameFile,
    RelatedFiles,
    ComplementarySkills,
    KnowledgeSharing,
}

impl OpportunityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SameFile => "same_file",
            Self::RelatedFiles => "related_files",
            Self::ComplementarySkills => "complementary_skills",
            Self::KnowledgeSharing => "knowledge_sharing",
        }
    }
}

/// De-duplicate user ids preserving first appearance
pub fn unique_user_ids<I, S>(ids: I) -> Vec<UserId>
where
    I: IntoIterator<Item = S>,
    S: Into<UserId>,
{
    let mut unique: Vec<UserId> = Vec::new();
    for id in ids {
        let id = id.into();
        if !unique.contains(&id) {
            unique.push(id);
        }
    }
    unique
}

/// A detected conflict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictDetection {
    pub conflict_type: ConflictType,
    pub project_id: ProjectId,
    pub user_ids: Vec<UserId>,
    pub location: String,
    pub severity: Severity,
    pub detected_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ConflictDetection {
    /// Returns `None` unless at least two distinct users are involved
    pub fn new<I, S>(
        conflict_type: ConflictType,
        project_id: impl Into<ProjectId>,
        user_ids: I,
        location: impl Into<String>,
        severity: Severity,
    ) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<UserId>,
    {
        let user_ids = unique_user_ids(user_ids);
        if user_ids.len() < 2 {
            return None;
        }
        Some(Self {
            conflict_type,
            project_id: project_id.into(),
            user_ids,
            location: location.into(),
            severity,
            detected_at: Utc::now(),
            metadata: Map::new(),
        })
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Duration in seconds recorded by the detector, if any
    pub fn duration_secs(&self) -> i64 {
        self.metadata
            .get("duration")
            .and_then(Value::as_i64)
            .unwrap_or(0)
    }

    /// Stable identity used to avoid re-announcing the same conflict
    pub fn signature(&self) -> String {
        let mut users = self.user_ids.clone();
        users.sort();
        format!("{}|{}|{}", self.conflict_type.as_str(), self.location, users.join(","))
    }
}

/// A suggested pairing between collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaborationOpportunity {
    pub opportunity_type: OpportunityType,
    pub project_id: ProjectId,
    pub user_ids: Vec<UserId>,
    pub location: String,
    pub priority: Priority,
    pub detected_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl CollaborationOpportunity {
    /// Returns `None` unless at least two distinct users are involved
    pub fn new<I, S>(
        opportunity_type: OpportunityType,
        project_id: impl Into<ProjectId>,
        user_ids: I,
        location: impl Into<String>,
        priority: Priority,
    ) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<UserId>,
    {
        let user_ids = unique_user_ids(user_ids);
        if user_ids.len() < 2 {
            return None;
        }
        Some(Self {
            opportunity_type,
            project_id: project_id.into(),
            user_ids,
            location: location.into(),
            priority,
            detected_at: Utc::now(),
            metadata: Map::new(),
        })
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn signature(&self) -> String {
        let mut users = self.user_ids.clone();
        users.sort();
        format!(
            "{}|{}|{}",
            self.opportunity_type.as_str(),
            self.location,
            users.join(",")
        )
    }
}
