//! Bounded per-project detection caches
//!
//! Each project keeps at most `capacity` entries, oldest evicted first, and
//! entries older than `retention` are pruned on every write. Entries are keyed
//! by signature so a detection seen on consecutive scans is refreshed in place
//! rather than duplicated. An entry not refreshed for `rearm_after` counts as
//! gone: when the same signature shows up again it is new.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::shared::{CollaborationOpportunity, ConflictDetection, ProjectId};

/// Something the cache can key and age
pub trait Detection: Clone {
    fn signature(&self) -> String;
    fn detected_at(&self) -> DateTime<Utc>;
}

impl Detection for ConflictDetection {
    fn signature(&self) -> String {
        ConflictDetection::signature(self)
    }

    fn detected_at(&self) -> DateTime<Utc> {
        self.detected_at
    }
}

impl Detection for CollaborationOpportunity {
    fn signature(&self) -> String {
        CollaborationOpportunity::signature(self)
    }

    fn detected_at(&self) -> DateTime<Utc> {
        self.detected_at
    }
}

#[derive(Debug)]
pub struct DetectionCache<T> {
    capacity: usize,
    retention: chrono::Duration,
    rearm_after: chrono::Duration,
    projects: HashMap<ProjectId, VecDeque<T>>,
}

impl<T: Detection> DetectionCache<T> {
    pub fn new(capacity: usize, retention: Duration, rearm_after: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            retention: chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX),
            rearm_after: chrono::Duration::from_std(rearm_after).unwrap_or(chrono::Duration::MAX),
            projects: HashMap::new(),
        }
    }

    /// Insert or refresh; returns true when the signature was not cached or
    /// had lapsed
    pub fn insert(&mut self, project_id: &str, item: T, now: DateTime<Utc>) -> bool {
        self.prune(now);
        let rearm_after = self.rearm_after;
        let entries = self.projects.entry(project_id.to_string()).or_default();

        let signature = item.signature();
        if let Some(index) = entries.iter().position(|e| e.signature() == signature) {
            if now.signed_duration_since(entries[index].detected_at()) <= rearm_after {
                entries[index] = item;
                return false;
            }
            entries.remove(index);
        }

        entries.push_back(item);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        true
    }

    /// Drop entries older than the retention window
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let Some(cutoff) = now.checked_sub_signed(self.retention) else {
            return;
        };
        self.projects.retain(|_, entries| {
            entries.retain(|e| e.detected_at() >= cutoff);
            !entries.is_empty()
        });
    }

    pub fn items(&self, project_id: &str) -> Vec<T> {
        self.projects
            .get(project_id)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn total(&self) -> usize {
        self.projects.values().map(VecDeque::len).sum()
    }

    pub fn project_count(&self) -> usize {
        self.projects.len()
    }

    pub fn projects(&self) -> impl Iterator<Item = &ProjectId> {
        self.projects.keys()
    }
}
