/**
 * Conflict & Collaboration Detector
 *
 * Scans recent activity (from an `ActivitySource`) and live presence (from the
 * `PresenceCoordinator`) per project, and keeps what it finds in bounded
 * per-project caches.
 *
 * # Conflicts
 *
 * - `concurrent_editing`: one location touched by two or more distinct users
 *   within the conflict window. Medium, or high with three or more users or a
 *   critical location.
 * - `overlapping_work`: distinct but related locations (per the
 *   `LocationMatcher`) touched by two or more distinct users. Low, or medium
 *   with three or more users.
 *
 * # Opportunities
 *
 * - `same_file` (high): online users with identical current locations
 * - `related_files` (medium): online users at related locations
 * - `complementary_skills` (low): different activity kinds on the same or
 *   related locations
 * - `knowledge_sharing` (medium): a user debugging where another user has a
 *   long activity history
 *
 * # Broadcasting
 *
 * A scan pushes only detections whose signature is not already cached (or
 * whose cached entry lapsed for longer than the conflict window), and
 * only to this instance's connections: every instance runs its own scan over
 * the shared activity log and the relayed presence view.
 */

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::backend::detector::activity::ActivitySource;
use crate::backend::detector::cache::DetectionCache;
use crate::backend::detector::heuristics::LocationMatcher;
use crate::backend::detector::scoring::{self, ResolutionPlan, SeverityAnalysis};
use crate::backend::error::CollabResult;
use crate::backend::presence::PresenceCoordinator;
use crate::backend::registry::ConnectionRegistry;
use crate::backend::tasks::{spawn_periodic, BackgroundTasks};
use crate::backend::triggers::EventTriggers;
use crate::shared::config::DetectorConfig;
use crate::shared::{
    ActivityEvent, CollaborationOpportunity, ConflictDetection, ConflictType, Envelope,
    OpportunityType, PresenceRecord, Priority, ProjectId, ServerMessage, Severity, UserId,
};

/// Activity kinds that mark a user as looking for help
const LEARNER_ACTIVITIES: &[&str] = &["debug", "error"];

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

/// Locations touched by two or more distinct users
pub fn concurrent_editing(
    project_id: &str,
    events: &[ActivityEvent],
    matcher: &dyn LocationMatcher,
) -> Vec<ConflictDetection> {
    // BTreeMap keeps output order stable across scans
    let mut by_location: BTreeMap<&str, Vec<&ActivityEvent>> = BTreeMap::new();
    for event in events {
        if let Some(location) = event.location.as_deref() {
            by_location.entry(location).or_default().push(event);
        }
    }

    let mut conflicts = Vec::new();
    for (location, touches) in by_location {
        let users: Vec<&str> = touches.iter().map(|e| e.user_id.as_str()).collect();
        let distinct: BTreeSet<&str> = users.iter().copied().collect();
        if distinct.len() < 2 {
            continue;
        }

        let severity = if distinct.len() >= 3 || matcher.is_critical(location) {
            Severity::High
        } else {
            Severity::Medium
        };

        let first = touches.iter().map(|e| e.timestamp).min();
        let last = touches.iter().map(|e| e.timestamp).max();
        let duration = match (first, last) {
            (Some(first), Some(last)) => (last - first).num_seconds(),
            _ => 0,
        };

        if let Some(conflict) = ConflictDetection::new(
            ConflictType::ConcurrentEditing,
            project_id,
            users,
            location,
            severity,
        ) {
            conflicts.push(
                conflict
                    .with_metadata("duration", json!(duration))
                    .with_metadata("conflict_type", json!("simultaneous_edit"))
                    .with_metadata("activity_count", json!(touches.len())),
            );
        }
    }
    conflicts
}

/// Groups of related locations whose users overlap
pub fn overlapping_work(
    project_id: &str,
    events: &[ActivityEvent],
    matcher: &dyn LocationMatcher,
) -> Vec<ConflictDetection> {
    let mut locations: Vec<&str> = Vec::new();
    let mut users_at: HashMap<&str, Vec<&str>> = HashMap::new();
    for event in events {
        if let Some(location) = event.location.as_deref() {
            if !locations.contains(&location) {
                locations.push(location);
            }
            users_at.entry(location).or_default().push(event.user_id.as_str());
        }
    }
    locations.sort();

    // Union-find over locations
    let mut parent: Vec<usize> = (0..locations.len()).collect();
    fn root(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }
    for i in 0..locations.len() {
        for j in i + 1..locations.len() {
            if matcher.are_related(locations[i], locations[j]) {
                let (a, b) = (root(&mut parent, i), root(&mut parent, j));
                if a != b {
                    parent[b] = a;
                }
            }
        }
    }

    let mut clusters: BTreeMap<usize, Vec<&str>> = BTreeMap::new();
    for i in 0..locations.len() {
        let r = root(&mut parent, i);
        clusters.entry(r).or_default().push(locations[i]);
    }

    let mut conflicts = Vec::new();
    for cluster in clusters.into_values() {
        if cluster.len() < 2 {
            continue;
        }
        let mut users: Vec<&str> = Vec::new();
        let mut per_user_locations: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for &location in &cluster {
            for &user in users_at.get(location).into_iter().flatten() {
                users.push(user);
                per_user_locations.entry(user).or_default().insert(location);
            }
        }
        if per_user_locations.len() < 2 {
            continue;
        }

        let severity = if per_user_locations.len() >= 3 {
            Severity::Medium
        } else {
            Severity::Low
        };
        let anchor = cluster[0];

        if let Some(conflict) = ConflictDetection::new(
            ConflictType::OverlappingWork,
            project_id,
            users,
            anchor,
            severity,
        ) {
            conflicts.push(
                conflict
                    .with_metadata("conflict_type", json!("related_locations"))
                    .with_metadata("locations", json!(cluster)),
            );
        }
    }
    conflicts
}

/// Opportunities derived from who is online and where
pub fn presence_opportunities(
    project_id: &str,
    online: &[PresenceRecord],
    matcher: &dyn LocationMatcher,
) -> Vec<CollaborationOpportunity> {
    let located: Vec<(&PresenceRecord, &str)> = online
        .iter()
        .filter_map(|r| r.current_location.as_deref().map(|loc| (r, loc)))
        .collect();

    let mut opportunities = Vec::new();

    let mut by_location: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for &(record, location) in &located {
        by_location
            .entry(location)
            .or_default()
            .push(record.user_id.as_str());
    }
    for (&location, users) in &by_location {
        if let Some(opportunity) = CollaborationOpportunity::new(
            OpportunityType::SameFile,
            project_id,
            users.iter().copied(),
            location,
            Priority::High,
        ) {
            opportunities.push(opportunity.with_metadata("reason", json!("editing the same file")));
        }
    }

    for (i, &(a, loc_a)) in located.iter().enumerate() {
        for &(b, loc_b) in located.iter().skip(i + 1) {
            if a.user_id == b.user_id {
                continue;
            }
            let related = matcher.are_related(loc_a, loc_b);
            if related {
                if let Some(opportunity) = CollaborationOpportunity::new(
                    OpportunityType::RelatedFiles,
                    project_id,
                    [a.user_id.as_str(), b.user_id.as_str()],
                    loc_a,
                    Priority::Medium,
                ) {
                    opportunities.push(
                        opportunity.with_metadata("locations", json!([loc_a, loc_b])),
                    );
                }
            }

            let kinds = (a.current_activity.as_deref(), b.current_activity.as_deref());
            if let (Some(kind_a), Some(kind_b)) = kinds {
                if kind_a != kind_b && (related || loc_a == loc_b) {
                    if let Some(opportunity) = CollaborationOpportunity::new(
                        OpportunityType::ComplementarySkills,
                        project_id,
                        [a.user_id.as_str(), b.user_id.as_str()],
                        loc_a,
                        Priority::Low,
                    ) {
                        opportunities.push(
                            opportunity.with_metadata("activities", json!([kind_a, kind_b])),
                        );
                    }
                }
            }
        }
    }

    opportunities
}

fn is_learning(record: &PresenceRecord) -> bool {
    record.current_activity.as_deref().is_some_and(|activity| {
        let activity = activity.to_lowercase();
        LEARNER_ACTIVITIES.iter().any(|kind| activity.contains(kind))
    })
}

/// Per-project history of detections
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictHistory {
    pub project_id: ProjectId,
    pub period_days: u32,
    pub total_conflicts: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
    /// Locations with the most conflicts, busiest first
    pub hotspots: Vec<(String, usize)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectorStats {
    pub cached_conflicts: usize,
    pub cached_opportunities: usize,
    pub monitored_projects: usize,
    pub scans_completed: u64,
    pub running: bool,
    pub matcher: &'static str,
    pub conflict_window_secs: u64,
    pub scan_interval_secs: u64,
    pub cache_capacity: usize,
    pub cache_retention_secs: u64,
}

/// What one project scan newly found
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanOutcome {
    pub new_conflicts: Vec<ConflictDetection>,
    pub new_opportunities: Vec<CollaborationOpportunity>,
}

pub struct ConflictDetector {
    activities: Arc<dyn ActivitySource>,
    presence: Arc<PresenceCoordinator>,
    registry: Arc<ConnectionRegistry>,
    matcher: Arc<dyn LocationMatcher>,
    triggers: Option<Arc<EventTriggers>>,
    config: DetectorConfig,
    conflicts: RwLock<DetectionCache<ConflictDetection>>,
    opportunities: RwLock<DetectionCache<CollaborationOpportunity>>,
    scans: AtomicU64,
    tasks: BackgroundTasks,
}

impl ConflictDetector {
    pub fn new(
        activities: Arc<dyn ActivitySource>,
        presence: Arc<PresenceCoordinator>,
        registry: Arc<ConnectionRegistry>,
        matcher: Arc<dyn LocationMatcher>,
        triggers: Option<Arc<EventTriggers>>,
        config: DetectorConfig,
    ) -> Self {
        // Past this gap a detection has gone away and coming back is news
        let rearm_after = config.conflict_window.max(config.scan_interval * 2);
        Self {
            conflicts: RwLock::new(DetectionCache::new(
                config.cache_capacity,
                config.cache_retention,
                rearm_after,
            )),
            opportunities: RwLock::new(DetectionCache::new(
                config.cache_capacity,
                config.cache_retention,
                rearm_after,
            )),
            activities,
            presence,
            registry,
            matcher,
            triggers,
            config,
            scans: AtomicU64::new(0),
            tasks: BackgroundTasks::new(),
        }
    }

    pub async fn detect_project_conflicts(&self, project_id: &str) -> CollabResult<Vec<ConflictDetection>> {
        self.detect_project_conflicts_at(project_id, Utc::now()).await
    }

    pub async fn detect_project_conflicts_at(
        &self,
        project_id: &str,
        now: DateTime<Utc>,
    ) -> CollabResult<Vec<ConflictDetection>> {
        let since = now - to_chrono(self.config.conflict_window);
        let events = self.activities.recent_activities(project_id, since).await?;

        let mut conflicts = concurrent_editing(project_id, &events, self.matcher.as_ref());
        conflicts.extend(overlapping_work(project_id, &events, self.matcher.as_ref()));
        for conflict in &mut conflicts {
            conflict.detected_at = now;
        }
        Ok(conflicts)
    }

    pub async fn detect_collaboration_opportunities(
        &self,
        project_id: &str,
    ) -> CollabResult<Vec<CollaborationOpportunity>> {
        self.detect_collaboration_opportunities_at(project_id, Utc::now()).await
    }

    pub async fn detect_collaboration_opportunities_at(
        &self,
        project_id: &str,
        now: DateTime<Utc>,
    ) -> CollabResult<Vec<CollaborationOpportunity>> {
        let online = self.presence.get_online_users(Some(project_id)).await;
        let mut opportunities = presence_opportunities(project_id, &online, self.matcher.as_ref());
        opportunities.extend(self.knowledge_sharing(project_id, &online, now).await?);
        for opportunity in &mut opportunities {
            opportunity.detected_at = now;
        }
        Ok(opportunities)
    }

    /// Pair each online learner with the most active other user at their location
    async fn knowledge_sharing(
        &self,
        project_id: &str,
        online: &[PresenceRecord],
        now: DateTime<Utc>,
    ) -> CollabResult<Vec<CollaborationOpportunity>> {
        let since = now - to_chrono(self.config.expertise_window);
        let mut found = Vec::new();

        for learner in online.iter().filter(|r| is_learning(r)) {
            let Some(location) = learner.current_location.as_deref() else {
                continue;
            };
            let history = self
                .activities
                .location_history(project_id, location, since)
                .await?;

            let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
            for event in &history {
                if event.user_id != learner.user_id {
                    *counts.entry(event.user_id.as_str()).or_default() += 1;
                }
            }
            let expert = counts
                .into_iter()
                .filter(|(_, count)| *count >= self.config.expert_min_activities)
                .max_by(|(ua, a), (ub, b)| a.cmp(b).then_with(|| ub.cmp(ua)));

            if let Some((expert, count)) = expert {
                if let Some(opportunity) = CollaborationOpportunity::new(
                    OpportunityType::KnowledgeSharing,
                    project_id,
                    [expert, learner.user_id.as_str()],
                    location,
                    Priority::Medium,
                ) {
                    found.push(
                        opportunity
                            .with_metadata("expert", json!(expert))
                            .with_metadata("learner", json!(learner.user_id))
                            .with_metadata("expert_activity_count", json!(count)),
                    );
                }
            }
        }
        Ok(found)
    }

    /// Detect, cache and announce; returns only detections new to the cache
    pub async fn scan_project(&self, project_id: &str) -> CollabResult<ScanOutcome> {
        self.scan_project_at(project_id, Utc::now()).await
    }

    pub async fn scan_project_at(&self, project_id: &str, now: DateTime<Utc>) -> CollabResult<ScanOutcome> {
        let conflicts = self.detect_project_conflicts_at(project_id, now).await?;
        let opportunities = self
            .detect_collaboration_opportunities_at(project_id, now)
            .await?;

        let mut outcome = ScanOutcome::default();
        {
            let mut cache = self.conflicts.write().await;
            for conflict in conflicts {
                if cache.insert(project_id, conflict.clone(), now) {
                    outcome.new_conflicts.push(conflict);
                }
            }
        }
        {
            let mut cache = self.opportunities.write().await;
            for opportunity in opportunities {
                if cache.insert(project_id, opportunity.clone(), now) {
                    outcome.new_opportunities.push(opportunity);
                }
            }
        }

        for conflict in &outcome.new_conflicts {
            tracing::info!(
                "[Detector] {} conflict at {} in {} ({}, users: {:?})",
                conflict.conflict_type.as_str(),
                conflict.location,
                project_id,
                conflict.severity,
                conflict.user_ids
            );
            let envelope = Envelope::new(ServerMessage::ConflictDetected(conflict.clone()));
            self.registry.broadcast_to_project(project_id, &envelope, None).await;
            if let Some(triggers) = &self.triggers {
                triggers.on_conflict(conflict).await;
            }
        }
        for opportunity in &outcome.new_opportunities {
            let envelope =
                Envelope::new(ServerMessage::CollaborationOpportunity(opportunity.clone()));
            self.registry.broadcast_to_project(project_id, &envelope, None).await;
            if let Some(triggers) = &self.triggers {
                triggers.on_opportunity(opportunity).await;
            }
        }

        Ok(outcome)
    }

    /// Scan every project with live connections or recent activity
    pub async fn scan_all(&self) -> CollabResult<usize> {
        let now = Utc::now();
        let since = now - to_chrono(self.config.conflict_window);

        let mut projects: BTreeSet<ProjectId> =
            self.registry.active_projects().await.into_iter().collect();
        projects.extend(self.activities.active_projects(since).await?);

        let mut scanned = 0;
        for project_id in &projects {
            match self.scan_project_at(project_id, now).await {
                Ok(_) => scanned += 1,
                Err(e) => tracing::error!("[Detector] Scan of {} failed: {}", project_id, e),
            }
        }
        self.scans.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("[Detector] Scanned {} project(s)", scanned);
        Ok(scanned)
    }

    pub async fn recent_conflicts(&self, project_id: &str) -> Vec<ConflictDetection> {
        let mut cache = self.conflicts.write().await;
        cache.prune(Utc::now());
        cache.items(project_id)
    }

    pub async fn recent_opportunities(&self, project_id: &str) -> Vec<CollaborationOpportunity> {
        let mut cache = self.opportunities.write().await;
        cache.prune(Utc::now());
        cache.items(project_id)
    }

    pub fn analyze_conflict_severity(&self, conflict: &ConflictDetection) -> SeverityAnalysis {
        scoring::analyze_conflict_severity(conflict, self.matcher.as_ref())
    }

    pub fn suggest_conflict_resolution(&self, conflict: &ConflictDetection) -> ResolutionPlan {
        scoring::suggest_conflict_resolution(conflict)
    }

    /// Summarise cached conflicts detected within the last `days`
    pub async fn get_conflict_history(&self, project_id: &str, days: u32) -> ConflictHistory {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
        let conflicts: Vec<ConflictDetection> = self
            .conflicts
            .read()
            .await
            .items(project_id)
            .into_iter()
            .filter(|c| c.detected_at >= cutoff)
            .collect();

        let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_severity: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_location: BTreeMap<String, usize> = BTreeMap::new();
        for conflict in &conflicts {
            *by_type.entry(conflict.conflict_type.as_str().to_string()).or_default() += 1;
            *by_severity.entry(conflict.severity.as_str().to_string()).or_default() += 1;
            *by_location.entry(conflict.location.clone()).or_default() += 1;
        }

        let mut hotspots: Vec<(String, usize)> = by_location.into_iter().collect();
        hotspots.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        hotspots.truncate(10);

        ConflictHistory {
            project_id: project_id.to_string(),
            period_days: days,
            total_conflicts: conflicts.len(),
            by_type,
            by_severity,
            hotspots,
        }
    }

    pub async fn stats(&self) -> DetectorStats {
        let conflicts = self.conflicts.read().await;
        let opportunities = self.opportunities.read().await;
        let monitored: BTreeSet<&ProjectId> =
            conflicts.projects().chain(opportunities.projects()).collect();

        DetectorStats {
            cached_conflicts: conflicts.total(),
            cached_opportunities: opportunities.total(),
            monitored_projects: monitored.len(),
            scans_completed: self.scans.load(Ordering::Relaxed),
            running: self.tasks.is_running(),
            matcher: self.matcher.name(),
            conflict_window_secs: self.config.conflict_window.as_secs(),
            scan_interval_secs: self.config.scan_interval.as_secs(),
            cache_capacity: self.config.cache_capacity,
            cache_retention_secs: self.config.cache_retention.as_secs(),
        }
    }

    /// Start the periodic scan; calling it again while running does nothing
    pub fn start(self: &Arc<Self>) -> bool {
        let detector = Arc::downgrade(self);
        let started = self.tasks.start_with(|| {
            vec![(
                "Detector",
                spawn_periodic("Detector", self.config.scan_interval, move || {
                    let detector = detector.clone();
                    async move {
                        if let Some(detector) = detector.upgrade() {
                            detector.scan_all().await?;
                        }
                        Ok(())
                    }
                }),
            )]
        });
        if started {
            tracing::info!(
                "[Detector] Scanning every {}s with a {}s conflict window",
                self.config.scan_interval.as_secs(),
                self.config.conflict_window.as_secs()
            );
        }
        started
    }

    pub fn stop(&self) {
        if self.tasks.stop() > 0 {
            tracing::info!("[Detector] Scan loop stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.tasks.is_running()
    }

    /// Users currently named in any cached conflict of the project
    pub async fn users_in_conflict(&self, project_id: &str) -> Vec<UserId> {
        let users: BTreeSet<UserId> = self
            .conflicts
            .read()
            .await
            .items(project_id)
            .into_iter()
            .flat_map(|c| c.user_ids)
            .collect();
        users.into_iter().collect()
    }
}
