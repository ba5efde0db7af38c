/**
 * Presence Coordinator
 *
 * Owns one in-memory `PresenceRecord` per locally connected user and drives the
 * ONLINE/ACTIVE/AWAY/OFFLINE state machine from heartbeats.
 *
 * # Side Effects
 *
 * Every presence change is pushed three ways, after the session lock has been
 * released:
 *
 * 1. `presence_update` to the user's project on this instance (excluding the user)
 * 2. `publish_presence` on the relay, so other instances update their view
 * 3. a best-effort write to the `PresenceMirror`, queued to a single writer
 *    task so writes land in the order they were made
 *
 * # Sweeps
 *
 * - heartbeat check (`heartbeat_check_interval`): idle and offline transitions
 * - offline cleanup (`cleanup_interval`): removes sessions offline past
 *   `cleanup_threshold` through the same path as `unregister_session`
 *
 * The heartbeat check also republishes every live local session on the relay
 * once half the idle threshold has passed since it was last published.
 *
 * # Remote View
 *
 * Presence learned from other instances is kept in a separate remote view and
 * expires once nothing has been heard about the user for the offline
 * threshold. A live remote record outranks a local OFFLINE one, and a user
 * whose last local connection closes while the remote view holds them is
 * dropped locally instead of being announced offline.
 */

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::backend::error::{CollabError, CollabResult};
use crate::backend::presence::machine;
use crate::backend::presence::mirror::PresenceMirror;
use crate::backend::realtime::relay::CrossInstanceRelay;
use crate::backend::registry::{ConnectionObserver, ConnectionRegistry};
use crate::backend::tasks::{spawn_periodic, BackgroundTasks};
use crate::shared::config::PresenceConfig;
use crate::shared::{
    Envelope, HeartbeatData, PresenceRecord, PresenceStatus, PresenceUpdate, ProjectId,
    ServerMessage, UserId,
};

/// Snapshot of what a user is doing right now
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivitySummary {
    pub user_id: UserId,
    pub project_id: Option<ProjectId>,
    pub status: PresenceStatus,
    pub current_location: Option<String>,
    pub current_activity: Option<String>,
    pub session_duration_secs: i64,
    pub idle_secs: i64,
    pub last_heartbeat: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresenceStats {
    pub total_sessions: usize,
    pub remote_sessions: usize,
    pub status_distribution: BTreeMap<String, usize>,
    pub sessions_per_project: BTreeMap<ProjectId, usize>,
    pub average_session_duration_secs: f64,
}

#[derive(Debug, Clone)]
struct RemotePresence {
    record: PresenceRecord,
    /// When the owning instance last published this user
    seen_at: DateTime<Utc>,
}

pub struct PresenceCoordinator {
    sessions: RwLock<HashMap<UserId, PresenceRecord>>,
    remote: RwLock<HashMap<UserId, RemotePresence>>,
    /// When each local session was last published on the relay
    published: RwLock<HashMap<UserId, DateTime<Utc>>>,
    registry: Arc<ConnectionRegistry>,
    relay: Option<Arc<CrossInstanceRelay>>,
    mirror_tx: mpsc::UnboundedSender<PresenceRecord>,
    mirror_name: &'static str,
    config: PresenceConfig,
    tasks: BackgroundTasks,
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

fn elapsed_since(earlier: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - earlier).to_std().unwrap_or(Duration::ZERO)
}

/// Drain presence snapshots into the mirror one at a time, in submission order
fn spawn_mirror_writer(mirror: Arc<dyn PresenceMirror>) -> mpsc::UnboundedSender<PresenceRecord> {
    let (tx, mut rx) = mpsc::unbounded_channel::<PresenceRecord>();
    tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            if let Err(e) = mirror.upsert_presence(&record).await {
                tracing::warn!(
                    "[Presence] Mirror write for {} via {} failed: {}",
                    record.user_id,
                    mirror.name(),
                    e
                );
            }
        }
        tracing::debug!("[Presence] Mirror writer finished");
    });
    tx
}

fn apply_to_record(
    record: &mut PresenceRecord,
    update: PresenceUpdate,
    connected: bool,
    now: DateTime<Utc>,
) {
    if let Some(status) = update.status {
        // A live connection keeps the user visible
        let status = if status == PresenceStatus::Offline && connected {
            PresenceStatus::Away
        } else {
            status
        };
        if status != record.status {
            tracing::info!("[Presence] {}: {} -> {}", record.user_id, record.status, status);
        }
        record.status = status;
        if status.is_available() {
            record.last_activity = now;
        }
    }
    if let Some(location) = update.current_location {
        record.current_location = Some(location);
        record.last_activity = now;
    }
    if let Some(activity) = update.current_activity {
        record.current_activity = Some(activity);
        record.last_activity = now;
    }
    if let Some(metadata) = update.metadata {
        record.metadata.extend(metadata);
    }
}

/// True when `next` tells observers something `previous` did not
fn differs_for_observers(previous: &PresenceRecord, next: &PresenceRecord) -> bool {
    previous.status != next.status
        || previous.project_id != next.project_id
        || previous.current_location != next.current_location
        || previous.current_activity != next.current_activity
        || previous.metadata != next.metadata
}

impl PresenceCoordinator {
    /// Must run inside a Tokio runtime: spawns the mirror writer
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        relay: Option<Arc<CrossInstanceRelay>>,
        mirror: Arc<dyn PresenceMirror>,
        config: PresenceConfig,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            remote: RwLock::new(HashMap::new()),
            published: RwLock::new(HashMap::new()),
            registry,
            relay,
            mirror_name: mirror.name(),
            mirror_tx: spawn_mirror_writer(mirror),
            config,
            tasks: BackgroundTasks::new(),
        }
    }

    pub fn config(&self) -> &PresenceConfig {
        &self.config
    }

    fn mirror_write(&self, record: PresenceRecord) {
        if self.mirror_tx.send(record).is_err() {
            tracing::warn!("[Presence] Mirror writer for {} is gone", self.mirror_name);
        }
    }

    async fn publish(&self, record: &PresenceRecord, at: DateTime<Utc>) {
        let Some(relay) = &self.relay else {
            return;
        };
        relay
            .publish_presence_at(&record.user_id, record.project_id.as_deref(), record, at)
            .await;
        let mut published = self.published.write().await;
        if record.status == PresenceStatus::Offline {
            published.remove(&record.user_id);
        } else {
            published.insert(record.user_id.clone(), at);
        }
    }

    async fn announce(&self, record: &PresenceRecord, at: DateTime<Utc>) {
        if let Some(project_id) = &record.project_id {
            let envelope = Envelope::new(ServerMessage::PresenceUpdate(record.clone()));
            self.registry
                .broadcast_to_project(project_id, &envelope, Some(&record.user_id))
                .await;
        }
        self.publish(record, at).await;
    }

    /// Persist and broadcast a presence change
    async fn propagate(&self, record: &PresenceRecord, at: DateTime<Utc>) {
        self.mirror_write(record.clone());
        self.announce(record, at).await;
    }

    /// Create or replace the session of `user_id`
    pub async fn register_session(
        &self,
        user_id: impl Into<UserId>,
        session_id: impl Into<String>,
        project_id: Option<ProjectId>,
        initial_status: PresenceStatus,
        metadata: Option<Map<String, Value>>,
    ) -> PresenceRecord {
        let user_id = user_id.into();
        let now = Utc::now();
        let mut record = PresenceRecord::new(
            user_id.clone(),
            session_id.into(),
            project_id,
            initial_status,
            now,
        );
        if let Some(metadata) = metadata {
            record.metadata = metadata;
        }

        self.sessions
            .write()
            .await
            .insert(user_id.clone(), record.clone());

        tracing::info!(
            "[Presence] Registered session {} for {} ({})",
            record.session_id,
            user_id,
            record.status
        );
        self.propagate(&record, now).await;
        record
    }

    /// Remove the session and announce it offline; unknown users are ignored
    pub async fn unregister_session(&self, user_id: &str) -> Option<PresenceRecord> {
        let mut record = self.sessions.write().await.remove(user_id)?;
        let now = Utc::now();
        record.status = PresenceStatus::Offline;
        record.last_activity = now;

        tracing::info!("[Presence] Unregistered session for {}", user_id);
        self.propagate(&record, now).await;
        Some(record)
    }

    /// Record a liveness signal, merging any location and activity it carries
    pub async fn heartbeat(
        &self,
        user_id: &str,
        data: Option<HeartbeatData>,
    ) -> CollabResult<PresenceRecord> {
        let now = Utc::now();
        let (record, changed) = {
            let mut sessions = self.sessions.write().await;
            let record = sessions
                .get_mut(user_id)
                .ok_or_else(|| CollabError::not_found(format!("presence session for {}", user_id)))?;

            record.last_heartbeat = now;
            record.last_activity = now;

            let mut changed = false;
            if let Some(data) = data {
                if data.location.is_some() && data.location != record.current_location {
                    record.current_location = data.location;
                    changed = true;
                }
                if data.activity.is_some() && data.activity != record.current_activity {
                    record.current_activity = data.activity;
                    changed = true;
                }
                if let Some(metadata) = data.metadata {
                    for (key, value) in metadata {
                        if record.metadata.get(&key) != Some(&value) {
                            record.metadata.insert(key, value);
                            changed = true;
                        }
                    }
                }
            }
            (record.clone(), changed)
        };

        if record.status.is_idle() {
            tracing::debug!("[Presence] Heartbeat promotes {} from {}", user_id, record.status);
            return self
                .update_presence(user_id, PresenceUpdate::status(PresenceStatus::Active))
                .await;
        }

        if changed {
            self.propagate(&record, now).await;
        }
        Ok(record)
    }

    /// Apply an explicit status, location, activity or metadata change
    pub async fn update_presence(
        &self,
        user_id: &str,
        update: PresenceUpdate,
    ) -> CollabResult<PresenceRecord> {
        self.apply_update(user_id, update, Utc::now()).await
    }

    async fn apply_update(
        &self,
        user_id: &str,
        update: PresenceUpdate,
        now: DateTime<Utc>,
    ) -> CollabResult<PresenceRecord> {
        let connected = self.registry.is_user_connected(user_id).await;

        let record = {
            let mut sessions = self.sessions.write().await;
            let record = sessions
                .get_mut(user_id)
                .ok_or_else(|| CollabError::not_found(format!("presence session for {}", user_id)))?;
            apply_to_record(record, update, connected, now);
            record.clone()
        };

        self.propagate(&record, now).await;
        Ok(record)
    }

    /// Move the session into another project, announcing it there
    pub async fn set_project(
        &self,
        user_id: &str,
        project_id: Option<ProjectId>,
    ) -> CollabResult<PresenceRecord> {
        let now = Utc::now();
        let (record, previous) = {
            let mut sessions = self.sessions.write().await;
            let record = sessions
                .get_mut(user_id)
                .ok_or_else(|| CollabError::not_found(format!("presence session for {}", user_id)))?;
            if record.project_id == project_id {
                return Ok(record.clone());
            }
            let previous = std::mem::replace(&mut record.project_id, project_id);
            record.last_activity = now;
            (record.clone(), previous)
        };

        // Members of the old project see the user go offline there
        if let Some(previous) = previous {
            let mut departed = record.clone();
            departed.project_id = Some(previous.clone());
            departed.status = PresenceStatus::Offline;
            let envelope = Envelope::new(ServerMessage::PresenceUpdate(departed));
            self.registry
                .fan_out_project(&previous, &envelope, Some(user_id))
                .await;
        }

        self.propagate(&record, now).await;
        Ok(record)
    }

    /// Record presence relayed from another instance, published there at
    /// `published_at`; returns whether local observers should hear about it
    pub async fn apply_remote_presence(
        &self,
        mut record: PresenceRecord,
        instance_id: &str,
        published_at: DateTime<Utc>,
    ) -> bool {
        let mut remote = self.remote.write().await;
        if record.status == PresenceStatus::Offline {
            remote.remove(&record.user_id);
            return true;
        }
        record.remote_instance = Some(instance_id.to_string());
        let changed = remote
            .get(&record.user_id)
            .map_or(true, |known| differs_for_observers(&known.record, &record));
        remote.insert(
            record.user_id.clone(),
            RemotePresence {
                record,
                seen_at: published_at,
            },
        );
        changed
    }

    /// One record per user: local sessions win unless they are OFFLINE while
    /// another instance still reports the user live
    async fn merged_view(&self) -> BTreeMap<UserId, PresenceRecord> {
        let mut users: BTreeMap<UserId, PresenceRecord> = self
            .remote
            .read()
            .await
            .iter()
            .map(|(user_id, remote)| (user_id.clone(), remote.record.clone()))
            .collect();
        for record in self.sessions.read().await.values() {
            if record.status == PresenceStatus::Offline && users.contains_key(&record.user_id) {
                continue;
            }
            users.insert(record.user_id.clone(), record.clone());
        }
        users
    }

    pub async fn get_presence(&self, user_id: &str) -> Option<PresenceRecord> {
        let local = self.sessions.read().await.get(user_id).cloned();
        match local {
            Some(record) if record.status != PresenceStatus::Offline => Some(record),
            local => self
                .remote
                .read()
                .await
                .get(user_id)
                .map(|remote| remote.record.clone())
                .or(local),
        }
    }

    /// Everyone in the project, sorted by user
    pub async fn get_project_presence(&self, project_id: &str) -> Vec<PresenceRecord> {
        self.merged_view()
            .await
            .into_values()
            .filter(|record| record.project_id.as_deref() == Some(project_id))
            .collect()
    }

    /// Users whose status is online or active, optionally within one project
    pub async fn get_online_users(&self, project_id: Option<&str>) -> Vec<PresenceRecord> {
        self.merged_view()
            .await
            .into_values()
            .filter(|record| {
                record.status.is_available()
                    && project_id.map_or(true, |p| record.project_id.as_deref() == Some(p))
            })
            .collect()
    }

    pub async fn activity_summary(&self, user_id: &str) -> Option<ActivitySummary> {
        let record = self.get_presence(user_id).await?;
        let now = Utc::now();
        Some(ActivitySummary {
            session_duration_secs: record.session_duration_secs(now),
            idle_secs: (now - record.last_activity).num_seconds().max(0),
            user_id: record.user_id,
            project_id: record.project_id,
            status: record.status,
            current_location: record.current_location,
            current_activity: record.current_activity,
            last_heartbeat: record.last_heartbeat,
        })
    }

    pub async fn stats(&self) -> PresenceStats {
        let now = Utc::now();
        let sessions = self.sessions.read().await;

        let mut status_distribution: BTreeMap<String, usize> = PresenceStatus::ALL
            .iter()
            .map(|status| (status.as_str().to_string(), 0))
            .collect();
        let mut sessions_per_project: BTreeMap<ProjectId, usize> = BTreeMap::new();
        let mut total_duration = 0i64;

        for record in sessions.values() {
            *status_distribution
                .entry(record.status.as_str().to_string())
                .or_default() += 1;
            if let Some(project_id) = &record.project_id {
                *sessions_per_project.entry(project_id.clone()).or_default() += 1;
            }
            total_duration += record.session_duration_secs(now);
        }

        let average_session_duration_secs = if sessions.is_empty() {
            0.0
        } else {
            total_duration as f64 / sessions.len() as f64
        };

        PresenceStats {
            total_sessions: sessions.len(),
            remote_sessions: self.remote.read().await.len(),
            status_distribution,
            sessions_per_project,
            average_session_duration_secs,
        }
    }

    /// Run one heartbeat sweep as of `now`; returns the transitions applied
    pub async fn check_heartbeats_at(&self, now: DateTime<Utc>) -> Vec<(UserId, PresenceStatus)> {
        let users: Vec<UserId> = self.sessions.read().await.keys().cloned().collect();

        let mut transitions = Vec::new();
        for user_id in users {
            let connected = self.registry.is_user_connected(&user_id).await;
            if let Some(record) = self.sweep_user(&user_id, connected, now).await {
                transitions.push((user_id, record.status));
            }
        }

        self.republish_live_sessions(now).await;

        let expiry = now - to_chrono(self.config.offline_threshold);
        let mut remote = self.remote.write().await;
        let before = remote.len();
        remote.retain(|_, entry| entry.seen_at.max(entry.record.last_heartbeat) >= expiry);
        if remote.len() < before {
            tracing::debug!(
                "[Presence] Expired {} remote session(s)",
                before - remote.len()
            );
        }

        transitions
    }

    /// Apply the state machine to one session, judged against its heartbeat as
    /// it stands under the write lock
    async fn sweep_user(
        &self,
        user_id: &str,
        connected: bool,
        now: DateTime<Utc>,
    ) -> Option<PresenceRecord> {
        let record = {
            let mut sessions = self.sessions.write().await;
            let record = sessions.get_mut(user_id)?;
            let elapsed = elapsed_since(record.last_heartbeat, now);
            let next = machine::next_status(record.status, elapsed, connected, &self.config)?;
            apply_to_record(record, PresenceUpdate::status(next), connected, now);
            record.clone()
        };
        self.propagate(&record, now).await;
        Some(record)
    }

    /// Refresh other instances' view of sessions that have been quiet on the relay
    async fn republish_live_sessions(&self, now: DateTime<Utc>) {
        if self.relay.is_none() {
            return;
        }
        let interval = to_chrono(self.config.idle_threshold) / 2;
        let due: Vec<PresenceRecord> = {
            let sessions = self.sessions.read().await;
            let published = self.published.read().await;
            sessions
                .values()
                .filter(|record| record.status != PresenceStatus::Offline)
                .filter(|record| {
                    published
                        .get(&record.user_id)
                        .map_or(true, |at| now - *at >= interval)
                })
                .cloned()
                .collect()
        };
        for record in &due {
            self.publish(record, now).await;
        }
        if !due.is_empty() {
            tracing::debug!("[Presence] Republished {} live session(s)", due.len());
        }
    }

    /// Remove sessions offline past the cleanup threshold; returns how many
    pub async fn cleanup_offline_at(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - to_chrono(self.config.cleanup_threshold);
        let expired: Vec<UserId> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|r| r.status == PresenceStatus::Offline && r.last_heartbeat < cutoff)
            .map(|r| r.user_id.clone())
            .collect();

        let mut removed = 0;
        for user_id in expired {
            if self.registry.is_user_connected(&user_id).await {
                continue;
            }
            if self.unregister_session(&user_id).await.is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!("[Presence] Cleaned up {} offline session(s)", removed);
        }
        removed
    }

    /// Start the heartbeat check and offline cleanup sweeps
    pub fn start(self: &Arc<Self>) -> bool {
        let heartbeat_owner = Arc::downgrade(self);
        let cleanup_owner = Arc::downgrade(self);
        let started = self.tasks.start_with(|| {
            vec![
                (
                    "Presence",
                    spawn_periodic("Presence", self.config.heartbeat_check_interval, move || {
                        let coordinator = heartbeat_owner.clone();
                        async move {
                            if let Some(coordinator) = coordinator.upgrade() {
                                coordinator.check_heartbeats_at(Utc::now()).await;
                            }
                            Ok(())
                        }
                    }),
                ),
                (
                    "Presence",
                    spawn_periodic("Presence", self.config.cleanup_interval, move || {
                        let coordinator = cleanup_owner.clone();
                        async move {
                            if let Some(coordinator) = coordinator.upgrade() {
                                coordinator.cleanup_offline_at(Utc::now()).await;
                            }
                            Ok(())
                        }
                    }),
                ),
            ]
        });
        if started {
            tracing::info!("[Presence] Heartbeat and cleanup sweeps started");
        }
        started
    }

    pub fn stop(&self) {
        if self.tasks.stop() > 0 {
            tracing::info!("[Presence] Sweeps stopped");
        }
    }
}

#[async_trait]
impl ConnectionObserver for PresenceCoordinator {
    async fn on_connected(
        &self,
        user_id: &UserId,
        project_id: Option<&ProjectId>,
        metadata: &Map<String, Value>,
    ) {
        let existing = self.sessions.read().await.contains_key(user_id);
        if !existing {
            self.register_session(
                user_id.clone(),
                Uuid::new_v4().to_string(),
                project_id.cloned(),
                PresenceStatus::Online,
                Some(metadata.clone()),
            )
            .await;
            return;
        }

        if let Err(e) = self.heartbeat(user_id, None).await {
            tracing::debug!("[Presence] Reconnect heartbeat for {} failed: {}", user_id, e);
        }
        if let Some(project_id) = project_id {
            if let Err(e) = self.set_project(user_id, Some(project_id.clone())).await {
                tracing::debug!("[Presence] Project switch for {} failed: {}", user_id, e);
            }
        }
    }

    async fn on_last_disconnected(&self, user_id: &UserId, _project_id: Option<&ProjectId>) {
        let live_elsewhere = self.remote.read().await.contains_key(user_id);
        if live_elsewhere {
            let removed = self.sessions.write().await.remove(user_id).is_some();
            self.published.write().await.remove(user_id);
            if removed {
                tracing::info!(
                    "[Presence] {} left this instance but is still connected elsewhere",
                    user_id
                );
            }
            return;
        }

        match self
            .update_presence(user_id, PresenceUpdate::status(PresenceStatus::Offline))
            .await
        {
            Ok(_) => {}
            Err(e) => tracing::debug!("[Presence] No session to mark offline for {}: {}", user_id, e),
        }
    }
}
