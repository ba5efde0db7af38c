/**
 * Connection Registry
 *
 * Process-local bookkeeping of live client connections, indexed by connection
 * id, user id and project id.
 *
 * # Delivery
 *
 * `send_to_user`, `broadcast_to_project` and `broadcast_to_all` deliver to the
 * connections of *this* process only, in registration order. The `fan_out_*`
 * variants additionally publish the envelope through the cross-instance relay
 * so other processes deliver it to their own connections.
 *
 * # Eviction
 *
 * A failed send is proof the connection is dead: the connection is removed in
 * the same call, never retried. Removing a user's last local connection tells
 * the observer (the presence coordinator) and notifies the project.
 *
 * # Locking
 *
 * The index lock is never held across a transport send. Targets are
 * snapshotted, the lock is released, then frames go out.
 */

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::backend::error::{CollabError, CollabResult};
use crate::backend::realtime::relay::CrossInstanceRelay;
use crate::backend::registry::transport::Transport;
use crate::backend::tasks::{spawn_periodic, BackgroundTasks};
use crate::shared::config::RegistryConfig;
use crate::shared::{ConnectionStatus, Envelope, ProjectId, ServerMessage, UserId};

/// Opaque connection identifier allocated at accept time
pub type ConnectionId = Uuid;

/// Receives user-level connection lifecycle events
#[async_trait]
pub trait ConnectionObserver: Send + Sync {
    /// A connection for `user_id` was accepted
    async fn on_connected(
        &self,
        user_id: &UserId,
        project_id: Option<&ProjectId>,
        metadata: &Map<String, Value>,
    );

    /// The user's last connection in this process went away
    async fn on_last_disconnected(&self, user_id: &UserId, project_id: Option<&ProjectId>);
}

struct Connection {
    id: ConnectionId,
    seq: u64,
    user_id: UserId,
    project_id: Option<ProjectId>,
    transport: Arc<dyn Transport>,
    connected_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    metadata: Map<String, Value>,
}

/// Read-only view of a registered connection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub project_id: Option<ProjectId>,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub metadata: Map<String, Value>,
}

impl From<&Connection> for ConnectionInfo {
    fn from(conn: &Connection) -> Self {
        Self {
            id: conn.id,
            user_id: conn.user_id.clone(),
            project_id: conn.project_id.clone(),
            connected_at: conn.connected_at,
            last_activity: conn.last_activity,
            metadata: conn.metadata.clone(),
        }
    }
}

/// Registry statistics for operational dashboards
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistryStats {
    pub total_connections: usize,
    pub unique_users: usize,
    pub active_projects: usize,
    pub connections_per_project: BTreeMap<ProjectId, usize>,
}

/// What a removal left behind, used to notify after the lock is released
struct Departure {
    user_id: UserId,
    project_id: Option<ProjectId>,
    transport: Arc<dyn Transport>,
    last_for_user: bool,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, Connection>,
    by_user: HashMap<UserId, Vec<ConnectionId>>,
    by_project: HashMap<ProjectId, Vec<ConnectionId>>,
    next_seq: u64,
}

impl RegistryInner {
    fn index_project(&mut self, project_id: &ProjectId, id: ConnectionId) {
        self.by_project.entry(project_id.clone()).or_default().push(id);
    }

    fn unindex_project(&mut self, project_id: &ProjectId, id: ConnectionId) {
        if let Some(ids) = self.by_project.get_mut(project_id) {
            ids.retain(|c| *c != id);
            if ids.is_empty() {
                self.by_project.remove(project_id);
            }
        }
    }

    fn remove(&mut self, id: ConnectionId) -> Option<Departure> {
        let conn = self.connections.remove(&id)?;

        let mut last_for_user = false;
        if let Some(ids) = self.by_user.get_mut(&conn.user_id) {
            ids.retain(|c| *c != id);
            if ids.is_empty() {
                self.by_user.remove(&conn.user_id);
                last_for_user = true;
            }
        }
        if let Some(project_id) = &conn.project_id {
            self.unindex_project(project_id, id);
        }

        Some(Departure {
            user_id: conn.user_id,
            project_id: conn.project_id,
            transport: conn.transport,
            last_for_user,
        })
    }

    fn targets(&self, ids: &[ConnectionId]) -> Vec<(ConnectionId, Arc<dyn Transport>)> {
        ids.iter()
            .filter_map(|id| self.connections.get(id))
            .map(|conn| (conn.id, conn.transport.clone()))
            .collect()
    }
}

/// Process-local registry of live connections
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
    observer: RwLock<Option<Weak<dyn ConnectionObserver>>>,
    relay: Option<Arc<CrossInstanceRelay>>,
    tasks: BackgroundTasks,
}

impl ConnectionRegistry {
    /// Create a registry; `relay` enables the `fan_out_*` methods to reach other instances
    pub fn new(relay: Option<Arc<CrossInstanceRelay>>) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            observer: RwLock::new(None),
            relay,
            tasks: BackgroundTasks::new(),
        }
    }

    /// Register the component told about user-level connects and disconnects
    pub async fn set_observer(&self, observer: Weak<dyn ConnectionObserver>) {
        *self.observer.write().await = Some(observer);
    }

    async fn observer(&self) -> Option<Arc<dyn ConnectionObserver>> {
        self.observer.read().await.as_ref().and_then(Weak::upgrade)
    }

    /// Accept a transport for `user_id` and return its connection id
    pub async fn connect(
        &self,
        transport: Arc<dyn Transport>,
        user_id: impl Into<UserId>,
        project_id: Option<ProjectId>,
        metadata: Option<Map<String, Value>>,
    ) -> ConnectionId {
        let user_id = user_id.into();
        let metadata = metadata.unwrap_or_default();
        let id = Uuid::new_v4();
        let now = Utc::now();

        {
            let mut inner = self.inner.write().await;
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.connections.insert(
                id,
                Connection {
                    id,
                    seq,
                    user_id: user_id.clone(),
                    project_id: project_id.clone(),
                    transport,
                    connected_at: now,
                    last_activity: now,
                    metadata: metadata.clone(),
                },
            );
            inner.by_user.entry(user_id.clone()).or_default().push(id);
            if let Some(project_id) = &project_id {
                inner.index_project(project_id, id);
            }
        }

        tracing::info!(
            connection_id = %id,
            "[Registry] User {} connected (project: {:?})",
            user_id,
            project_id
        );

        if let Some(observer) = self.observer().await {
            observer
                .on_connected(&user_id, project_id.as_ref(), &metadata)
                .await;
        }

        if let Some(project_id) = &project_id {
            let envelope = Envelope::new(ServerMessage::UserStatusChange {
                user_id: user_id.clone(),
                project_id: Some(project_id.clone()),
                status: ConnectionStatus::Connected,
            });
            self.fan_out_project(project_id, &envelope, Some(&user_id)).await;
        }

        id
    }

    /// Remove a connection; unknown ids are ignored
    pub async fn disconnect(&self, connection_id: ConnectionId) {
        self.evict(vec![connection_id]).await;
    }

    /// Remove connections, notifying for each user that lost its last one.
    /// Notifications can themselves fail and queue further evictions.
    async fn evict(&self, mut pending: Vec<ConnectionId>) {
        while let Some(id) = pending.pop() {
            let departure = {
                let mut inner = self.inner.write().await;
                inner.remove(id)
            };
            let Some(departure) = departure else {
                continue;
            };

            departure.transport.close().await;
            tracing::info!(
                connection_id = %id,
                "[Registry] User {} disconnected (last local connection: {})",
                departure.user_id,
                departure.last_for_user
            );

            if !departure.last_for_user {
                continue;
            }

            if let Some(observer) = self.observer().await {
                observer
                    .on_last_disconnected(&departure.user_id, departure.project_id.as_ref())
                    .await;
            }

            if let Some(project_id) = &departure.project_id {
                let envelope = Envelope::new(ServerMessage::UserStatusChange {
                    user_id: departure.user_id.clone(),
                    project_id: Some(project_id.clone()),
                    status: ConnectionStatus::Disconnected,
                });
                let failed = self
                    .deliver_project(project_id, &envelope, Some(&departure.user_id))
                    .await
                    .1;
                pending.extend(failed);
                if let Some(relay) = &self.relay {
                    relay
                        .publish_project(project_id, &envelope, Some(&departure.user_id))
                        .await;
                }
            }
        }
    }

    /// Send to every target; returns (delivered, failed ids)
    async fn deliver(
        targets: Vec<(ConnectionId, Arc<dyn Transport>)>,
        envelope: &Envelope,
    ) -> (usize, Vec<ConnectionId>) {
        let text = match envelope.to_wire() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(
                    "[Registry] Failed to serialize {} envelope: {}",
                    envelope.message_type(),
                    e
                );
                return (0, Vec::new());
            }
        };

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, transport) in targets {
            match transport.send(text.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(connection_id = %id, "[Registry] Send failed, evicting: {}", e);
                    failed.push(id);
                }
            }
        }
        (delivered, failed)
    }

    async fn deliver_project(
        &self,
        project_id: &str,
        envelope: &Envelope,
        exclude_user: Option<&str>,
    ) -> (usize, Vec<ConnectionId>) {
        let targets = {
            let inner = self.inner.read().await;
            let ids: Vec<ConnectionId> = inner
                .by_project
                .get(project_id)
                .map(|ids| {
                    ids.iter()
                        .copied()
                        .filter(|id| {
                            exclude_user.map_or(true, |excluded| {
                                inner
                                    .connections
                                    .get(id)
                                    .map_or(false, |c| c.user_id != excluded)
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            inner.targets(&ids)
        };
        Self::deliver(targets, envelope).await
    }

    /// Deliver to every local connection of `user_id`; true if any send succeeded
    pub async fn send_to_user(&self, user_id: &str, envelope: &Envelope) -> bool {
        let targets = {
            let inner = self.inner.read().await;
            match inner.by_user.get(user_id) {
                Some(ids) => inner.targets(ids),
                None => return false,
            }
        };
        let (delivered, failed) = Self::deliver(targets, envelope).await;
        self.evict(failed).await;
        delivered > 0
    }

    /// Deliver to every local connection in the project except `exclude_user`'s
    pub async fn broadcast_to_project(
        &self,
        project_id: &str,
        envelope: &Envelope,
        exclude_user: Option<&str>,
    ) -> usize {
        let (delivered, failed) = self.deliver_project(project_id, envelope, exclude_user).await;
        self.evict(failed).await;
        tracing::debug!(
            "[Registry] {} delivered to {} connection(s) in project {}",
            envelope.message_type(),
            delivered,
            project_id
        );
        delivered
    }

    /// Deliver to every local connection
    pub async fn broadcast_to_all(&self, envelope: &Envelope) -> usize {
        let targets = {
            let inner = self.inner.read().await;
            let mut conns: Vec<&Connection> = inner.connections.values().collect();
            conns.sort_by_key(|c| c.seq);
            conns
                .into_iter()
                .map(|c| (c.id, c.transport.clone()))
                .collect::<Vec<_>>()
        };
        let (delivered, failed) = Self::deliver(targets, envelope).await;
        self.evict(failed).await;
        delivered
    }

    /// Local delivery plus relay publish to other instances
    pub async fn fan_out_project(
        &self,
        project_id: &str,
        envelope: &Envelope,
        exclude_user: Option<&str>,
    ) -> usize {
        let delivered = self.broadcast_to_project(project_id, envelope, exclude_user).await;
        if let Some(relay) = &self.relay {
            relay.publish_project(project_id, envelope, exclude_user).await;
        }
        delivered
    }

    /// Local delivery plus relay publish to other instances
    pub async fn fan_out_user(&self, user_id: &str, envelope: &Envelope) -> bool {
        let delivered = self.send_to_user(user_id, envelope).await;
        if let Some(relay) = &self.relay {
            relay.publish_user(user_id, envelope).await;
        }
        delivered
    }

    /// Local delivery plus relay publish to other instances
    pub async fn fan_out_all(&self, envelope: &Envelope) -> usize {
        let delivered = self.broadcast_to_all(envelope).await;
        if let Some(relay) = &self.relay {
            relay.publish_broadcast(envelope).await;
        }
        delivered
    }

    /// Record inbound activity on a connection
    pub async fn touch(&self, connection_id: ConnectionId) {
        let mut inner = self.inner.write().await;
        if let Some(conn) = inner.connections.get_mut(&connection_id) {
            conn.last_activity = Utc::now();
        }
    }

    /// Move a connection into `project_id`; returns the project it left
    pub async fn join_project(
        &self,
        connection_id: ConnectionId,
        project_id: impl Into<ProjectId>,
    ) -> CollabResult<Option<ProjectId>> {
        let project_id = project_id.into();
        let mut inner = self.inner.write().await;
        let previous = {
            let conn = inner
                .connections
                .get_mut(&connection_id)
                .ok_or_else(|| CollabError::not_found(format!("connection {}", connection_id)))?;
            if conn.project_id.as_deref() == Some(project_id.as_str()) {
                return Ok(Some(project_id));
            }
            conn.last_activity = Utc::now();
            conn.project_id.replace(project_id.clone())
        };
        if let Some(previous) = &previous {
            inner.unindex_project(previous, connection_id);
        }
        inner.index_project(&project_id, connection_id);
        Ok(previous)
    }

    /// Remove a connection from its project; returns the project it left
    pub async fn leave_project(&self, connection_id: ConnectionId) -> CollabResult<Option<ProjectId>> {
        let mut inner = self.inner.write().await;
        let previous = inner
            .connections
            .get_mut(&connection_id)
            .ok_or_else(|| CollabError::not_found(format!("connection {}", connection_id)))?
            .project_id
            .take();
        if let Some(previous) = &previous {
            inner.unindex_project(previous, connection_id);
        }
        Ok(previous)
    }

    /// Disconnect connections idle for longer than `timeout`
    pub async fn cleanup_stale(&self, timeout: Duration) -> usize {
        self.cleanup_stale_at(Utc::now(), timeout).await
    }

    pub async fn cleanup_stale_at(&self, now: DateTime<Utc>, timeout: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|timeout| now.checked_sub_signed(timeout))
        else {
            return 0;
        };
        let stale: Vec<ConnectionId> = {
            let inner = self.inner.read().await;
            inner
                .connections
                .values()
                .filter(|c| c.last_activity < cutoff)
                .map(|c| c.id)
                .collect()
        };
        let count = stale.len();
        if count > 0 {
            tracing::info!("[Registry] Cleaning up {} stale connection(s)", count);
            self.evict(stale).await;
        }
        count
    }

    /// Close every connection, used at shutdown
    pub async fn disconnect_all(&self) -> usize {
        let ids: Vec<ConnectionId> = self.inner.read().await.connections.keys().copied().collect();
        let count = ids.len();
        self.evict(ids).await;
        count
    }

    pub async fn connection(&self, connection_id: ConnectionId) -> Option<ConnectionInfo> {
        let inner = self.inner.read().await;
        inner.connections.get(&connection_id).map(ConnectionInfo::from)
    }

    pub async fn user_connections(&self, user_id: &str) -> Vec<ConnectionInfo> {
        let inner = self.inner.read().await;
        inner
            .by_user
            .get(user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.connections.get(id))
                    .map(ConnectionInfo::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Distinct users with a connection in the project, in registration order
    pub async fn project_users(&self, project_id: &str) -> Vec<UserId> {
        let inner = self.inner.read().await;
        let mut users: Vec<UserId> = Vec::new();
        for id in inner.by_project.get(project_id).into_iter().flatten() {
            if let Some(conn) = inner.connections.get(id) {
                if !users.contains(&conn.user_id) {
                    users.push(conn.user_id.clone());
                }
            }
        }
        users
    }

    pub async fn active_projects(&self) -> Vec<ProjectId> {
        let inner = self.inner.read().await;
        let mut projects: Vec<ProjectId> = inner.by_project.keys().cloned().collect();
        projects.sort();
        projects
    }

    pub async fn is_user_connected(&self, user_id: &str) -> bool {
        self.inner.read().await.by_user.contains_key(user_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    pub async fn stats(&self) -> RegistryStats {
        let inner = self.inner.read().await;
        let connections_per_project: BTreeMap<ProjectId, usize> = inner
            .by_project
            .iter()
            .map(|(project, ids)| (project.clone(), ids.len()))
            .collect();
        RegistryStats {
            total_connections: inner.connections.len(),
            unique_users: inner.by_user.len(),
            active_projects: connections_per_project.len(),
            connections_per_project,
        }
    }

    /// Start the periodic stale-connection sweep
    pub fn start(self: &Arc<Self>, config: &RegistryConfig) -> bool {
        let registry = Arc::downgrade(self);
        let timeout = config.stale_timeout;
        let period = config.stale_sweep_interval;
        let started = self.tasks.start_with(|| {
            vec![(
                "Registry",
                spawn_periodic("Registry", period, move || {
                    let registry = registry.clone();
                    async move {
                        if let Some(registry) = registry.upgrade() {
                            registry.cleanup_stale(timeout).await;
                        }
                        Ok(())
                    }
                }),
            )]
        });
        if started {
            tracing::info!("[Registry] Stale connection sweep started");
        }
        started
    }

    pub fn stop(&self) {
        if self.tasks.stop() > 0 {
            tracing::info!("[Registry] Stale connection sweep stopped");
        }
    }
}
