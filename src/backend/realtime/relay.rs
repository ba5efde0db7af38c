/**
 * Cross-Instance Relay
 *
 * Bridges independent server processes over a shared `MessageBus` so a message
 * published once reaches every locally-connected socket on every process.
 *
 * # Channels
 *
 * Five fixed channels, each prefixed with the configured channel prefix:
 *
 * - `<prefix>_broadcast_all`
 * - `<prefix>_project_broadcast`
 * - `<prefix>_user_message`
 * - `<prefix>_presence_update`
 * - `<prefix>_activity_update`
 *
 * # Loop Prevention
 *
 * Every published `RelayEnvelope` carries the publishing instance id. The
 * listener discards envelopes carrying its own id and replays the rest through
 * the local `ConnectionRegistry`, so each process applies a message at most
 * once and never re-applies its own.
 *
 * # Failures
 *
 * Publish and receive failures are logged and counted, never retried. When the
 * bus stream ends the listener waits `resubscribe_delay` and subscribes again,
 * for as long as the relay is alive and not stopped.
 */

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::error::CollabResult;
use crate::backend::presence::PresenceCoordinator;
use crate::backend::realtime::bus::{BusMessage, MessageBus};
use crate::backend::registry::ConnectionRegistry;
use crate::backend::tasks::BackgroundTasks;
use crate::shared::config::RelayConfig;
use crate::shared::{ActivityReport, Envelope, PresenceRecord, ProjectId, ServerMessage, UserId};

/// Payload carried between instances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelayPayload {
    BroadcastAll {
        envelope: Envelope,
    },
    ProjectBroadcast {
        project_id: ProjectId,
        exclude_user: Option<UserId>,
        envelope: Envelope,
    },
    UserMessage {
        user_id: UserId,
        envelope: Envelope,
    },
    PresenceUpdate {
        user_id: UserId,
        project_id: Option<ProjectId>,
        presence: PresenceRecord,
    },
    ActivityUpdate {
        user_id: UserId,
        project_id: Option<ProjectId>,
        activity: ActivityReport,
    },
}

/// Instance-tagged message on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    pub instance_id: String,
    pub published_at: DateTime<Utc>,
    pub payload: RelayPayload,
}

/// Fully prefixed channel names
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayChannels {
    pub broadcast_all: String,
    pub project_broadcast: String,
    pub user_message: String,
    pub presence_update: String,
    pub activity_update: String,
}

impl RelayChannels {
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            broadcast_all: format!("{}_broadcast_all", prefix),
            project_broadcast: format!("{}_project_broadcast", prefix),
            user_message: format!("{}_user_message", prefix),
            presence_update: format!("{}_presence_update", prefix),
            activity_update: format!("{}_activity_update", prefix),
        }
    }

    pub fn all(&self) -> Vec<String> {
        vec![
            self.broadcast_all.clone(),
            self.project_broadcast.clone(),
            self.user_message.clone(),
            self.presence_update.clone(),
            self.activity_update.clone(),
        ]
    }

    fn for_payload(&self, payload: &RelayPayload) -> &str {
        match payload {
            RelayPayload::BroadcastAll { .. } => &self.broadcast_all,
            RelayPayload::ProjectBroadcast { .. } => &self.project_broadcast,
            RelayPayload::UserMessage { .. } => &self.user_message,
            RelayPayload::PresenceUpdate { .. } => &self.presence_update,
            RelayPayload::ActivityUpdate { .. } => &self.activity_update,
        }
    }
}

#[derive(Debug, Default)]
struct RelayCounters {
    published: AtomicU64,
    publish_failures: AtomicU64,
    received: AtomicU64,
    ignored_own: AtomicU64,
    malformed: AtomicU64,
    resubscribes: AtomicU64,
}

/// Relay counters for operational dashboards
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayStats {
    pub instance_id: String,
    pub backend: &'static str,
    pub listening: bool,
    pub channels: RelayChannels,
    pub published: u64,
    pub publish_failures: u64,
    pub received: u64,
    pub ignored_own: u64,
    pub malformed: u64,
    pub resubscribes: u64,
}

pub struct CrossInstanceRelay {
    instance_id: String,
    bus: Arc<dyn MessageBus>,
    channels: RelayChannels,
    counters: RelayCounters,
    resubscribe_delay: Duration,
    tasks: BackgroundTasks,
}

impl CrossInstanceRelay {
    pub fn new(bus: Arc<dyn MessageBus>, config: &RelayConfig) -> Self {
        Self {
            instance_id: config.instance_id.clone(),
            bus,
            channels: RelayChannels::with_prefix(&config.channel_prefix),
            counters: RelayCounters::default(),
            resubscribe_delay: config.resubscribe_delay,
            tasks: BackgroundTasks::new(),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn channels(&self) -> &RelayChannels {
        &self.channels
    }

    /// Publish a payload; returns false when the bus rejected it
    async fn publish(&self, payload: RelayPayload) -> bool {
        self.publish_at(payload, Utc::now()).await
    }

    async fn publish_at(&self, payload: RelayPayload, published_at: DateTime<Utc>) -> bool {
        let channel = self.channels.for_payload(&payload).to_string();
        let envelope = RelayEnvelope {
            instance_id: self.instance_id.clone(),
            published_at,
            payload,
        };

        let text = match serde_json::to_string(&envelope) {
            Ok(text) => text,
            Err(e) => {
                self.counters.publish_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!("[Relay] Failed to serialize envelope for {}: {}", channel, e);
                return false;
            }
        };

        match self.bus.publish(&channel, text).await {
            Ok(()) => {
                self.counters.published.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("[Relay] Published on {}", channel);
                true
            }
            Err(e) => {
                self.counters.publish_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("[Relay] Publish on {} dropped: {}", channel, e);
                false
            }
        }
    }

    pub async fn publish_broadcast(&self, envelope: &Envelope) -> bool {
        self.publish(RelayPayload::BroadcastAll {
            envelope: envelope.clone(),
        })
        .await
    }

    pub async fn publish_project(
        &self,
        project_id: &str,
        envelope: &Envelope,
        exclude_user: Option<&str>,
    ) -> bool {
        self.publish(RelayPayload::ProjectBroadcast {
            project_id: project_id.to_string(),
            exclude_user: exclude_user.map(str::to_string),
            envelope: envelope.clone(),
        })
        .await
    }

    pub async fn publish_user(&self, user_id: &str, envelope: &Envelope) -> bool {
        self.publish(RelayPayload::UserMessage {
            user_id: user_id.to_string(),
            envelope: envelope.clone(),
        })
        .await
    }

    pub async fn publish_presence(
        &self,
        user_id: &str,
        project_id: Option<&str>,
        presence: &PresenceRecord,
    ) -> bool {
        self.publish_presence_at(user_id, project_id, presence, Utc::now())
            .await
    }

    /// Publish presence stamped with the moment it was observed
    pub async fn publish_presence_at(
        &self,
        user_id: &str,
        project_id: Option<&str>,
        presence: &PresenceRecord,
        observed_at: DateTime<Utc>,
    ) -> bool {
        self.publish_at(
            RelayPayload::PresenceUpdate {
                user_id: user_id.to_string(),
                project_id: project_id.map(str::to_string),
                presence: presence.clone(),
            },
            observed_at,
        )
        .await
    }

    pub async fn publish_activity(
        &self,
        user_id: &str,
        project_id: Option<&str>,
        activity: &ActivityReport,
    ) -> bool {
        self.publish(RelayPayload::ActivityUpdate {
            user_id: user_id.to_string(),
            project_id: project_id.map(str::to_string),
            activity: activity.clone(),
        })
        .await
    }

    /// Decode a bus message; `None` for our own or malformed envelopes
    pub fn accept(&self, message: &BusMessage) -> Option<RelayEnvelope> {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        let envelope: RelayEnvelope = match serde_json::from_str(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("[Relay] Malformed envelope on {}: {}", message.channel, e);
                return None;
            }
        };

        if envelope.instance_id == self.instance_id {
            self.counters.ignored_own.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        Some(envelope)
    }

    /// Replay a foreign envelope through local delivery only
    pub async fn apply(
        &self,
        envelope: RelayEnvelope,
        registry: &ConnectionRegistry,
        presence: &PresenceCoordinator,
    ) {
        let origin = envelope.instance_id;
        let published_at = envelope.published_at;
        match envelope.payload {
            RelayPayload::BroadcastAll { envelope } => {
                let delivered = registry.broadcast_to_all(&envelope).await;
                tracing::debug!("[Relay] Replayed broadcast from {} to {} connection(s)", origin, delivered);
            }
            RelayPayload::ProjectBroadcast {
                project_id,
                exclude_user,
                envelope,
            } => {
                registry
                    .broadcast_to_project(&project_id, &envelope, exclude_user.as_deref())
                    .await;
            }
            RelayPayload::UserMessage { user_id, envelope } => {
                registry.send_to_user(&user_id, &envelope).await;
            }
            RelayPayload::PresenceUpdate {
                user_id,
                project_id,
                presence: record,
            } => {
                let changed = presence
                    .apply_remote_presence(record.clone(), &origin, published_at)
                    .await;
                // Keepalives that change nothing stay off the wire
                if !changed {
                    return;
                }
                if let Some(project_id) = &project_id {
                    let envelope = Envelope::new(ServerMessage::PresenceUpdate(record));
                    registry
                        .broadcast_to_project(project_id, &envelope, Some(&user_id))
                        .await;
                }
            }
            RelayPayload::ActivityUpdate {
                user_id,
                project_id,
                activity,
            } => {
                if let Some(project_id) = &project_id {
                    let envelope = Envelope::new(ServerMessage::UserActivityUpdate {
                        user_id: user_id.clone(),
                        project_id: Some(project_id.clone()),
                        activity,
                    });
                    registry
                        .broadcast_to_project(project_id, &envelope, Some(&user_id))
                        .await;
                }
            }
        }
    }

    /// Subscribe to every relay channel and replay foreign envelopes until stopped
    pub async fn start(
        self: &Arc<Self>,
        registry: &Arc<ConnectionRegistry>,
        presence: &Arc<PresenceCoordinator>,
    ) -> CollabResult<bool> {
        if self.tasks.is_running() {
            return Ok(false);
        }

        let channels = self.channels.all();
        let first = self.bus.subscribe(&channels).await?;
        let bus = self.bus.clone();
        let delay = self.resubscribe_delay;
        let relay = Arc::downgrade(self);
        let registry = Arc::downgrade(registry);
        let presence = Arc::downgrade(presence);

        let started = self.tasks.start_with(move || {
            vec![(
                "Relay",
                tokio::spawn(async move {
                    let mut stream = Some(first);
                    loop {
                        if let Some(mut current) = stream.take() {
                            while let Some(message) = current.next().await {
                                let (Some(relay), Some(registry), Some(presence)) =
                                    (relay.upgrade(), registry.upgrade(), presence.upgrade())
                                else {
                                    tracing::info!("[Relay] Listener finished");
                                    return;
                                };
                                if let Some(envelope) = relay.accept(&message) {
                                    relay.apply(envelope, &registry, &presence).await;
                                }
                            }
                            tracing::warn!("[Relay] Bus stream ended, re-subscribing");
                        }

                        tokio::time::sleep(delay).await;
                        let Some(owner) = relay.upgrade() else {
                            tracing::info!("[Relay] Listener finished");
                            return;
                        };
                        match bus.subscribe(&channels).await {
                            Ok(next) => {
                                owner.counters.resubscribes.fetch_add(1, Ordering::Relaxed);
                                tracing::info!("[Relay] Re-subscribed to {} bus", bus.backend());
                                stream = Some(next);
                            }
                            Err(e) => tracing::error!("[Relay] Re-subscribe failed: {}", e),
                        }
                    }
                }),
            )]
        });

        if started {
            tracing::info!(
                "[Relay] Listening as instance {} over {} bus",
                self.instance_id,
                self.bus.backend()
            );
        }
        Ok(started)
    }

    pub fn stop(&self) {
        if self.tasks.stop() > 0 {
            tracing::info!("[Relay] Listener stopped");
        }
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            instance_id: self.instance_id.clone(),
            backend: self.bus.backend(),
            listening: self.tasks.is_running(),
            channels: self.channels.clone(),
            published: self.counters.published.load(Ordering::Relaxed),
            publish_failures: self.counters.publish_failures.load(Ordering::Relaxed),
            received: self.counters.received.load(Ordering::Relaxed),
            ignored_own: self.counters.ignored_own.load(Ordering::Relaxed),
            malformed: self.counters.malformed.load(Ordering::Relaxed),
            resubscribes: self.counters.resubscribes.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for CrossInstanceRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossInstanceRelay")
            .field("instance_id", &self.instance_id)
            .field("backend", &self.bus.backend())
            .finish()
    }
}
