//! Cross-instance relay integration tests
//!
//! Two instances share one in-memory bus, standing in for two server
//! processes on the same Postgres.

use async_trait::async_trait;
use chrono::Duration;
use collabcore::backend::error::CollabResult;
use collabcore::backend::realtime::{BusMessage, InMemoryBus, MessageBus, RelayStats};
use collabcore::shared::{ActivityReport, Envelope, HeartbeatData, PresenceStatus, ServerMessage};
use futures_util::stream::{self, BoxStream, StreamExt};
use serde_json::{json, Map};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::common::{connect, started_on_bus, started_with, test_config, wait_until};

/// Bus whose first subscription ends at once, like a listener that lost its connection
struct EndsOnceBus {
    inner: InMemoryBus,
    subscriptions: AtomicUsize,
}

#[async_trait]
impl MessageBus for EndsOnceBus {
    async fn publish(&self, channel: &str, payload: String) -> CollabResult<()> {
        self.inner.publish(channel, payload).await
    }

    async fn subscribe(&self, channels: &[String]) -> CollabResult<BoxStream<'static, BusMessage>> {
        if self.subscriptions.fetch_add(1, Ordering::SeqCst) == 0 {
            return Ok(stream::empty::<BusMessage>().boxed());
        }
        self.inner.subscribe(channels).await
    }

    fn backend(&self) -> &'static str {
        "ends-once"
    }
}

fn note(text: &str) -> Envelope {
    Envelope::new(ServerMessage::Broadcast {
        from_user: None,
        project_id: None,
        content: json!(text),
    })
}

#[tokio::test]
async fn test_connect_on_one_instance_reaches_the_other() {
    let bus = InMemoryBus::default();
    let east = started_on_bus(&bus, "east").await;
    let west = started_on_bus(&bus, "west").await;
    let (_, bob) = connect(&east, "bob", Some("p1")).await;
    bob.clear();

    connect(&west, "alice", Some("p1")).await;

    assert!(wait_until(|| async { !bob.of_type("user_status_change").is_empty() }).await);
    assert!(wait_until(|| async { !bob.of_type("presence_update").is_empty() }).await);
    let change = &bob.of_type("user_status_change")[0];
    assert_eq!(change["data"]["user_id"], "alice");
    assert_eq!(change["data"]["status"], "connected");
}

#[tokio::test]
async fn test_remote_presence_is_visible_locally() {
    let bus = InMemoryBus::default();
    let east = started_on_bus(&bus, "east").await;
    let west = started_on_bus(&bus, "west").await;

    connect(&west, "alice", Some("p1")).await;

    assert!(
        wait_until(|| async {
            east.presence
                .get_project_presence("p1")
                .await
                .iter()
                .any(|r| r.user_id == "alice" && r.remote_instance.as_deref() == Some("west"))
        })
        .await
    );
    assert!(!east.registry.is_user_connected("alice").await);
}

#[tokio::test]
async fn test_instance_ignores_its_own_messages() {
    let bus = InMemoryBus::default();
    let east = started_on_bus(&bus, "east").await;
    let (_, alice) = connect(&east, "alice", Some("p1")).await;

    let envelope = Envelope::new(ServerMessage::Broadcast {
        from_user: None,
        project_id: None,
        content: json!("maintenance at noon"),
    });
    let delivered = east.registry.fan_out_all(&envelope).await;

    assert_eq!(delivered, 1);
    assert!(wait_until(|| async { east.relay.stats().ignored_own > 0 }).await);
    // Delivered once locally, never replayed
    assert_eq!(alice.of_type("broadcast").len(), 1);
}

#[tokio::test]
async fn test_activity_is_relayed_to_project_members() {
    let bus = InMemoryBus::default();
    let east = started_on_bus(&bus, "east").await;
    let west = started_on_bus(&bus, "west").await;
    let (_, bob) = connect(&east, "bob", Some("p1")).await;
    let report = ActivityReport {
        activity_type: "edit".to_string(),
        location: Some("src/auth.py".to_string()),
        metadata: Map::new(),
    };

    assert!(west.relay.publish_activity("alice", Some("p1"), &report).await);

    assert!(wait_until(|| async { !bob.of_type("user_activity_update").is_empty() }).await);
    let update = &bob.of_type("user_activity_update")[0];
    assert_eq!(update["data"]["activity"]["location"], "src/auth.py");
}

#[tokio::test]
async fn test_stopped_relay_stops_listening() {
    let bus = InMemoryBus::default();
    let east = started_on_bus(&bus, "east").await;
    assert!(east.relay.stats().listening);

    east.relay.stop();

    assert!(wait_until(|| async { !east.relay.stats().listening }).await);
}

#[tokio::test]
async fn test_listener_resubscribes_after_the_stream_ends() {
    let bus = InMemoryBus::default();
    let flaky = Arc::new(EndsOnceBus {
        inner: bus.clone(),
        subscriptions: AtomicUsize::new(0),
    });
    let mut config = test_config("east");
    config.relay.resubscribe_delay = std::time::Duration::from_millis(10);
    let east = started_with(flaky, config).await;
    let west = started_on_bus(&bus, "west").await;
    let (_, bob) = connect(&east, "bob", None).await;

    assert!(wait_until(|| async { east.relay.stats().resubscribes == 1 }).await);
    assert!(east.relay.stats().listening);

    assert!(west.relay.publish_broadcast(&note("after reconnect")).await);
    assert!(wait_until(|| async { bob.of_type("broadcast").len() == 1 }).await);
    assert_eq!(bob.of_type("broadcast")[0]["data"]["content"], "after reconnect");
}

#[tokio::test]
async fn test_leaving_one_instance_keeps_user_online_elsewhere() {
    let bus = InMemoryBus::default();
    let east = started_on_bus(&bus, "east").await;
    let west = started_on_bus(&bus, "west").await;
    connect(&east, "alice", Some("p1")).await;
    let (west_alice, _) = connect(&west, "alice", Some("p1")).await;
    assert!(wait_until(|| async { west.presence.stats().await.remote_sessions == 1 }).await);

    west.registry.disconnect(west_alice).await;

    assert!(east.registry.is_user_connected("alice").await);
    let seen = west.presence.get_presence("alice").await.unwrap();
    assert_eq!(seen.status, PresenceStatus::Online);
    assert_eq!(seen.remote_instance.as_deref(), Some("east"));
    let online = west.presence.get_online_users(Some("p1")).await;
    assert_eq!(online.len(), 1);
    assert_eq!(online[0].user_id, "alice");
    assert_eq!(
        east.presence.get_presence("alice").await.unwrap().status,
        PresenceStatus::Online
    );
}

#[tokio::test]
async fn test_live_remote_user_survives_sweeps_past_last_heartbeat() {
    let bus = InMemoryBus::default();
    let east = started_on_bus(&bus, "east").await;
    let west = started_on_bus(&bus, "west").await;
    let (_, bob) = connect(&east, "bob", Some("p1")).await;
    connect(&west, "alice", Some("p1")).await;
    assert!(wait_until(|| async { east.presence.get_presence("alice").await.is_some() }).await);
    for _ in 0..3 {
        west.presence
            .heartbeat("alice", Some(HeartbeatData::default()))
            .await
            .unwrap();
    }
    let last_heartbeat = west.presence.get_presence("alice").await.unwrap().last_heartbeat;

    // West's own sweep marks alice away and republishes her
    west.presence
        .check_heartbeats_at(last_heartbeat + Duration::minutes(10))
        .await;
    assert!(
        wait_until(|| async {
            east.presence
                .get_presence("alice")
                .await
                .is_some_and(|r| r.status == PresenceStatus::Away)
        })
        .await
    );
    east.presence
        .check_heartbeats_at(last_heartbeat + Duration::minutes(16))
        .await;
    assert!(east
        .presence
        .get_project_presence("p1")
        .await
        .iter()
        .any(|r| r.user_id == "alice"));

    // A quiet keepalive refreshes east without a new frame
    let foreign = |stats: RelayStats| stats.received - stats.ignored_own - stats.malformed;
    let before = foreign(east.relay.stats());
    let frames = bob.of_type("presence_update").len();
    west.presence
        .check_heartbeats_at(last_heartbeat + Duration::minutes(20))
        .await;
    assert!(wait_until(|| async { foreign(east.relay.stats()) > before }).await);
    east.presence
        .check_heartbeats_at(last_heartbeat + Duration::minutes(34))
        .await;
    assert!(east.presence.get_presence("alice").await.is_some());
    assert_eq!(bob.of_type("presence_update").len(), frames);
}

#[tokio::test]
async fn test_project_switch_reaches_old_members_on_other_instances() {
    let bus = InMemoryBus::default();
    let east = started_on_bus(&bus, "east").await;
    let west = started_on_bus(&bus, "west").await;
    let (_, bob) = connect(&east, "bob", Some("p1")).await;
    connect(&west, "alice", Some("p1")).await;

    west.presence
        .set_project("alice", Some("p2".to_string()))
        .await
        .unwrap();

    assert!(
        wait_until(|| async {
            bob.of_type("presence_update").iter().any(|frame| {
                frame["data"]["user_id"] == "alice"
                    && frame["data"]["status"] == "offline"
                    && frame["data"]["project_id"] == "p1"
            })
        })
        .await
    );
}
