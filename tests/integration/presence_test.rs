//! Presence coordinator integration tests

use chrono::{Duration, Utc};
use collabcore::backend::services::{CollabServices, ServiceBackends};
use collabcore::shared::{HeartbeatData, PresenceStatus};
use pretty_assertions::assert_eq;
use std::sync::Arc;

use crate::assert_received;
use crate::common::{
    connect, services, test_config, wait_until, FailingMirror, RecordingMirror, SlowFirstMirror,
};

#[tokio::test]
async fn test_fresh_connect_registers_online_presence() {
    let services = services("presence-fresh").await;
    assert!(services.registry.project_users("p1").await.is_empty());

    let (id, _) = connect(&services, "alice", Some("p1")).await;

    assert!(services.registry.connection(id).await.is_some());
    let record = services.presence.get_presence("alice").await.unwrap();
    assert_eq!(record.status, PresenceStatus::Online);
    let project = services.presence.get_project_presence("p1").await;
    assert!(project.iter().any(|r| r.user_id == "alice"));
}

#[tokio::test]
async fn test_project_members_hear_about_connect_and_disconnect() {
    let services = services("presence-announce").await;
    let (_, bob) = connect(&services, "bob", Some("p1")).await;
    bob.clear();

    let (alice, _) = connect(&services, "alice", Some("p1")).await;
    assert_received!(bob, "user_status_change");
    assert_received!(bob, "presence_update");

    bob.clear();
    services.registry.disconnect(alice).await;
    let changes = bob.of_type("user_status_change");
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0]["data"]["status"], "disconnected");
    assert_eq!(
        services.presence.get_presence("alice").await.unwrap().status,
        PresenceStatus::Offline
    );
}

#[tokio::test]
async fn test_silent_session_goes_away_then_offline() {
    let services = services("presence-sweep").await;
    // A session whose connection lives on another instance
    services
        .presence
        .register_session("alice", "s1", Some("p1".to_string()), PresenceStatus::Active, None)
        .await;
    let start = Utc::now();

    let transitions = services
        .presence
        .check_heartbeats_at(start + Duration::minutes(6))
        .await;
    assert_eq!(transitions, vec![("alice".to_string(), PresenceStatus::Away)]);

    let transitions = services
        .presence
        .check_heartbeats_at(start + Duration::minutes(16))
        .await;
    assert_eq!(transitions, vec![("alice".to_string(), PresenceStatus::Offline)]);

    let removed = services
        .presence
        .cleanup_offline_at(start + Duration::hours(2))
        .await;
    assert_eq!(removed, 1);
    assert!(services.presence.get_presence("alice").await.is_none());
}

#[tokio::test]
async fn test_connected_user_is_never_swept_offline() {
    let services = services("presence-connected").await;
    connect(&services, "alice", Some("p1")).await;

    services
        .presence
        .check_heartbeats_at(Utc::now() + Duration::minutes(30))
        .await;

    let record = services.presence.get_presence("alice").await.unwrap();
    assert_eq!(record.status, PresenceStatus::Away);
    assert_eq!(
        services
            .presence
            .cleanup_offline_at(Utc::now() + Duration::days(1))
            .await,
        0
    );
}

#[tokio::test]
async fn test_heartbeat_recovers_away_user() {
    let services = services("presence-recover").await;
    connect(&services, "alice", Some("p1")).await;
    services
        .presence
        .check_heartbeats_at(Utc::now() + Duration::minutes(6))
        .await;

    let record = services.presence.heartbeat("alice", None).await.unwrap();

    assert_eq!(record.status, PresenceStatus::Active);
}

#[tokio::test]
async fn test_repeated_heartbeat_does_not_rebroadcast() {
    let services = services("presence-idempotent").await;
    let (_, bob) = connect(&services, "bob", Some("p1")).await;
    connect(&services, "alice", Some("p1")).await;
    let data = HeartbeatData {
        location: Some("src/auth.py".to_string()),
        ..Default::default()
    };
    services
        .presence
        .heartbeat("alice", Some(data.clone()))
        .await
        .unwrap();
    bob.clear();

    let record = services.presence.heartbeat("alice", Some(data)).await.unwrap();

    assert_eq!(record.current_location.as_deref(), Some("src/auth.py"));
    assert_eq!(bob.count(), 0);
}

#[tokio::test]
async fn test_heartbeat_without_session_is_not_found() {
    let services = services("presence-missing").await;

    let result = services.presence.heartbeat("ghost", None).await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_presence_changes_reach_the_mirror() {
    let mirror = Arc::new(RecordingMirror::default());
    let backends = ServiceBackends {
        mirror: mirror.clone(),
        ..ServiceBackends::in_memory()
    };
    let services = CollabServices::new(test_config("presence-mirror"), backends).await;

    connect(&services, "alice", Some("p1")).await;

    assert!(wait_until(|| async { mirror.writes().iter().any(|r| r.user_id == "alice") }).await);
}

#[tokio::test]
async fn test_mirror_failure_does_not_block_presence() {
    let backends = ServiceBackends {
        mirror: Arc::new(FailingMirror),
        ..ServiceBackends::in_memory()
    };
    let services = CollabServices::new(test_config("presence-mirror-down"), backends).await;

    connect(&services, "alice", Some("p1")).await;

    let record = services.presence.get_presence("alice").await.unwrap();
    assert_eq!(record.status, PresenceStatus::Online);
}

#[tokio::test]
async fn test_mirror_keeps_the_latest_state_when_a_write_is_slow() {
    let mirror = Arc::new(SlowFirstMirror::default());
    let backends = ServiceBackends {
        mirror: mirror.clone(),
        ..ServiceBackends::in_memory()
    };
    let services = CollabServices::new(test_config("presence-mirror-order"), backends).await;

    services
        .presence
        .register_session("alice", "s1", Some("p1".to_string()), PresenceStatus::Online, None)
        .await;
    services.presence.unregister_session("alice").await;

    assert!(wait_until(|| async { mirror.writes().len() == 2 }).await);
    let statuses: Vec<PresenceStatus> = mirror.writes().iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![PresenceStatus::Online, PresenceStatus::Offline]);
}
