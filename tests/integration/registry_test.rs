//! Connection registry integration tests

use collabcore::shared::{Envelope, ServerMessage};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

use crate::common::{connect, services, FailingTransport};
use crate::{assert_not_received, assert_received};

fn note(text: &str) -> Envelope {
    Envelope::new(ServerMessage::Broadcast {
        from_user: None,
        project_id: Some("p1".to_string()),
        content: json!(text),
    })
}

#[tokio::test]
async fn test_connection_counts_follow_connect_and_disconnect() {
    let services = services("registry-counts").await;

    let (alice, _) = connect(&services, "alice", Some("p1")).await;
    let (_alice_tab, _) = connect(&services, "alice", Some("p1")).await;
    let (_bob, _) = connect(&services, "bob", Some("p2")).await;

    let stats = services.registry.stats().await;
    assert_eq!(stats.total_connections, 3);
    assert_eq!(stats.unique_users, 2);
    assert_eq!(stats.active_projects, 2);
    assert_eq!(stats.connections_per_project.get("p1"), Some(&2));

    services.registry.disconnect(alice).await;
    services.registry.disconnect(alice).await;

    let stats = services.registry.stats().await;
    assert_eq!(stats.total_connections, 2);
    assert!(services.registry.is_user_connected("alice").await);
}

#[tokio::test]
async fn test_project_broadcast_skips_excluded_user() {
    let services = services("registry-exclude").await;
    let (_, alice) = connect(&services, "alice", Some("p1")).await;
    let (_, bob) = connect(&services, "bob", Some("p1")).await;
    let (_, carol) = connect(&services, "carol", Some("p1")).await;
    for transport in [&alice, &bob, &carol] {
        transport.clear();
    }

    let delivered = services
        .registry
        .broadcast_to_project("p1", &note("standup in 5"), Some("bob"))
        .await;

    assert_eq!(delivered, 2);
    assert_received!(alice, "broadcast");
    assert_received!(carol, "broadcast");
    assert_not_received!(bob, "broadcast");
}

#[tokio::test]
async fn test_failed_send_evicts_connection() {
    let services = services("registry-evict").await;
    let (_, alice) = connect(&services, "alice", Some("p1")).await;
    let transport = Arc::new(FailingTransport::default());
    let broken = services
        .registry
        .connect(transport.clone(), "bob", Some("p1".to_string()), None)
        .await;

    let delivered = services
        .registry
        .broadcast_to_project("p1", &note("hello"), None)
        .await;

    assert_eq!(delivered, 1);
    assert!(services.registry.connection(broken).await.is_none());
    assert!(!services.registry.is_user_connected("bob").await);
    assert!(transport.is_closed());
    assert_received!(alice, "broadcast");
}

#[tokio::test]
async fn test_join_and_leave_move_project_membership() {
    let services = services("registry-membership").await;
    let (id, _) = connect(&services, "alice", None).await;

    let previous = services.registry.join_project(id, "p1").await.unwrap();
    assert_eq!(previous, None);
    assert_eq!(services.registry.project_users("p1").await, vec!["alice".to_string()]);

    let previous = services.registry.join_project(id, "p2").await.unwrap();
    assert_eq!(previous.as_deref(), Some("p1"));
    assert!(services.registry.project_users("p1").await.is_empty());

    let left = services.registry.leave_project(id).await.unwrap();
    assert_eq!(left.as_deref(), Some("p2"));
    assert!(services.registry.active_projects().await.is_empty());
}

#[tokio::test]
async fn test_stale_connections_are_swept() {
    let services = services("registry-stale").await;
    let (stale, _) = connect(&services, "alice", Some("p1")).await;

    let later = chrono::Utc::now() + chrono::Duration::minutes(10);
    let removed = services
        .registry
        .cleanup_stale_at(later, std::time::Duration::from_secs(300))
        .await;

    assert_eq!(removed, 1);
    assert!(services.registry.connection(stale).await.is_none());
}

#[tokio::test]
async fn test_disconnect_all_closes_transports() {
    let services = services("registry-shutdown").await;
    let (_, alice) = connect(&services, "alice", Some("p1")).await;
    let (_, bob) = connect(&services, "bob", None).await;

    assert_eq!(services.registry.disconnect_all().await, 2);
    assert_eq!(services.registry.connection_count().await, 0);
    assert!(alice.is_closed());
    assert!(bob.is_closed());
}
