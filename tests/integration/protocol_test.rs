//! Client protocol integration tests

use assert_matches::assert_matches;
use async_trait::async_trait;
use collabcore::backend::error::CollabResult;
use collabcore::backend::registry::ConnectionId;
use collabcore::backend::services::{CollabServices, ServiceBackends};
use collabcore::backend::ws::{handle_client_message, ConnectionContext, ProjectAccess};
use collabcore::shared::{Envelope, PresenceStatus, ServerMessage};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

use crate::common::{connect, services, test_config};
use crate::{assert_not_received, assert_received};

/// Admits everyone except to one locked project
struct LockedProject(&'static str);

#[async_trait]
impl ProjectAccess for LockedProject {
    async fn can_join(&self, _user_id: &str, project_id: &str) -> CollabResult<bool> {
        Ok(project_id != self.0)
    }
}

fn ctx(connection_id: ConnectionId, user_id: &str) -> ConnectionContext {
    ConnectionContext {
        connection_id,
        user_id: user_id.to_string(),
    }
}

async fn send(services: &CollabServices, ctx: &ConnectionContext, frame: serde_json::Value) -> Option<Envelope> {
    handle_client_message(services, ctx, &frame.to_string()).await
}

fn error_code(reply: Option<Envelope>) -> String {
    match reply.map(|e| e.message) {
        Some(ServerMessage::Error { code, .. }) => code,
        other => panic!("Expected an error reply, got {:?}", other),
    }
}

#[tokio::test]
async fn test_ping_gets_pong() {
    let services = services("protocol-ping").await;
    let (id, _) = connect(&services, "alice", None).await;

    let reply = send(&services, &ctx(id, "alice"), json!({ "type": "ping" })).await;

    assert_matches!(reply.map(|e| e.message), Some(ServerMessage::Pong {}));
}

#[tokio::test]
async fn test_malformed_frame_gets_error_and_connection_survives() {
    let services = services("protocol-malformed").await;
    let (id, _) = connect(&services, "alice", None).await;

    let reply = handle_client_message(&services, &ctx(id, "alice"), "{not json").await;

    assert_eq!(error_code(reply), "malformed_message");
    assert!(services.registry.connection(id).await.is_some());
}

#[tokio::test]
async fn test_activity_requires_a_project() {
    let services = services("protocol-activity").await;
    let (id, _) = connect(&services, "alice", None).await;

    let reply = send(
        &services,
        &ctx(id, "alice"),
        json!({ "type": "activity", "data": { "activity_type": "edit", "location": "src/auth.py" } }),
    )
    .await;

    assert_eq!(error_code(reply), "validation_error");
}

#[tokio::test]
async fn test_activity_reaches_project_members_but_not_sender() {
    let services = services("protocol-activity-fanout").await;
    let (id, alice) = connect(&services, "alice", Some("p1")).await;
    let (_, bob) = connect(&services, "bob", Some("p1")).await;

    let reply = send(
        &services,
        &ctx(id, "alice"),
        json!({ "type": "activity", "data": { "activity_type": "edit", "location": "src/auth.py" } }),
    )
    .await;

    assert!(reply.is_none());
    assert_received!(bob, "user_activity_update");
    assert_not_received!(alice, "user_activity_update");
    let record = services.presence.get_presence("alice").await.unwrap();
    assert_eq!(record.current_location.as_deref(), Some("src/auth.py"));
}

#[tokio::test]
async fn test_join_project_replies_with_presence() {
    let services = services("protocol-join").await;
    connect(&services, "bob", Some("p1")).await;
    let (id, _) = connect(&services, "alice", None).await;

    let reply = send(
        &services,
        &ctx(id, "alice"),
        json!({ "type": "join_project", "data": { "project_id": "p1" } }),
    )
    .await;

    match reply.map(|e| e.message) {
        Some(ServerMessage::ProjectPresence { project_id, users }) => {
            assert_eq!(project_id, "p1");
            let mut names: Vec<&str> = users.iter().map(|u| u.user_id.as_str()).collect();
            names.sort();
            assert_eq!(names, vec!["alice", "bob"]);
        }
        other => panic!("Expected project_presence, got {:?}", other),
    }
    assert_eq!(
        services.registry.connection(id).await.unwrap().project_id.as_deref(),
        Some("p1")
    );
}

#[tokio::test]
async fn test_join_locked_project_is_forbidden() {
    let backends = ServiceBackends {
        access: Arc::new(LockedProject("secret")),
        ..ServiceBackends::in_memory()
    };
    let services = CollabServices::new(test_config("protocol-locked"), backends).await;
    let (id, _) = connect(&services, "alice", None).await;

    let reply = send(
        &services,
        &ctx(id, "alice"),
        json!({ "type": "join_project", "data": { "project_id": "secret" } }),
    )
    .await;

    assert_eq!(error_code(reply), "forbidden");
    assert!(services.registry.project_users("secret").await.is_empty());
}

#[tokio::test]
async fn test_broadcast_requires_membership() {
    let services = services("protocol-broadcast-denied").await;
    let (id, _) = connect(&services, "alice", None).await;

    let reply = send(
        &services,
        &ctx(id, "alice"),
        json!({ "type": "broadcast", "data": { "content": "hello" } }),
    )
    .await;

    assert_eq!(error_code(reply), "forbidden");
}

#[tokio::test]
async fn test_broadcast_fans_out_to_project() {
    let services = services("protocol-broadcast").await;
    let (id, alice) = connect(&services, "alice", Some("p1")).await;
    let (_, bob) = connect(&services, "bob", Some("p1")).await;
    let (_, carol) = connect(&services, "carol", Some("p2")).await;

    send(
        &services,
        &ctx(id, "alice"),
        json!({ "type": "broadcast", "data": { "content": { "text": "@bob can you review?" } } }),
    )
    .await;

    let frames = bob.of_type("broadcast");
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["data"]["from_user"], "alice");
    assert_not_received!(alice, "broadcast");
    assert_not_received!(carol, "broadcast");
}

#[tokio::test]
async fn test_heartbeat_restores_cleaned_up_session() {
    let services = services("protocol-heartbeat").await;
    let (id, _) = connect(&services, "alice", Some("p1")).await;
    services.presence.unregister_session("alice").await;

    let reply = send(
        &services,
        &ctx(id, "alice"),
        json!({ "type": "heartbeat", "data": { "location": "src/auth.py" } }),
    )
    .await;

    assert_matches!(reply, None);
    let record = services.presence.get_presence("alice").await.unwrap();
    assert_eq!(record.status, PresenceStatus::Active);
    assert_eq!(record.project_id.as_deref(), Some("p1"));
    assert_eq!(record.session_id, id.to_string());
}
