/**
 * Client Protocol Dispatch
 *
 * Turns one inbound text frame into engine calls and, where the protocol
 * defines one, a direct reply to the sending connection.
 *
 * | Inbound `type`      | Effect                                              | Reply              |
 * |---------------------|-----------------------------------------------------|--------------------|
 * | `ping`              | none                                                | `pong`             |
 * | `heartbeat`         | presence heartbeat; re-registers a missing session  | none               |
 * | `presence_update`   | explicit presence change                            | none               |
 * | `activity`          | recorded, relayed as `user_activity_update`         | none               |
 * | `join_project`      | permission check, then registry and presence move   | `project_presence` |
 * | `leave_project`     | leaves the current project                          | none               |
 * | `broadcast`         | fan-out to the sender's project, mentions notified  | none               |
 * | `get_presence`      | none                                                | `project_presence` |
 *
 * Validation and permission failures become `error` replies and leave the
 * connection open. Other failures are logged and produce no reply.
 */

use async_trait::async_trait;
use serde_json::Value;

use crate::backend::error::{CollabError, CollabResult};
use crate::backend::registry::ConnectionId;
use crate::backend::services::CollabServices;
use crate::shared::{
    ActivityEvent, ActivityReport, ClientMessage, Envelope, HeartbeatData, PresenceStatus,
    ProjectId, ServerMessage, SharedError, UserId,
};

/// Decides whether a user may join a project
#[async_trait]
pub trait ProjectAccess: Send + Sync {
    async fn can_join(&self, user_id: &str, project_id: &str) -> CollabResult<bool>;
}

/// Access policy that admits everyone; membership is enforced upstream
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllProjects;

#[async_trait]
impl ProjectAccess for AllowAllProjects {
    async fn can_join(&self, _user_id: &str, _project_id: &str) -> CollabResult<bool> {
        Ok(true)
    }
}

/// Who sent the frame being handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
}

/// Handle one inbound text frame; returns the reply for the sender, if any
pub async fn handle_client_message(
    services: &CollabServices,
    ctx: &ConnectionContext,
    text: &str,
) -> Option<Envelope> {
    let message = match ClientMessage::parse(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(
                connection_id = %ctx.connection_id,
                "[Ws] Rejected frame from {}: {}",
                ctx.user_id,
                e
            );
            return Some(Envelope::from(&CollabError::from(e)));
        }
    };

    match dispatch(services, ctx, message).await {
        Ok(reply) => reply,
        Err(e) if e.is_client_facing() => {
            tracing::debug!("[Ws] Replying with error to {}: {}", ctx.user_id, e);
            Some(Envelope::from(&e))
        }
        Err(e) => {
            tracing::error!(
                connection_id = %ctx.connection_id,
                "[Ws] Failed to handle message from {}: {}",
                ctx.user_id,
                e
            );
            None
        }
    }
}

async fn dispatch(
    services: &CollabServices,
    ctx: &ConnectionContext,
    message: ClientMessage,
) -> CollabResult<Option<Envelope>> {
    match message {
        ClientMessage::Ping => Ok(Some(Envelope::new(ServerMessage::Pong {}))),
        ClientMessage::Heartbeat(data) => {
            heartbeat(services, ctx, data).await?;
            Ok(None)
        }
        ClientMessage::PresenceUpdate(update) => {
            services.presence.update_presence(&ctx.user_id, update).await?;
            Ok(None)
        }
        ClientMessage::Activity(report) => {
            activity(services, ctx, report).await?;
            Ok(None)
        }
        ClientMessage::JoinProject { project_id } => {
            join_project(services, ctx, project_id).await.map(Some)
        }
        ClientMessage::LeaveProject => {
            leave_project(services, ctx).await?;
            Ok(None)
        }
        ClientMessage::Broadcast { content } => {
            broadcast(services, ctx, content).await?;
            Ok(None)
        }
        ClientMessage::GetPresence => {
            let project_id = require_project(services, ctx).await?;
            Ok(Some(project_presence(services, project_id).await))
        }
    }
}

async fn current_project(services: &CollabServices, ctx: &ConnectionContext) -> Option<ProjectId> {
    services
        .registry
        .connection(ctx.connection_id)
        .await
        .and_then(|conn| conn.project_id)
}

async fn require_project(services: &CollabServices, ctx: &ConnectionContext) -> CollabResult<ProjectId> {
    current_project(services, ctx).await.ok_or_else(|| {
        CollabError::from(SharedError::validation(
            "project_id",
            "join a project first",
        ))
    })
}

async fn project_presence(services: &CollabServices, project_id: ProjectId) -> Envelope {
    let users = services.presence.get_project_presence(&project_id).await;
    Envelope::new(ServerMessage::ProjectPresence { project_id, users })
}

/// A heartbeat for a user whose session was cleaned up starts a fresh one
async fn heartbeat(
    services: &CollabServices,
    ctx: &ConnectionContext,
    data: HeartbeatData,
) -> CollabResult<()> {
    match services.presence.heartbeat(&ctx.user_id, Some(data.clone())).await {
        Ok(_) => Ok(()),
        Err(CollabError::NotFound { .. }) => {
            let project_id = current_project(services, ctx).await;
            services
                .presence
                .register_session(
                    ctx.user_id.clone(),
                    ctx.connection_id.to_string(),
                    project_id,
                    PresenceStatus::Active,
                    None,
                )
                .await;
            services.presence.heartbeat(&ctx.user_id, Some(data)).await?;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn activity(
    services: &CollabServices,
    ctx: &ConnectionContext,
    report: ActivityReport,
) -> CollabResult<()> {
    let project_id = require_project(services, ctx).await?;

    let mut event = ActivityEvent::new(
        ctx.user_id.clone(),
        project_id.clone(),
        report.activity_type.clone(),
        report.location.clone(),
    );
    event.metadata = report.metadata.clone();
    if let Err(e) = services.recorder.record(event).await {
        tracing::warn!("[Ws] Failed to record activity of {}: {}", ctx.user_id, e);
    }

    // Reported activity also counts as liveness
    let liveness = HeartbeatData {
        location: report.location.clone(),
        activity: Some(report.activity_type.clone()),
        metadata: None,
    };
    if let Err(e) = services.presence.heartbeat(&ctx.user_id, Some(liveness)).await {
        tracing::debug!("[Ws] Activity from {} without presence: {}", ctx.user_id, e);
    }

    let envelope = Envelope::new(ServerMessage::UserActivityUpdate {
        user_id: ctx.user_id.clone(),
        project_id: Some(project_id.clone()),
        activity: report.clone(),
    });
    services
        .registry
        .broadcast_to_project(&project_id, &envelope, Some(&ctx.user_id))
        .await;
    services
        .relay
        .publish_activity(&ctx.user_id, Some(&project_id), &report)
        .await;

    services
        .triggers
        .on_activity_created(
            &project_id,
            &ctx.user_id,
            &report.activity_type,
            report.location.as_deref(),
        )
        .await;
    Ok(())
}

async fn join_project(
    services: &CollabServices,
    ctx: &ConnectionContext,
    project_id: ProjectId,
) -> CollabResult<Envelope> {
    if !services.access.can_join(&ctx.user_id, &project_id).await? {
        return Err(CollabError::permission(format!(
            "{} may not join project {}",
            ctx.user_id, project_id
        )));
    }

    let previous = services
        .registry
        .join_project(ctx.connection_id, project_id.clone())
        .await?;
    match services
        .presence
        .set_project(&ctx.user_id, Some(project_id.clone()))
        .await
    {
        Ok(_) => {}
        Err(CollabError::NotFound { .. }) => {
            services
                .presence
                .register_session(
                    ctx.user_id.clone(),
                    ctx.connection_id.to_string(),
                    Some(project_id.clone()),
                    PresenceStatus::Active,
                    None,
                )
                .await;
        }
        Err(e) => return Err(e),
    }

    tracing::info!(
        "[Ws] {} joined project {} (left: {:?})",
        ctx.user_id,
        project_id,
        previous
    );
    Ok(project_presence(services, project_id).await)
}

async fn leave_project(services: &CollabServices, ctx: &ConnectionContext) -> CollabResult<()> {
    let previous = services.registry.leave_project(ctx.connection_id).await?;
    if let Some(previous) = previous {
        if let Err(e) = services.presence.set_project(&ctx.user_id, None).await {
            tracing::debug!("[Ws] {} left {} without presence: {}", ctx.user_id, previous, e);
        }
        tracing::info!("[Ws] {} left project {}", ctx.user_id, previous);
    }
    Ok(())
}

/// Text carried by a broadcast, for mention detection
fn broadcast_text(content: &Value) -> Option<&str> {
    match content {
        Value::String(text) => Some(text),
        Value::Object(map) => map
            .get("text")
            .or_else(|| map.get("message"))
            .and_then(Value::as_str),
        _ => None,
    }
}

async fn broadcast(services: &CollabServices, ctx: &ConnectionContext, content: Value) -> CollabResult<()> {
    let project_id = current_project(services, ctx)
        .await
        .ok_or_else(|| CollabError::permission("broadcasts require project membership"))?;

    if let Some(text) = broadcast_text(&content) {
        services
            .triggers
            .on_mention(Some(&project_id), &ctx.user_id, text)
            .await;
    }

    let envelope = Envelope::new(ServerMessage::Broadcast {
        from_user: Some(ctx.user_id.clone()),
        project_id: Some(project_id.clone()),
        content,
    });
    services
        .registry
        .fan_out_project(&project_id, &envelope, Some(&ctx.user_id))
        .await;
    Ok(())
}
