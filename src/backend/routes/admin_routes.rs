/**
 * Admin Route Handlers
 *
 * Operational endpoints, all behind the admin token check:
 *
 * - `GET  /admin/stats` - registry, presence, relay and detector statistics
 * - `POST /admin/broadcast` - push a `broadcast` envelope to a project or everyone
 * - `POST /admin/cleanup` - run the stale-connection, heartbeat and offline sweeps now
 * - `GET  /admin/projects/{project_id}/conflicts` - cached conflicts with scoring
 * - `GET  /admin/users/{user_id}/activity` - what a user is doing right now
 * - `POST /admin/deployments` - report a finished deployment to the trigger glue
 */

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::backend::error::{CollabError, CollabResult};
use crate::backend::server::state::AppState;
use crate::backend::services::CollabServices;
use crate::shared::{Envelope, ProjectId, ServerMessage, UserId};

const DEFAULT_HISTORY_DAYS: u32 = 7;

#[derive(Debug, Deserialize)]
pub struct AdminBroadcast {
    pub content: Value,
    #[serde(default)]
    pub project_id: Option<ProjectId>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub days: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct DeploymentReport {
    pub project_id: ProjectId,
    pub deployment_id: String,
    pub environment: String,
    pub success: bool,
    #[serde(default)]
    pub triggered_by: Option<UserId>,
}

pub async fn get_stats(State(services): State<Arc<CollabServices>>) -> Json<Value> {
    Json(json!({
        "registry": services.registry.stats().await,
        "presence": services.presence.stats().await,
        "relay": services.relay.stats(),
        "detector": services.detector.stats().await,
    }))
}

pub async fn post_broadcast(
    State(services): State<Arc<CollabServices>>,
    Json(body): Json<AdminBroadcast>,
) -> Json<Value> {
    let envelope = Envelope::new(ServerMessage::Broadcast {
        from_user: None,
        project_id: body.project_id.clone(),
        content: body.content,
    });
    let delivered = match &body.project_id {
        Some(project_id) => services.registry.fan_out_project(project_id, &envelope, None).await,
        None => services.registry.fan_out_all(&envelope).await,
    };
    tracing::info!(
        "[Admin] Broadcast to {} delivered locally to {} connection(s)",
        body.project_id.as_deref().unwrap_or("everyone"),
        delivered
    );
    Json(json!({ "delivered": delivered }))
}

pub async fn post_cleanup(State(services): State<Arc<CollabServices>>) -> Json<Value> {
    let now = Utc::now();
    let stale_connections = services
        .registry
        .cleanup_stale_at(now, services.config.registry.stale_timeout)
        .await;
    let status_changes = services.presence.check_heartbeats_at(now).await.len();
    let sessions_removed = services.presence.cleanup_offline_at(now).await;
    tracing::info!(
        "[Admin] Manual cleanup: {} stale connection(s), {} status change(s), {} session(s) removed",
        stale_connections,
        status_changes,
        sessions_removed
    );
    Json(json!({
        "stale_connections": stale_connections,
        "status_changes": status_changes,
        "sessions_removed": sessions_removed,
    }))
}

pub async fn get_project_conflicts(
    State(services): State<Arc<CollabServices>>,
    Path(project_id): Path<ProjectId>,
    Query(params): Query<HistoryParams>,
) -> Json<Value> {
    let detector = &services.detector;
    let conflicts: Vec<Value> = detector
        .recent_conflicts(&project_id)
        .await
        .into_iter()
        .map(|conflict| {
            json!({
                "analysis": detector.analyze_conflict_severity(&conflict),
                "resolution": detector.suggest_conflict_resolution(&conflict),
                "conflict": conflict,
            })
        })
        .collect();
    let history = detector
        .get_conflict_history(&project_id, params.days.unwrap_or(DEFAULT_HISTORY_DAYS))
        .await;
    let opportunities = detector.recent_opportunities(&project_id).await;

    Json(json!({
        "project_id": project_id,
        "conflicts": conflicts,
        "opportunities": opportunities,
        "history": history,
    }))
}

pub async fn get_user_activity(
    State(services): State<Arc<CollabServices>>,
    Path(user_id): Path<UserId>,
) -> CollabResult<Json<Value>> {
    let summary = services
        .presence
        .activity_summary(&user_id)
        .await
        .ok_or_else(|| CollabError::not_found(format!("presence session for {}", user_id)))?;
    Ok(Json(json!(summary)))
}

pub async fn post_deployment(
    State(services): State<Arc<CollabServices>>,
    Json(report): Json<DeploymentReport>,
) -> Json<Value> {
    let notified = services
        .triggers
        .on_deployment_finished(
            &report.project_id,
            &report.deployment_id,
            &report.environment,
            report.success,
            report.triggered_by.as_deref(),
        )
        .await;
    Json(json!({ "notified": notified }))
}

/// Admin routes; the caller applies the admin token layer
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/stats", get(get_stats))
        .route("/admin/broadcast", post(post_broadcast))
        .route("/admin/cleanup", post(post_cleanup))
        .route("/admin/projects/{project_id}/conflicts", get(get_project_conflicts))
        .route("/admin/users/{user_id}/activity", get(get_user_activity))
        .route("/admin/deployments", post(post_deployment))
}
