/**
 * Event Trigger Glue
 *
 * Turns domain events into `NotificationRequest`s for an external
 * `NotificationSink`. Only structured facts are supplied: deciding titles,
 * message bodies and delivery channels is the sink's job.
 *
 * | Event                | Recipients                                   |
 * |----------------------|----------------------------------------------|
 * | deployment finished  | online project members plus whoever triggered it |
 * | activity created     | online project members except the actor      |
 * | mention              | each `@name` in the text except the author   |
 * | conflict             | the conflicting users                        |
 * | opportunity          | the users to pair                            |
 *
 * Sink failures are logged and never reach the caller.
 */

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::backend::error::CollabResult;
use crate::backend::presence::PresenceCoordinator;
use crate::shared::{
    CollaborationOpportunity, ConflictDetection, Priority, ProjectId, Severity, UserId,
};

/// What happened, as structured facts
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationFact {
    DeploymentFinished {
        project_id: ProjectId,
        deployment_id: String,
        environment: String,
        success: bool,
        triggered_by: Option<UserId>,
    },
    ActivityCreated {
        project_id: ProjectId,
        actor: UserId,
        activity_type: String,
        location: Option<String>,
    },
    Mention {
        project_id: Option<ProjectId>,
        author: UserId,
        excerpt: String,
    },
    Conflict(ConflictDetection),
    Opportunity(CollaborationOpportunity),
}

impl NotificationFact {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DeploymentFinished { .. } => "deployment_finished",
            Self::ActivityCreated { .. } => "activity_created",
            Self::Mention { .. } => "mention",
            Self::Conflict(_) => "conflict",
            Self::Opportunity(_) => "opportunity",
        }
    }
}

/// One notification handed to the sink
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationRequest {
    pub recipients: Vec<UserId>,
    pub priority: Priority,
    pub fact: NotificationFact,
    pub created_at: DateTime<Utc>,
}

/// External notification delivery
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn dispatch(&self, request: NotificationRequest) -> CollabResult<()>;
}

/// Sink that only logs, used when no delivery channel is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl NotificationSink for LoggingNotifier {
    async fn dispatch(&self, request: NotificationRequest) -> CollabResult<()> {
        tracing::info!(
            "[Triggers] {} notification ({:?}) for {:?}",
            request.fact.kind(),
            request.priority,
            request.recipients
        );
        Ok(())
    }
}

/// Longest excerpt of a mentioning text passed along
const MENTION_EXCERPT_LEN: usize = 200;

/// Names mentioned as `@name`, unique, in order of appearance
pub fn extract_mentions(text: &str) -> Vec<String> {
    let mut mentions: Vec<String> = Vec::new();
    for (idx, _) in text.match_indices('@') {
        // Skip email-like tokens such as a@b.com
        let preceded_by_word = text[..idx]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_alphanumeric());
        if preceded_by_word {
            continue;
        }
        let name: String = text[idx + 1..]
            .chars()
            .take_while(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
            .collect();
        let name = name.trim_end_matches('.').to_string();
        if !name.is_empty() && !mentions.contains(&name) {
            mentions.push(name);
        }
    }
    mentions
}

pub struct EventTriggers {
    sink: Arc<dyn NotificationSink>,
    presence: Option<Arc<PresenceCoordinator>>,
}

impl EventTriggers {
    pub fn new(sink: Arc<dyn NotificationSink>, presence: Option<Arc<PresenceCoordinator>>) -> Self {
        Self { sink, presence }
    }

    async fn online_members(&self, project_id: &str) -> Vec<UserId> {
        match &self.presence {
            Some(presence) => presence
                .get_online_users(Some(project_id))
                .await
                .into_iter()
                .map(|r| r.user_id)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Hand a request to the sink; empty recipient lists are skipped
    async fn dispatch(&self, recipients: Vec<UserId>, priority: Priority, fact: NotificationFact) -> bool {
        if recipients.is_empty() {
            tracing::debug!("[Triggers] No recipients for {} notification", fact.kind());
            return false;
        }
        let kind = fact.kind();
        let request = NotificationRequest {
            recipients,
            priority,
            fact,
            created_at: Utc::now(),
        };
        match self.sink.dispatch(request).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("[Triggers] Dispatch of {} notification failed: {}", kind, e);
                false
            }
        }
    }

    pub async fn on_deployment_finished(
        &self,
        project_id: &str,
        deployment_id: &str,
        environment: &str,
        success: bool,
        triggered_by: Option<&str>,
    ) -> bool {
        let mut recipients = self.online_members(project_id).await;
        if let Some(user) = triggered_by {
            if !recipients.iter().any(|r| r == user) {
                recipients.push(user.to_string());
            }
        }
        let priority = if success { Priority::Low } else { Priority::High };
        self.dispatch(
            recipients,
            priority,
            NotificationFact::DeploymentFinished {
                project_id: project_id.to_string(),
                deployment_id: deployment_id.to_string(),
                environment: environment.to_string(),
                success,
                triggered_by: triggered_by.map(str::to_string),
            },
        )
        .await
    }

    pub async fn on_activity_created(
        &self,
        project_id: &str,
        actor: &str,
        activity_type: &str,
        location: Option<&str>,
    ) -> bool {
        let recipients: Vec<UserId> = self
            .online_members(project_id)
            .await
            .into_iter()
            .filter(|u| u != actor)
            .collect();
        self.dispatch(
            recipients,
            Priority::Low,
            NotificationFact::ActivityCreated {
                project_id: project_id.to_string(),
                actor: actor.to_string(),
                activity_type: activity_type.to_string(),
                location: location.map(str::to_string),
            },
        )
        .await
    }

    /// Notify everyone `@mentioned` in `text`; returns the notified names
    pub async fn on_mention(&self, project_id: Option<&str>, author: &str, text: &str) -> Vec<UserId> {
        let recipients: Vec<UserId> = extract_mentions(text)
            .into_iter()
            .filter(|name| name != author)
            .collect();
        let excerpt: String = text.chars().take(MENTION_EXCERPT_LEN).collect();
        let fact = NotificationFact::Mention {
            project_id: project_id.map(str::to_string),
            author: author.to_string(),
            excerpt,
        };
        if self.dispatch(recipients.clone(), Priority::Medium, fact).await {
            recipients
        } else {
            Vec::new()
        }
    }

    pub async fn on_conflict(&self, conflict: &ConflictDetection) -> bool {
        let priority = match conflict.severity {
            Severity::High => Priority::High,
            Severity::Medium => Priority::Medium,
            Severity::Low => Priority::Low,
        };
        self.dispatch(
            conflict.user_ids.clone(),
            priority,
            NotificationFact::Conflict(conflict.clone()),
        )
        .await
    }

    pub async fn on_opportunity(&self, opportunity: &CollaborationOpportunity) -> bool {
        self.dispatch(
            opportunity.user_ids.clone(),
            opportunity.priority,
            NotificationFact::Opportunity(opportunity.clone()),
        )
        .await
    }
}
