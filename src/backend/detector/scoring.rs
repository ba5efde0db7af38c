/**
 * Conflict Scoring and Resolution Advice
 *
 * Pure functions of a `ConflictDetection`'s fields.
 *
 * # Severity Score (0-10)
 *
 * | Factor                     | Points                    |
 * |----------------------------|---------------------------|
 * | users involved             | 2 per user, at most 6     |
 * | critical location          | 3                         |
 * | duration >= 10 / 30 min    | 1 / 2                     |
 * | concurrent editing         | 1                         |
 *
 * Urgency: 9-10 critical, 8 high, 5-7 medium, below 5 low.
 */

use serde::Serialize;

use crate::backend::detector::heuristics::LocationMatcher;
use crate::shared::{ConflictDetection, ConflictType, Severity};

pub const MAX_SEVERITY_SCORE: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    pub fn from_score(score: u8) -> Self {
        match score {
            9..=u8::MAX => Self::Critical,
            8 => Self::High,
            5..=7 => Self::Medium,
            _ => Self::Low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeverityAnalysis {
    pub severity_score: u8,
    pub urgency: Urgency,
    pub impact_factors: Vec<String>,
    pub recommended_actions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionPlan {
    pub primary_strategy: String,
    pub alternative_strategies: Vec<String>,
    pub recommended_tools: Vec<String>,
    pub communication_channels: Vec<String>,
    pub timeline: String,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn analyze_conflict_severity(
    conflict: &ConflictDetection,
    matcher: &dyn LocationMatcher,
) -> SeverityAnalysis {
    let mut score: u8 = 0;
    let mut impact_factors = Vec::new();

    let users = conflict.user_ids.len();
    score += (users * 2).min(6) as u8;
    impact_factors.push(format!("{} users involved", users));

    if matcher.is_critical(&conflict.location) {
        score += 3;
        impact_factors.push(format!("critical location {}", conflict.location));
    }

    let duration_mins = conflict.duration_secs() / 60;
    if duration_mins >= 30 {
        score += 2;
        impact_factors.push(format!("overlap running for {} minutes", duration_mins));
    } else if duration_mins >= 10 {
        score += 1;
        impact_factors.push(format!("overlap running for {} minutes", duration_mins));
    }

    if conflict.conflict_type == ConflictType::ConcurrentEditing {
        score += 1;
        impact_factors.push("simultaneous edits to the same location".to_string());
    }

    let severity_score = score.min(MAX_SEVERITY_SCORE);
    let urgency = Urgency::from_score(severity_score);

    let recommended_actions = match urgency {
        Urgency::Critical => strings(&[
            "Pause edits on the location until the owners agree on a plan",
            "Start a call between the involved users",
            "Review the combined changes before merging",
        ]),
        Urgency::High => strings(&[
            "Notify the involved users immediately",
            "Agree on who finishes the change first",
        ]),
        Urgency::Medium => strings(&[
            "Let the involved users know they overlap",
            "Coordinate on the next commit",
        ]),
        Urgency::Low => strings(&["Keep an eye on the overlap"]),
    };

    SeverityAnalysis {
        severity_score,
        urgency,
        impact_factors,
        recommended_actions,
    }
}

pub fn suggest_conflict_resolution(conflict: &ConflictDetection) -> ResolutionPlan {
    match (conflict.conflict_type, conflict.severity) {
        (ConflictType::ConcurrentEditing, Severity::High) => ResolutionPlan {
            primary_strategy: "Stop and pair on the change in a shared session".to_string(),
            alternative_strategies: strings(&[
                "Split the file's edits by section and assign owners",
                "Have one user hand off their changes as a patch",
            ]),
            recommended_tools: strings(&["live share session", "branch diff review"]),
            communication_channels: strings(&["voice call", "direct message"]),
            timeline: "immediately".to_string(),
        },
        (ConflictType::ConcurrentEditing, _) => ResolutionPlan {
            primary_strategy: "Agree on edit order and merge sequentially".to_string(),
            alternative_strategies: strings(&[
                "Work on separate branches and merge with review",
                "Pair on the remaining changes",
            ]),
            recommended_tools: strings(&["branch diff review", "merge tool"]),
            communication_channels: strings(&["direct message", "project chat"]),
            timeline: "within the hour".to_string(),
        },
        (ConflictType::OverlappingWork, Severity::High | Severity::Medium) => ResolutionPlan {
            primary_strategy: "Sync on the shared area and split responsibilities".to_string(),
            alternative_strategies: strings(&[
                "Define an interface boundary between the pieces of work",
                "Schedule a short design review",
            ]),
            recommended_tools: strings(&["shared task board", "design notes"]),
            communication_channels: strings(&["project chat", "stand-up"]),
            timeline: "today".to_string(),
        },
        (ConflictType::OverlappingWork, Severity::Low) => ResolutionPlan {
            primary_strategy: "Share a short status note with the other users".to_string(),
            alternative_strategies: strings(&["Review each other's changes before merging"]),
            recommended_tools: strings(&["shared task board"]),
            communication_channels: strings(&["project chat"]),
            timeline: "before the next merge".to_string(),
        },
    }
}
