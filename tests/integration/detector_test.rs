//! Conflict and collaboration detector integration tests

use async_trait::async_trait;
use chrono::{Duration, Utc};
use collabcore::backend::error::CollabResult;
use collabcore::backend::services::{CollabServices, ServiceBackends};
use collabcore::backend::triggers::{NotificationRequest, NotificationSink};
use collabcore::shared::{
    ActivityEvent, ConflictType, HeartbeatData, OpportunityType, Severity,
};
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::common::{connect, services, test_config};
use crate::{assert_not_received, assert_ok, assert_received};

#[derive(Default)]
struct RecordingSink {
    requests: Mutex<Vec<NotificationRequest>>,
}

impl RecordingSink {
    fn kinds(&self) -> Vec<&'static str> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.fact.kind())
            .collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn dispatch(&self, request: NotificationRequest) -> CollabResult<()> {
        self.requests.lock().unwrap().push(request);
        Ok(())
    }
}

async fn record(services: &CollabServices, user: &str, location: &str, minutes_ago: i64) {
    let event = ActivityEvent::new(user, "p1", "edit", Some(location.to_string()))
        .at(Utc::now() - Duration::minutes(minutes_ago));
    assert_ok!(services.recorder.record(event).await);
}

async fn locate(services: &CollabServices, user: &str, location: &str, activity: Option<&str>) {
    let data = HeartbeatData {
        location: Some(location.to_string()),
        activity: activity.map(str::to_string),
        ..Default::default()
    };
    assert_ok!(services.presence.heartbeat(user, Some(data)).await);
}

#[tokio::test]
async fn test_two_users_on_one_file_make_one_conflict() {
    let services = services("detector-auth").await;
    record(&services, "alice", "src/auth.py", 3).await;
    record(&services, "bob", "src/auth.py", 1).await;
    record(&services, "alice", "src/auth.py", 0).await;

    let conflicts = assert_ok!(services.detector.detect_project_conflicts("p1").await);

    assert_eq!(conflicts.len(), 1);
    let conflict = &conflicts[0];
    assert_eq!(conflict.conflict_type, ConflictType::ConcurrentEditing);
    assert!(matches!(conflict.severity, Severity::Medium | Severity::High));
    let users: HashSet<&str> = conflict.user_ids.iter().map(String::as_str).collect();
    assert_eq!(users, HashSet::from(["alice", "bob"]));
    assert_eq!(conflict.user_ids.len(), 2);
}

#[tokio::test]
async fn test_activity_outside_window_is_ignored() {
    let services = services("detector-window").await;
    record(&services, "alice", "src/auth.py", 30).await;
    record(&services, "bob", "src/auth.py", 1).await;

    let conflicts = assert_ok!(services.detector.detect_project_conflicts("p1").await);

    assert!(conflicts.is_empty());
}

#[tokio::test]
async fn test_related_files_are_overlapping_work() {
    let services = services("detector-overlap").await;
    record(&services, "alice", "src/billing/invoice.py", 2).await;
    record(&services, "bob", "src/billing/ledger.py", 1).await;

    let conflicts = assert_ok!(services.detector.detect_project_conflicts("p1").await);

    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].conflict_type, ConflictType::OverlappingWork);
    assert_eq!(conflicts[0].severity, Severity::Low);
}

#[tokio::test]
async fn test_users_at_same_location_get_same_file_opportunity() {
    let services = services("detector-same-file").await;
    connect(&services, "alice", Some("p1")).await;
    connect(&services, "bob", Some("p1")).await;
    locate(&services, "alice", "src/auth.py", None).await;
    locate(&services, "bob", "src/auth.py", None).await;

    let opportunities = assert_ok!(
        services
            .detector
            .detect_collaboration_opportunities("p1")
            .await
    );

    assert_eq!(opportunities.len(), 1);
    assert_eq!(opportunities[0].opportunity_type, OpportunityType::SameFile);
    assert_eq!(opportunities[0].location, "src/auth.py");
}

#[tokio::test]
async fn test_neighbouring_files_get_related_files_opportunity() {
    let services = services("detector-related").await;
    connect(&services, "alice", Some("p1")).await;
    connect(&services, "bob", Some("p1")).await;
    locate(&services, "alice", "src/auth.py", None).await;
    locate(&services, "bob", "tests/test_auth.py", None).await;

    let opportunities = assert_ok!(
        services
            .detector
            .detect_collaboration_opportunities("p1")
            .await
    );

    let related: Vec<_> = opportunities
        .iter()
        .filter(|o| o.opportunity_type == OpportunityType::RelatedFiles)
        .collect();
    assert_eq!(related.len(), 1);
}

#[tokio::test]
async fn test_debugging_user_is_paired_with_expert() {
    let services = services("detector-expert").await;
    for minutes in 0..6 {
        record(&services, "carol", "src/payments.py", 60 + minutes).await;
    }
    connect(&services, "dave", Some("p1")).await;
    locate(&services, "dave", "src/payments.py", Some("debugging")).await;

    let opportunities = assert_ok!(
        services
            .detector
            .detect_collaboration_opportunities("p1")
            .await
    );

    let sharing = opportunities
        .iter()
        .find(|o| o.opportunity_type == OpportunityType::KnowledgeSharing)
        .expect("knowledge sharing opportunity");
    assert_eq!(sharing.metadata["expert"], "carol");
    assert_eq!(sharing.metadata["learner"], "dave");
}

#[tokio::test]
async fn test_scan_announces_each_detection_once() {
    let sink = Arc::new(RecordingSink::default());
    let backends = ServiceBackends {
        sink: sink.clone(),
        ..ServiceBackends::in_memory()
    };
    let services = CollabServices::new(test_config("detector-scan"), backends).await;
    let (_, alice) = connect(&services, "alice", Some("p1")).await;
    connect(&services, "bob", Some("p1")).await;
    record(&services, "alice", "src/auth.py", 2).await;
    record(&services, "bob", "src/auth.py", 1).await;

    let first = assert_ok!(services.detector.scan_project("p1").await);
    assert_eq!(first.new_conflicts.len(), 1);
    assert_received!(alice, "conflict_detected");
    assert!(sink.kinds().contains(&"conflict"));

    alice.clear();
    let second = assert_ok!(services.detector.scan_project("p1").await);
    assert!(second.new_conflicts.is_empty());
    assert_not_received!(alice, "conflict_detected");
    assert_eq!(services.detector.recent_conflicts("p1").await.len(), 1);
}

#[tokio::test]
async fn test_conflict_that_returns_hours_later_is_announced_again() {
    let sink = Arc::new(RecordingSink::default());
    let backends = ServiceBackends {
        sink: sink.clone(),
        ..ServiceBackends::in_memory()
    };
    let services = CollabServices::new(test_config("detector-recur"), backends).await;
    let (_, carol) = connect(&services, "carol", Some("p1")).await;
    let earlier = Utc::now() - Duration::hours(3);
    record(&services, "alice", "src/auth.py", 3 * 60 + 2).await;
    record(&services, "bob", "src/auth.py", 3 * 60 + 1).await;

    let first = assert_ok!(services.detector.scan_project_at("p1", earlier).await);
    assert_eq!(first.new_conflicts.len(), 1);

    record(&services, "alice", "src/auth.py", 2).await;
    record(&services, "bob", "src/auth.py", 1).await;
    let again = assert_ok!(services.detector.scan_project_at("p1", Utc::now()).await);

    assert_eq!(again.new_conflicts.len(), 1);
    assert_eq!(carol.of_type("conflict_detected").len(), 2);
    assert_eq!(sink.kinds().iter().filter(|k| **k == "conflict").count(), 2);
    assert_eq!(services.detector.recent_conflicts("p1").await.len(), 1);
}

#[tokio::test]
async fn test_conflict_history_counts_hotspots() {
    let services = services("detector-history").await;
    connect(&services, "alice", Some("p1")).await;
    record(&services, "alice", "src/auth.py", 2).await;
    record(&services, "bob", "src/auth.py", 1).await;
    assert_ok!(services.detector.scan_project("p1").await);

    let history = services.detector.get_conflict_history("p1", 7).await;

    assert_eq!(history.total_conflicts, 1);
    assert_eq!(history.hotspots, vec![("src/auth.py".to_string(), 1)]);
}

#[tokio::test]
async fn test_scan_all_covers_projects_with_only_activity() {
    let services = services("detector-scan-all").await;
    record(&services, "alice", "src/auth.py", 2).await;
    record(&services, "bob", "src/auth.py", 1).await;

    let scanned = assert_ok!(services.detector.scan_all().await);

    assert_eq!(scanned, 1);
    assert_eq!(services.detector.stats().await.scans_completed, 1);
    assert_eq!(services.detector.users_in_conflict("p1").await.len(), 2);
}
