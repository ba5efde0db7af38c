//! Property-based tests for conflict detection and mention parsing

use collabcore::backend::detector::engine::concurrent_editing;
use collabcore::backend::detector::PathHeuristicMatcher;
use collabcore::backend::triggers::extract_mentions;
use collabcore::shared::ActivityEvent;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

const LOCATIONS: &[&str] = &["src/auth.py", "src/db.py", "README.md", "web/app.js"];

fn event() -> impl Strategy<Value = ActivityEvent> {
    (0..5u8, proptest::option::of(0..LOCATIONS.len())).prop_map(|(user, location)| {
        ActivityEvent::new(
            format!("user-{}", user),
            "p1",
            "edit",
            location.map(|i| LOCATIONS[i].to_string()),
        )
    })
}

proptest! {
    #[test]
    fn test_one_conflict_per_shared_location(events in proptest::collection::vec(event(), 0..30)) {
        let conflicts = concurrent_editing("p1", &events, &PathHeuristicMatcher);

        let mut users_at: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for event in &events {
            if let Some(location) = event.location.as_deref() {
                users_at.entry(location).or_default().insert(event.user_id.as_str());
            }
        }
        let shared: BTreeSet<&str> = users_at
            .iter()
            .filter(|(_, users)| users.len() >= 2)
            .map(|(location, _)| *location)
            .collect();
        let reported: BTreeSet<&str> = conflicts.iter().map(|c| c.location.as_str()).collect();

        prop_assert_eq!(reported.len(), conflicts.len());
        prop_assert_eq!(reported, shared);
        for conflict in &conflicts {
            let unique: BTreeSet<&String> = conflict.user_ids.iter().collect();
            prop_assert_eq!(unique.len(), conflict.user_ids.len());
            prop_assert_eq!(unique.len(), users_at[conflict.location.as_str()].len());
        }
    }

    #[test]
    fn test_mentions_are_unique_names(text in "[a-z @.]{0,60}") {
        let mentions = extract_mentions(&text);

        let unique: BTreeSet<&String> = mentions.iter().collect();
        prop_assert_eq!(unique.len(), mentions.len());
        for name in &mentions {
            prop_assert!(!name.is_empty());
            prop_assert!(!name.contains('@'));
            prop_assert!(!name.ends_with('.'));
        }
    }
}
