//! Property-based tests for the connection registry

use collabcore::backend::registry::{ConnectionId, ConnectionRegistry};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::common::MockTransport;

#[derive(Debug, Clone)]
enum Op {
    Connect { user: u8, project: Option<u8> },
    Disconnect { index: usize },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..4u8, proptest::option::of(0..3u8))
            .prop_map(|(user, project)| Op::Connect { user, project }),
        1 => any::<usize>().prop_map(|index| Op::Disconnect { index }),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn test_counts_match_live_connections(ops in proptest::collection::vec(op(), 1..40)) {
        runtime().block_on(async {
            let registry = ConnectionRegistry::new(None);
            let mut live: Vec<(ConnectionId, String, Option<String>)> = Vec::new();

            for op in ops {
                match op {
                    Op::Connect { user, project } => {
                        let user = format!("user-{}", user);
                        let project = project.map(|p| format!("p{}", p));
                        let id = registry
                            .connect(Arc::new(MockTransport::new()), user.clone(), project.clone(), None)
                            .await;
                        live.push((id, user, project));
                    }
                    Op::Disconnect { index } => {
                        if live.is_empty() {
                            continue;
                        }
                        let (id, _, _) = live.remove(index % live.len());
                        registry.disconnect(id).await;
                    }
                }
            }

            let mut per_project: BTreeMap<String, usize> = BTreeMap::new();
            for (_, _, project) in &live {
                if let Some(project) = project {
                    *per_project.entry(project.clone()).or_default() += 1;
                }
            }
            let mut users: Vec<&String> = live.iter().map(|(_, user, _)| user).collect();
            users.sort();
            users.dedup();

            let stats = registry.stats().await;
            prop_assert_eq!(stats.total_connections, live.len());
            prop_assert_eq!(stats.unique_users, users.len());
            prop_assert_eq!(stats.connections_per_project, per_project);
            Ok(())
        })?;
    }
}
