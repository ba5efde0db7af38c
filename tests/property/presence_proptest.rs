//! Property-based tests for the presence state machine

use collabcore::backend::presence::machine::next_status;
use collabcore::shared::config::PresenceConfig;
use collabcore::shared::PresenceStatus;
use proptest::prelude::*;
use std::time::Duration;

fn status() -> impl Strategy<Value = PresenceStatus> {
    proptest::sample::select(PresenceStatus::ALL.to_vec())
}

proptest! {
    #[test]
    fn test_connected_user_never_goes_offline(current in status(), secs in 0..7_200u64) {
        let config = PresenceConfig::default();
        let next = next_status(current, Duration::from_secs(secs), true, &config);
        prop_assert_ne!(next, Some(PresenceStatus::Offline));
    }

    #[test]
    fn test_disconnected_user_never_recovers(current in status(), secs in 0..7_200u64) {
        let config = PresenceConfig::default();
        let next = next_status(current, Duration::from_secs(secs), false, &config);
        prop_assert_ne!(next, Some(PresenceStatus::Active));
        prop_assert_ne!(next, Some(current));
    }

    #[test]
    fn test_sweep_is_stable(current in status(), secs in 0..7_200u64, connected in any::<bool>()) {
        let config = PresenceConfig::default();
        let elapsed = Duration::from_secs(secs);
        if let Some(next) = next_status(current, elapsed, connected, &config) {
            prop_assert_eq!(next_status(next, elapsed, connected, &config), None);
        }
    }
}
