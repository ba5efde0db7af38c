//! Presence state machine
//!
//! Transitions are a pure function of the current status, the time since the
//! last heartbeat and whether the user still holds a live local connection.

use std::time::Duration;

use crate::shared::config::PresenceConfig;
use crate::shared::PresenceStatus;

/// Status the heartbeat sweep should move a session to, if any.
///
/// A user with a live connection is never moved to `Offline`; the furthest the
/// sweep takes them is `Away`. Recovery to `Active` also requires a live
/// connection so a disconnected session stays down until it reconnects.
pub fn next_status(
    current: PresenceStatus,
    since_heartbeat: Duration,
    connected: bool,
    config: &PresenceConfig,
) -> Option<PresenceStatus> {
    if since_heartbeat >= config.offline_threshold {
        if connected {
            return (current != PresenceStatus::Away).then_some(PresenceStatus::Away);
        }
        return (current != PresenceStatus::Offline).then_some(PresenceStatus::Offline);
    }

    if since_heartbeat >= config.idle_threshold {
        return (!current.is_idle()).then_some(PresenceStatus::Away);
    }

    if current.is_idle() && connected {
        return Some(PresenceStatus::Active);
    }
    None
}
