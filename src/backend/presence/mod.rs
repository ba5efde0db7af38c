//! Presence Module
//!
//! - **`machine`** - pure status transitions driven by heartbeat age
//! - **`coordinator`** - `PresenceCoordinator`, sessions, sweeps and broadcasts
//! - **`mirror`** - best-effort external persistence of presence

pub mod machine;
pub mod coordinator;
pub mod mirror;

pub use coordinator::{ActivitySummary, PresenceCoordinator, PresenceStats};
pub use mirror::{NoopMirror, PgPresenceMirror, PresenceMirror};
