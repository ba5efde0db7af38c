//! Real-time Relay Module
//!
//! Keeps several server instances coherent: each instance publishes what its
//! own clients do and replays what other instances publish to its own
//! connections.
//!
//! # Architecture
//!
//! - **`bus`** - `MessageBus` trait and the in-memory broadcast backend
//! - **`pg_bus`** - PostgreSQL `LISTEN`/`NOTIFY` backend
//! - **`relay`** - `CrossInstanceRelay`, instance tagging and replay
//!
//! # Module Structure
//!
//! ```text
//! realtime/
//! ├── mod.rs    - Module exports and documentation
//! ├── bus.rs    - Bus trait and in-memory backend
//! ├── pg_bus.rs - PostgreSQL backend
//! └── relay.rs  - Cross-instance relay
//! ```

/// Bus trait and in-memory backend
pub mod bus;

/// PostgreSQL LISTEN/NOTIFY backend
pub mod pg_bus;

/// Cross-instance relay
pub mod relay;

pub use bus::{BusMessage, InMemoryBus, MessageBus};
pub use pg_bus::PgNotifyBus;
pub use relay::{CrossInstanceRelay, RelayChannels, RelayEnvelope, RelayPayload, RelayStats};
