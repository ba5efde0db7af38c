//! Backend Module
//!
//! Server-side code of the collaboration engine: the components that track who
//! is connected, what they are doing, and where their work collides, plus the
//! Axum server that exposes them.
//!
//! # Architecture
//!
//! - **`registry`** - live connections per user and project, local delivery
//! - **`presence`** - presence sessions, heartbeat state machine, sweeps
//! - **`realtime`** - message bus backends and the cross-instance relay
//! - **`detector`** - conflict and collaboration opportunity detection
//! - **`triggers`** - domain events turned into notification requests
//! - **`services`** - construction, startup and shutdown of all of the above
//! - **`ws`** - WebSocket endpoint and client protocol
//! - **`server`** / **`routes`** / **`middleware`** - Axum application
//! - **`tasks`** - supervised periodic background tasks
//! - **`error`** - engine error types
//!
//! # Module Structure
//!
//! ```text
//! backend/
//! ├── mod.rs       - Module exports and documentation
//! ├── registry/    - Connection registry and transports
//! ├── presence/    - Presence coordinator
//! ├── realtime/    - Bus and relay
//! ├── detector/    - Conflict and opportunity detection
//! ├── triggers.rs  - Event trigger glue
//! ├── services.rs  - Service wiring
//! ├── ws/          - WebSocket handler and protocol
//! ├── server/      - Server initialization and state
//! ├── routes/      - Route configuration
//! ├── middleware/  - Identity and admin auth
//! ├── tasks.rs     - Background task supervision
//! └── error/       - Error types
//! ```
//!
//! # Thread Safety
//!
//! Component state lives behind `tokio::sync::RwLock`. Locks are released
//! before any socket send, bus publish or database write.

/// Background task supervision
pub mod tasks;

/// Engine error types
pub mod error;

/// Connection registry
pub mod registry;

/// Presence coordination
pub mod presence;

/// Message bus and cross-instance relay
pub mod realtime;

/// Conflict and collaboration detection
pub mod detector;

/// Event trigger glue
pub mod triggers;

/// Service wiring and lifecycle
pub mod services;

/// WebSocket endpoint
pub mod ws;

/// Server setup and state
pub mod server;

/// Route configuration
pub mod routes;

/// Request middleware
pub mod middleware;

pub use error::{CollabError, CollabResult};
pub use server::create_app;
pub use services::{CollabServices, ServiceBackends};
