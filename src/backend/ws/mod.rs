//! WebSocket Module
//!
//! The only transport the engine ships with.
//!
//! - **`handler`** - axum upgrade handler and per-socket reader/writer tasks
//! - **`protocol`** - inbound frame dispatch and project access policy

/// Upgrade handler and socket tasks
pub mod handler;

/// Inbound message dispatch
pub mod protocol;

pub use handler::{handle_socket, ws_handler, ConnectParams};
pub use protocol::{handle_client_message, AllowAllProjects, ConnectionContext, ProjectAccess};
