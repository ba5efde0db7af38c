//! Connection Registry Module
//!
//! Tracks live client connections in this process and delivers envelopes to
//! them.
//!
//! - **`transport`** - the `Transport` seam the registry sends through
//! - **`connections`** - `ConnectionRegistry`, indexes, broadcasts and eviction

/// Per-connection transport abstraction
pub mod transport;

/// Connection indexes and local delivery
pub mod connections;

pub use connections::{
    ConnectionId, ConnectionInfo, ConnectionObserver, ConnectionRegistry, RegistryStats,
};
pub use transport::{ChannelTransport, OutboundFrame, Transport};
