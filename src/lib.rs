// Increase recursion limit for deeply nested async state machines
#![recursion_limit = "256"]

//! collabcore - Real-time Collaboration Engine
//!
//! Tracks which users are connected to which projects, maintains their live
//! presence, relays events between server instances, and detects when
//! collaborators collide on the same or related locations.
//!
//! # Module Structure
//!
//! - **`shared`** - types exchanged with clients and between instances
//!   - Envelopes, presence records, activity events, detections
//!   - Configuration and shared error types
//!
//! - **`backend`** - the engine and its Axum server
//!   - Connection registry, presence coordinator, relay, detector
//!   - WebSocket endpoint and admin routes
//!
//! # Usage
//!
//! ```rust,no_run
//! use collabcore::backend::server::init::create_app;
//! use collabcore::shared::CollabConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CollabConfig::from_env()?;
//! let (app, state) = create_app(config).await?;
//! // Serve `app` with axum, then:
//! state.services.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Multiple Instances
//!
//! Instances sharing a bus (Postgres `LISTEN`/`NOTIFY` in production) see each
//! other's broadcasts, presence and activity. Every relayed message carries
//! the publishing instance's id so no instance replays its own messages.

/// Shared types and data structures
pub mod shared;

/// Engine and server
pub mod backend;
