//! Shared Module
//!
//! This module contains types and data structures that are shared between the
//! engine and connected clients: message envelopes, presence records, activity
//! events and detection results. All of them are designed for serialization and
//! transmission over the real-time transport and the cross-instance relay.

/// Message envelopes exchanged with clients
pub mod event;

/// Presence status and records
pub mod presence;

/// Activity events read by the detector
pub mod activity;

/// Conflict and opportunity types
pub mod detection;

/// Shared error types
pub mod error;

/// Engine configuration
pub mod config;

/// Opaque user identity supplied by the authentication layer
pub type UserId = String;

/// Opaque project identifier
pub type ProjectId = String;

/// Re-export commonly used types for convenience
pub use activity::{ActivityEvent, ActivityReport};
pub use config::{CollabConfig, CollabConfigBuilder, ConfigError};
pub use detection::{
    CollaborationOpportunity, ConflictDetection, ConflictType, OpportunityType, Priority, Severity,
};
pub use error::SharedError;
pub use event::{ClientMessage, ConnectionStatus, Envelope, ServerMessage};
pub use presence::{HeartbeatData, PresenceRecord, PresenceStatus, PresenceUpdate};
