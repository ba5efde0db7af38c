/**
 * Engine Error Types
 *
 * This module defines the error taxonomy of the collaboration engine.
 *
 * # Error Categories
 *
 * - `Transport` - a socket send/receive failed; the connection is evicted
 * - `Bus` - publish/subscribe on the shared bus failed; the message is dropped
 * - `Persistence` - a presence mirror write failed; logged, never surfaced
 * - `Validation` - malformed inbound message; answered with an `error` reply
 * - `Permission` - user may not act on a project; answered with an `error` reply
 * - `NotFound` - no session/connection for the requested id
 *
 * Only validation and permission errors ever reach a client, as protocol-level
 * `error` frames. Everything else is caught and logged where it happens.
 */

use axum::http::StatusCode;
use thiserror::Error;

use crate::shared::{ConfigError, SharedError};

/// Engine error type
#[derive(Debug, Error)]
pub enum CollabError {
    /// Sending to or receiving from a client transport failed
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// The shared message bus rejected a publish or subscription
    #[error("Bus error: {message}")]
    Bus { message: String },

    /// The presence mirror or activity store failed
    #[error("Persistence error: {message}")]
    Persistence { message: String },

    /// An inbound message failed validation
    #[error(transparent)]
    Validation(#[from] SharedError),

    /// The user is not allowed to perform the action
    #[error("Permission denied: {message}")]
    Permission { message: String },

    /// The requested session or connection does not exist
    #[error("Not found: {message}")]
    NotFound { message: String },

    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Database driver error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CollabError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn bus(message: impl Into<String>) -> Self {
        Self::Bus {
            message: message.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::Permission {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Permission { .. } => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Bus { .. } | Self::Persistence { .. } | Self::Database(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Transport { .. } | Self::Config(_) | Self::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine-readable code used in client `error` replies
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(err) => err.code(),
            Self::Permission { .. } => "forbidden",
            Self::NotFound { .. } => "not_found",
            _ => "internal_error",
        }
    }

    /// Whether the originating client should be told about this error
    pub fn is_client_facing(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Permission { .. } | Self::NotFound { .. }
        )
    }

    /// Get the error message
    pub fn message(&self) -> String {
        match self {
            Self::Transport { message }
            | Self::Bus { message }
            | Self::Persistence { message }
            | Self::Permission { message }
            | Self::NotFound { message } => message.clone(),
            other => other.to_string(),
        }
    }
}
