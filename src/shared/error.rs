//! Shared Error Types
//!
//! This module defines error types that are shared between the engine and its clients.
//! These errors describe failures in data that crosses the transport boundary.
//!
//! # Error Categories
//!
//! - `SerializationError` - JSON serialization/deserialization failures
//! - `ValidationError` - Malformed inbound client messages
//!
//! # Usage
//!
//! ```rust
//! use collabcore::shared::error::SharedError;
//!
//! let error = SharedError::validation("project_id", "project id cannot be empty");
//! assert_eq!(error.code(), "validation_error");
//! ```
use thiserror::Error;

/// Shared error types that can occur on either side of the transport
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SharedError {
    /// JSON serialization or deserialization error
    #[error("Serialization error: {message}")]
    SerializationError {
        /// Human-readable error message
        message: String,
    },

    /// Data validation error
    #[error("Validation error in field '{field}': {message}")]
    ValidationError {
        /// The field that failed validation
        field: String,
        /// Human-readable error message
        message: String,
    },
}

impl SharedError {
    /// Create a new serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Machine-readable code used in `error` replies
    pub fn code(&self) -> &'static str {
        match self {
            Self::SerializationError { .. } => "malformed_message",
            Self::ValidationError { .. } => "validation_error",
        }
    }
}

impl From<serde_json::Error> for SharedError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(format!("JSON error: {}", err))
    }
}
