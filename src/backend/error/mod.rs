//! Engine Error Module
//!
//! - **`types`** - `CollabError` taxonomy and constructors
//! - **`conversion`** - `IntoResponse` for admin routes and `error` frames for clients

/// Error type definitions
pub mod types;

/// Error conversion implementations
pub mod conversion;

pub use types::CollabError;

/// Result alias used across the engine
pub type CollabResult<T> = Result<T, CollabError>;
