//! Common test utilities and helpers
//!
//! - Recording and failing transports
//! - Recording and failing presence mirrors
//! - Service fixtures and polling helpers
//! - Assertion macros for received frames

pub mod assertions;
pub mod fixtures;
pub mod mirrors;
pub mod transports;

pub use fixtures::*;
pub use mirrors::*;
pub use transports::*;
