//! Middleware Module
//!
//! - **`auth`** - user identity resolution and the admin token check

pub mod auth;

pub use auth::{admin_auth, HeaderIdentity, IdentityResolver};
