//! Integration tests
//!
//! Exercise the engine components together through `CollabServices`, the
//! way the WebSocket handler and admin routes drive them.

mod admin_test;
mod detector_test;
mod presence_test;
mod protocol_test;
mod registry_test;
mod relay_test;
