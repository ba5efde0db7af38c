//! Server Module
//!
//! Initialization and state of the Axum server hosting the engine.
//!
//! - **`state`** - `AppState` and its `FromRef` implementations
//! - **`config`** - optional database connection and migrations
//! - **`init`** - step-by-step startup returning the router
//!
//! # Module Structure
//!
//! ```text
//! server/
//! ├── mod.rs    - Module exports and documentation
//! ├── state.rs  - AppState and FromRef implementations
//! ├── config.rs - Database loading
//! └── init.rs   - Server initialization and app creation
//! ```

/// Application state management
pub mod state;

/// Database loading
pub mod config;

/// Server initialization
pub mod init;

pub use init::create_app;
pub use state::AppState;
