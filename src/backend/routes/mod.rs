//! Route Configuration Module
//!
//! - **`router`** - main router creation and route assembly
//! - **`admin_routes`** - operational endpoints behind the admin token
//!
//! # Module Structure
//!
//! ```text
//! routes/
//! ├── mod.rs          - Module exports and documentation
//! ├── router.rs       - Main router creation
//! └── admin_routes.rs - Admin endpoint handlers
//! ```

/// Main router creation
pub mod router;

/// Admin endpoint handlers
pub mod admin_routes;

pub use router::create_router;
