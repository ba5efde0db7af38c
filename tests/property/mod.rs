//! Property-based tests
//!
//! Invariants that must hold for any interleaving of connections, any
//! activity log and any elapsed time.

mod detection_proptest;
mod presence_proptest;
mod registry_proptest;
