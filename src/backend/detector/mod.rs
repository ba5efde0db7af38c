//! Conflict & Collaboration Detector Module
//!
//! - **`activity`** - where recent activity comes from (`ActivitySource`)
//! - **`heuristics`** - related and critical location rules (`LocationMatcher`)
//! - **`scoring`** - severity scores and resolution advice
//! - **`cache`** - bounded per-project detection caches
//! - **`engine`** - `ConflictDetector`, scans and history

pub mod activity;
pub mod cache;
pub mod engine;
pub mod heuristics;
pub mod scoring;

pub use activity::{ActivityRecorder, ActivitySource, InMemoryActivityLog, PgActivityStore};
pub use cache::{Detection, DetectionCache};
pub use engine::{ConflictDetector, ConflictHistory, DetectorStats, ScanOutcome};
pub use heuristics::{LocationMatcher, PathHeuristicMatcher};
pub use scoring::{ResolutionPlan, SeverityAnalysis, Urgency};
