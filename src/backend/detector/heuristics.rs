//! Location heuristics
//!
//! Whether two locations are "related" (for overlapping work and related-file
//! opportunities) and whether a location is "critical" (for conflict severity)
//! are decided by a `LocationMatcher`, so the rule can be replaced without
//! touching the detector.

/// Strategy deciding relatedness and criticality of locations
pub trait LocationMatcher: Send + Sync {
    /// True when two *different* locations should be treated as related
    fn are_related(&self, a: &str, b: &str) -> bool;

    /// True for locations where a collision is especially costly
    fn is_critical(&self, location: &str) -> bool;

    fn name(&self) -> &'static str;
}

const ENTRY_POINT_STEMS: &[&str] = &[
    "main", "index", "app", "lib", "server", "__init__", "manage", "setup", "settings", "config",
    "routes", "urls", "auth",
];

const CRITICAL_FILE_NAMES: &[&str] = &[
    "package.json",
    "cargo.toml",
    "pyproject.toml",
    "requirements.txt",
    "dockerfile",
    "docker-compose.yml",
];

/// Path-based matcher: same directory, same base name, or test naming
#[derive(Debug, Clone, Copy, Default)]
pub struct PathHeuristicMatcher;

/// Split `dir/name` on the last separator
fn split_path(location: &str) -> (&str, &str) {
    let trimmed = location.trim_end_matches(['/', '\\']);
    match trimmed.rfind(['/', '\\']) {
        Some(idx) => (&trimmed[..idx], &trimmed[idx + 1..]),
        None => ("", trimmed),
    }
}

/// File name up to its first extension dot
fn stem(name: &str) -> &str {
    match name.find('.') {
        Some(0) | None => name,
        Some(idx) => &name[..idx],
    }
}

/// Stem with any `test_` prefix or `_test` suffix removed
fn base_name(location: &str) -> String {
    let (_, name) = split_path(location);
    let stem = stem(name).to_lowercase();
    let stem = stem.strip_prefix("test_").unwrap_or(&stem);
    let stem = stem.strip_suffix("_test").unwrap_or(stem);
    stem.to_string()
}

impl LocationMatcher for PathHeuristicMatcher {
    fn are_related(&self, a: &str, b: &str) -> bool {
        if a == b {
            return false;
        }
        let (dir_a, _) = split_path(a);
        let (dir_b, _) = split_path(b);
        if !dir_a.is_empty() && dir_a == dir_b {
            return true;
        }
        let base_a = base_name(a);
        !base_a.is_empty() && base_a == base_name(b)
    }

    fn is_critical(&self, location: &str) -> bool {
        let (_, name) = split_path(location);
        let name = name.to_lowercase();
        CRITICAL_FILE_NAMES.contains(&name.as_str()) || ENTRY_POINT_STEMS.contains(&stem(&name))
    }

    fn name(&self) -> &'static str {
        "path_heuristic"
    }
}
