//! Dependency manifest handling.
//!
//! The manifest is normally produced by the packager CDN: the dependency set
//! is POSTed there and a flattened, depth-ordered list of exact versions
//! comes back. When that endpoint is unreachable a trivial manifest is
//! synthesized locally from the direct dependencies.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Direct dependencies of the project: name to version range, in
/// `package.json` order.
pub type DependencySet = IndexMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub depth: u32,
}

/// Flattened transitive dependency closure, topologically ordered by depth.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub dependencies: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn contains(&self, name: &str) -> bool {
        self.dependencies.iter().any(|entry| entry.name == name)
    }

    /// Direct dependencies only, with leading range operators stripped.
    /// Used when the packager endpoint is unreachable.
    pub fn trivial(deps: &DependencySet) -> Self {
        let dependencies = deps
            .iter()
            .map(|(name, range)| ManifestEntry {
                name: name.clone(),
                version: strip_range_operators(range),
                depth: 0,
            })
            .collect();
        Self { dependencies }
    }
}

/// Strip leading range operators (`^`, `~`, `>`, `<`, `=`) and whitespace,
/// leaving a bare version the module CDN accepts.
pub fn strip_range_operators(range: &str) -> String {
    range
        .trim_start_matches(['^', '~', '>', '<', '=', 'v', ' '])
        .trim()
        .to_string()
}

/// Canonical string form of a dependency set, used to detect whether the
/// dependencies changed between two compiles.
pub fn dependency_signature(deps: &DependencySet) -> String {
    let mut pairs: Vec<String> = deps
        .iter()
        .map(|(name, range)| format!("{name}@{range}"))
        .collect();
    pairs.sort();
    pairs.join(";")
}
