//! Module records.
//!
//! A module is identified by its absolute path. Invariants maintained by the
//! graph operations:
//!
//! - `compiled` is `Some` iff the last compile succeeded; a captured
//!   compilation error always clears it.
//! - `dependencies` is the deduplicated range of `dependency_map`.
//! - every `dependency_map` entry has a matching reverse edge in the graph's
//!   initiator map.

use rustc_hash::FxHashMap;

use crate::error::SharedError;

/// Hot-replacement flags. Handler lists and user data live inside the
/// evaluation context; the engine only tracks the flags it needs for
/// escalation and re-evaluation decisions.
#[derive(Debug, Clone, Copy, Default)]
pub struct HotState {
    /// An evaluation of this module called `hot.accept`.
    pub is_hot: bool,
    /// Recompiled since the last evaluation; the evaluator re-runs it.
    pub is_dirty: bool,
    /// `hot.invalidate` was called; the next evaluate restarts the compile.
    pub invalidated: bool,
}

#[derive(Debug, Clone)]
pub struct Module {
    pub path: String,
    pub source: String,
    pub compiled: Option<String>,
    pub is_entry: bool,
    pub compilation_error: Option<SharedError>,
    /// Resolved dependency paths, in discovery order, deduplicated.
    pub dependencies: Vec<String>,
    /// Original import specifier to resolved path.
    pub dependency_map: FxHashMap<String, String>,
    pub hot: HotState,
}

impl Module {
    pub fn new(path: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            source: source.into(),
            compiled: None,
            is_entry: false,
            compilation_error: None,
            dependencies: Vec::new(),
            dependency_map: FxHashMap::default(),
            hot: HotState::default(),
        }
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    /// Compile attempted and settled, successfully or not.
    pub fn is_settled(&self) -> bool {
        self.compiled.is_some() || self.compilation_error.is_some()
    }
}
