//! The module graph: path to module, plus the inverse initiator edges.
//!
//! Cycles are permitted (`require` semantics) and handled by the linker;
//! the graph itself only maintains edges. Reverse edges are added
//! incrementally by `add_dependency` and dropped by `reset_compilation`.

use dashmap::DashMap;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::SharedError;
use crate::module::Module;

#[derive(Default)]
pub struct ModuleGraph {
    modules: DashMap<String, Module>,
    initiators: DashMap<String, FxHashSet<String>>,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.modules.contains_key(path)
    }

    /// Snapshot of one module. Guards never escape this module, so graph
    /// methods can be called freely from compile tasks and host callbacks.
    pub fn get(&self, path: &str) -> Option<Module> {
        self.modules.get(path).map(|entry| entry.value().clone())
    }

    pub fn compiled_modules(&self) -> Vec<Module> {
        let mut modules: Vec<Module> = self
            .modules
            .iter()
            .filter(|e| e.value().is_compiled())
            .map(|e| e.value().clone())
            .collect();
        modules.sort_by(|a, b| a.path.cmp(&b.path));
        modules
    }

    /// Create the module or refresh its source from the latest FS contents.
    pub fn upsert_source(&self, path: &str, source: String) {
        match self.modules.get_mut(path) {
            Some(mut entry) => {
                let module = entry.value_mut();
                module.source = source;
            }
            None => {
                self.modules
                    .insert(path.to_string(), Module::new(path, source));
            }
        }
    }

    pub fn set_compiled(&self, path: &str, code: String) {
        if let Some(mut entry) = self.modules.get_mut(path) {
            let module = entry.value_mut();
            module.compiled = Some(code);
            module.compilation_error = None;
        }
    }

    /// Capture a compilation error; clears `compiled` to keep the invariant.
    pub fn set_error(&self, path: &str, error: SharedError) {
        if let Some(mut entry) = self.modules.get_mut(path) {
            let module = entry.value_mut();
            module.compiled = None;
            module.compilation_error = Some(error);
        }
    }

    pub fn mark_entry(&self, path: &str, is_entry: bool) {
        if let Some(mut entry) = self.modules.get_mut(path) {
            entry.value_mut().is_entry = is_entry;
        }
    }

    /// Record `from --spec--> resolved` and the reverse initiator edge.
    pub fn add_dependency(&self, from: &str, specifier: &str, resolved: &str) {
        if let Some(mut entry) = self.modules.get_mut(from) {
            let module = entry.value_mut();
            module
                .dependency_map
                .insert(specifier.to_string(), resolved.to_string());
            if !module.dependencies.iter().any(|d| d == resolved) {
                module.dependencies.push(resolved.to_string());
            }
        }
        self.initiators
            .entry(resolved.to_string())
            .or_default()
            .insert(from.to_string());
    }

    pub fn initiators_of(&self, path: &str) -> FxHashSet<String> {
        self.initiators
            .get(path)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// Clear compilation results and outgoing edges so the module can be
    /// transformed again from fresh source.
    pub fn reset_compilation(&self, path: &str) {
        let dependencies = match self.modules.get_mut(path) {
            Some(mut entry) => {
                let module = entry.value_mut();
                module.compiled = None;
                module.compilation_error = None;
                module.dependency_map = FxHashMap::default();
                std::mem::take(&mut module.dependencies)
            }
            None => return,
        };
        for dep in dependencies {
            if let Some(mut entry) = self.initiators.get_mut(&dep) {
                entry.value_mut().remove(path);
            }
        }
    }

    pub fn remove(&self, path: &str) {
        self.reset_compilation(path);
        self.modules.remove(path);
        self.initiators.remove(path);
    }

    pub fn clear(&self) {
        self.modules.clear();
        self.initiators.clear();
    }

    fn with_module<R>(&self, path: &str, f: impl FnOnce(&mut Module) -> R) -> Option<R> {
        self.modules.get_mut(path).map(|mut entry| f(entry.value_mut()))
    }

    pub fn mark_dirty(&self, path: &str, dirty: bool) {
        self.with_module(path, |m| m.hot.is_dirty = dirty);
    }

    pub fn mark_hot(&self, path: &str, hot: bool) {
        self.with_module(path, |m| m.hot.is_hot = hot);
    }

    pub fn mark_invalidated(&self, path: &str, invalidated: bool) {
        self.with_module(path, |m| m.hot.invalidated = invalidated);
    }

    pub fn dirty_modules(&self) -> Vec<String> {
        self.modules
            .iter()
            .filter(|e| e.value().hot.is_dirty)
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn invalidated_modules(&self) -> Vec<String> {
        self.modules
            .iter()
            .filter(|e| e.value().hot.invalidated)
            .map(|e| e.key().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::error::BundleError;

    #[test]
    fn add_dependency_maintains_reverse_edges() {
        let graph = ModuleGraph::new();
        graph.upsert_source("/a.js", "require('./b')".to_string());
        graph.upsert_source("/b.js", "".to_string());
        graph.add_dependency("/a.js", "./b", "/b.js");

        let a = graph.get("/a.js").unwrap();
        assert_eq!(a.dependency_map["./b"], "/b.js");
        assert_eq!(a.dependencies, vec!["/b.js".to_string()]);
        assert!(graph.initiators_of("/b.js").contains("/a.js"));
    }

    #[test]
    fn reset_compilation_clears_state_and_edges() {
        let graph = ModuleGraph::new();
        graph.upsert_source("/a.js", "src".to_string());
        graph.upsert_source("/b.js", "".to_string());
        graph.add_dependency("/a.js", "./b", "/b.js");
        graph.set_compiled("/a.js", "compiled".to_string());

        graph.reset_compilation("/a.js");
        let a = graph.get("/a.js").unwrap();
        assert!(a.compiled.is_none());
        assert!(a.dependencies.is_empty());
        assert!(!graph.initiators_of("/b.js").contains("/a.js"));
    }

    #[test]
    fn errors_clear_compiled_code() {
        let graph = ModuleGraph::new();
        graph.upsert_source("/a.js", "src".to_string());
        graph.set_compiled("/a.js", "compiled".to_string());
        graph.set_error(
            "/a.js",
            Arc::new(BundleError::Transform {
                path: "/a.js".to_string(),
                message: "bad".to_string(),
            }),
        );
        let a = graph.get("/a.js").unwrap();
        assert!(a.compiled.is_none());
        assert!(a.compilation_error.is_some());
        assert!(a.is_settled());
    }
}
