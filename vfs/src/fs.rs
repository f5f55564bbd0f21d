//! The layered file system stack.
//!
//! Layers are queried in order; the first layer that reports existence
//! satisfies the read. Writes always land in the topmost in-memory layer.
//! Paths are normalized before every lookup.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::bridge::BridgeLayer;
use crate::error::{VfsError, VfsResult};
use crate::path;

/// Read-only file provider backing the package layer. Implemented by the
/// package registry so `/node_modules/...` contents materialize lazily on
/// first read.
pub trait FileSource: Send + Sync {
    fn exists(&self, path: &str) -> bool;
    fn read(&self, path: &str) -> Option<String>;
}

/// In-memory layer: source of truth for user files and shims.
#[derive(Default)]
pub struct MemoryLayer {
    files: RwLock<FxHashMap<String, String>>,
}

impl MemoryLayer {
    pub fn exists(&self, path: &str) -> bool {
        self.files.read().contains_key(path)
    }

    pub fn read(&self, path: &str) -> Option<String> {
        self.files.read().get(path).cloned()
    }

    pub fn write(&self, path: String, contents: String) {
        self.files.write().insert(path, contents);
    }

    pub fn remove(&self, path: &str) -> bool {
        self.files.write().remove(path).is_some()
    }
}

/// Read-through layer over an external file source.
pub struct PackageLayer {
    source: Arc<dyn FileSource>,
}

pub enum Layer {
    Memory(MemoryLayer),
    Bridge(BridgeLayer),
    Packages(PackageLayer),
}

/// Ordered stack of layers with synchronous and asynchronous variants.
///
/// Cloning is cheap; clones share the same layers.
#[derive(Clone)]
pub struct FileSystem {
    layers: Arc<Vec<Layer>>,
}

impl FileSystem {
    pub fn builder() -> FileSystemBuilder {
        FileSystemBuilder { layers: Vec::new() }
    }

    /// Memory-only stack, the default for tests and HTML-only projects.
    pub fn in_memory() -> Self {
        Self::builder().memory().build()
    }

    pub fn read_sync(&self, path: &str) -> VfsResult<String> {
        let path = path::normalize(path);
        for layer in self.layers.iter() {
            match layer {
                Layer::Memory(memory) => {
                    if let Some(contents) = memory.read(&path) {
                        return Ok(contents);
                    }
                }
                // Synchronous reads are unsupported on the bridge.
                Layer::Bridge(_) => {}
                Layer::Packages(packages) => {
                    if let Some(contents) = packages.source.read(&path) {
                        return Ok(contents);
                    }
                }
            }
        }
        Err(VfsError::not_found(path))
    }

    pub async fn read(&self, path: &str) -> VfsResult<String> {
        let path = path::normalize(path);
        for layer in self.layers.iter() {
            match layer {
                Layer::Memory(memory) => {
                    if let Some(contents) = memory.read(&path) {
                        return Ok(contents);
                    }
                }
                Layer::Bridge(bridge) => {
                    if let Some(contents) = bridge.read(&path).await {
                        return Ok(contents);
                    }
                }
                Layer::Packages(packages) => {
                    if let Some(contents) = packages.source.read(&path) {
                        return Ok(contents);
                    }
                }
            }
        }
        Err(VfsError::not_found(path))
    }

    pub fn exists_sync(&self, path: &str) -> bool {
        let path = path::normalize(path);
        self.layers.iter().any(|layer| match layer {
            Layer::Memory(memory) => memory.exists(&path),
            Layer::Bridge(_) => false,
            Layer::Packages(packages) => packages.source.exists(&path),
        })
    }

    pub async fn exists(&self, path: &str) -> bool {
        let path = path::normalize(path);
        for layer in self.layers.iter() {
            let hit = match layer {
                Layer::Memory(memory) => memory.exists(&path),
                Layer::Bridge(bridge) => bridge.exists(&path).await,
                Layer::Packages(packages) => packages.source.exists(&path),
            };
            if hit {
                return true;
            }
        }
        false
    }

    /// Write into the topmost in-memory layer.
    pub fn write_sync(&self, path: &str, contents: impl Into<String>) -> VfsResult<()> {
        let path = path::normalize(path);
        for layer in self.layers.iter() {
            if let Layer::Memory(memory) = layer {
                memory.write(path, contents.into());
                return Ok(());
            }
        }
        Err(VfsError::NoWritableLayer { path })
    }

    /// Remove from the topmost in-memory layer. Returns whether a file was
    /// actually dropped there.
    pub fn remove_sync(&self, path: &str) -> bool {
        let path = path::normalize(path);
        for layer in self.layers.iter() {
            if let Layer::Memory(memory) = layer {
                return memory.remove(&path);
            }
        }
        false
    }

    /// Clear per-layer response caches. Memory contents are untouched.
    pub fn reset_cache(&self) {
        for layer in self.layers.iter() {
            if let Layer::Bridge(bridge) = layer {
                bridge.reset_cache();
            }
        }
    }

    /// Toggle the async bridge, when the stack has one.
    pub fn set_bridge_enabled(&self, enabled: bool) {
        for layer in self.layers.iter() {
            if let Layer::Bridge(bridge) = layer {
                bridge.set_enabled(enabled);
            }
        }
    }

    pub fn has_bridge(&self) -> bool {
        self.layers
            .iter()
            .any(|layer| matches!(layer, Layer::Bridge(_)))
    }
}

pub struct FileSystemBuilder {
    layers: Vec<Layer>,
}

impl FileSystemBuilder {
    pub fn memory(mut self) -> Self {
        self.layers.push(Layer::Memory(MemoryLayer::default()));
        self
    }

    pub fn bridge(mut self, bridge: BridgeLayer) -> Self {
        self.layers.push(Layer::Bridge(bridge));
        self
    }

    pub fn packages(mut self, source: Arc<dyn FileSource>) -> Self {
        self.layers.push(Layer::Packages(PackageLayer { source }));
        self
    }

    pub fn build(self) -> FileSystem {
        FileSystem {
            layers: Arc::new(self.layers),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{serve_file_requests, BridgeLayer};

    struct StaticSource;

    impl FileSource for StaticSource {
        fn exists(&self, path: &str) -> bool {
            path == "/node_modules/left-pad/index.js"
        }

        fn read(&self, path: &str) -> Option<String> {
            self.exists(path).then(|| "module.exports = x => x;".to_string())
        }
    }

    #[test]
    fn first_layer_hit_wins() {
        let fs = FileSystem::builder()
            .memory()
            .packages(Arc::new(StaticSource))
            .build();
        fs.write_sync("/node_modules/left-pad/index.js", "shadowed").unwrap();
        assert_eq!(
            fs.read_sync("/node_modules/left-pad/index.js").unwrap(),
            "shadowed"
        );
        fs.remove_sync("/node_modules/left-pad/index.js");
        assert_eq!(
            fs.read_sync("/node_modules/left-pad/index.js").unwrap(),
            "module.exports = x => x;"
        );
    }

    #[test]
    fn miss_is_a_not_found_error() {
        let fs = FileSystem::in_memory();
        match fs.read_sync("/missing.js") {
            Err(VfsError::NotFound { path }) => assert_eq!(path, "/missing.js"),
            other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn paths_are_normalized_before_lookup() {
        let fs = FileSystem::in_memory();
        fs.write_sync("/src/./a/../index.js", "entry").unwrap();
        assert_eq!(fs.read_sync("/src/index.js").unwrap(), "entry");
        assert!(fs.exists_sync("/src/x/../index.js"));
    }

    #[tokio::test]
    async fn bridge_answers_async_reads_only() {
        let (bridge, rx) = BridgeLayer::channel();
        bridge.set_enabled(true);
        let fs = FileSystem::builder().memory().bridge(bridge).build();
        serve_file_requests(rx, |path| {
            (path == "/remote.js").then(|| "remote contents".to_string())
        });

        assert!(fs.read_sync("/remote.js").is_err());
        assert_eq!(fs.read("/remote.js").await.unwrap(), "remote contents");
        assert!(fs.read("/other.js").await.is_err());
    }

    #[tokio::test]
    async fn bridge_caches_until_reset() {
        let (bridge, mut rx) = BridgeLayer::channel();
        bridge.set_enabled(true);
        let fs = FileSystem::builder().memory().bridge(bridge).build();

        let serve_once = tokio::spawn(async move {
            let mut served = 0usize;
            while let Some(req) = rx.recv().await {
                served += 1;
                let _ = req.reply.send(Some(format!("generation {served}")));
            }
        });

        assert_eq!(fs.read("/remote.js").await.unwrap(), "generation 1");
        assert_eq!(fs.read("/remote.js").await.unwrap(), "generation 1");
        fs.reset_cache();
        assert_eq!(fs.read("/remote.js").await.unwrap(), "generation 2");
        serve_once.abort();
    }
}
