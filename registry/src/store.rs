//! Mounted package store.
//!
//! Preloaded packages are kept as compact file maps and exposed to the
//! virtual file system under `/node_modules/<name>/...` through the
//! [`FileSource`] impl, so contents materialize lazily on first read.

use std::sync::Arc;

use dashmap::DashMap;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use sandpit_vfs::FileSource;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageFile {
    pub content: String,
    /// Module specifiers this file requires, as reported by the packager.
    #[serde(default)]
    pub deps: Vec<String>,
    /// Already CommonJS; the transform chain passes it through untouched.
    #[serde(default)]
    pub transpiled: bool,
}

/// Primary-CDN payload: relative path to file record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageContents {
    #[serde(default)]
    pub files: FxHashMap<String, PackageFile>,
}

#[derive(Debug)]
pub struct MountedPackage {
    pub name: String,
    pub version: String,
    pub depth: u32,
    /// Keys are package-relative, no leading `./`.
    pub files: FxHashMap<String, PackageFile>,
}

impl MountedPackage {
    pub fn from_contents(name: &str, version: &str, depth: u32, contents: PackageContents) -> Self {
        let mut files: FxHashMap<String, PackageFile> = contents
            .files
            .into_iter()
            .map(|(path, file)| (path.trim_start_matches("./").to_string(), file))
            .collect();
        if !files.contains_key("package.json") {
            files.insert("package.json".to_string(), skeletal_package_json(name, version));
        }
        Self {
            name: name.to_string(),
            version: version.to_string(),
            depth,
            files,
        }
    }

    /// Fallback-CDN payload: the body is a single pre-transpiled `index.js`.
    pub fn single_file(name: &str, version: &str, depth: u32, content: String) -> Self {
        let mut files = FxHashMap::default();
        files.insert(
            "index.js".to_string(),
            PackageFile {
                content,
                deps: Vec::new(),
                transpiled: true,
            },
        );
        files.insert("package.json".to_string(), skeletal_package_json(name, version));
        Self {
            name: name.to_string(),
            version: version.to_string(),
            depth,
            files,
        }
    }
}

fn skeletal_package_json(name: &str, version: &str) -> PackageFile {
    PackageFile {
        content: format!(
            "{{\"name\":{},\"version\":{},\"main\":\"index.js\"}}",
            serde_json::Value::String(name.to_string()),
            serde_json::Value::String(version.to_string()),
        ),
        deps: Vec::new(),
        transpiled: true,
    }
}

#[derive(Default)]
pub struct PackageStore {
    packages: DashMap<String, Arc<MountedPackage>>,
}

impl PackageStore {
    pub fn mount(&self, package: MountedPackage) {
        self.packages
            .insert(package.name.clone(), Arc::new(package));
    }

    pub fn get(&self, name: &str) -> Option<Arc<MountedPackage>> {
        self.packages.get(name).map(|entry| entry.value().clone())
    }

    pub fn is_mounted(&self, name: &str, version: &str) -> bool {
        self.get(name).is_some_and(|pkg| pkg.version == version)
    }

    pub fn package_names(&self) -> Vec<String> {
        self.packages.iter().map(|e| e.key().clone()).collect()
    }

    pub fn clear(&self) {
        self.packages.clear();
    }

    /// Split a virtual `/node_modules/<name>/<rest>` path into the mounted
    /// package and the package-relative file path. Scoped names keep both
    /// segments. Files nested under a package's own `node_modules` stay
    /// addressed through the outer package's file map.
    fn locate(&self, vpath: &str) -> Option<(Arc<MountedPackage>, String)> {
        let rest = vpath.strip_prefix("/node_modules/")?;
        let mut segments = rest.splitn(3, '/');
        let first = segments.next()?;
        let (name, file) = if first.starts_with('@') {
            let second = segments.next()?;
            (
                format!("{first}/{second}"),
                segments.next().unwrap_or("").to_string(),
            )
        } else {
            let tail: Vec<&str> = segments.collect();
            (first.to_string(), tail.join("/"))
        };
        let package = self.get(&name)?;
        Some((package, file))
    }

    pub fn file(&self, vpath: &str) -> Option<PackageFile> {
        let (package, rel) = self.locate(vpath)?;
        if rel.is_empty() {
            return None;
        }
        package.files.get(&rel).cloned()
    }

    /// Whether the packager marked this file as already transpiled.
    pub fn is_transpiled(&self, vpath: &str) -> bool {
        self.file(vpath).is_some_and(|f| f.transpiled)
    }
}

impl FileSource for PackageStore {
    fn exists(&self, path: &str) -> bool {
        self.file(path).is_some()
    }

    fn read(&self, path: &str) -> Option<String> {
        self.file(path).map(|f| f.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(name: &str, files: &[(&str, &str)]) -> PackageStore {
        let store = PackageStore::default();
        let contents = PackageContents {
            files: files
                .iter()
                .map(|(path, content)| {
                    (
                        path.to_string(),
                        PackageFile {
                            content: content.to_string(),
                            deps: Vec::new(),
                            transpiled: false,
                        },
                    )
                })
                .collect(),
        };
        store.mount(MountedPackage::from_contents(name, "1.0.0", 0, contents));
        store
    }

    #[test]
    fn resolves_plain_and_scoped_names() {
        let store = store_with("lodash", &[("index.js", "module.exports = {};")]);
        assert!(store.exists("/node_modules/lodash/index.js"));
        assert!(!store.exists("/node_modules/lodash/missing.js"));
        assert!(!store.exists("/node_modules/other/index.js"));

        let scoped = store_with("@scope/pkg", &[("lib/main.js", "x")]);
        assert!(scoped.exists("/node_modules/@scope/pkg/lib/main.js"));
        assert_eq!(
            scoped.read("/node_modules/@scope/pkg/lib/main.js").unwrap(),
            "x"
        );
    }

    #[test]
    fn synthesizes_package_json_when_absent() {
        let store = store_with("bare", &[("index.js", "x")]);
        let raw = store.read("/node_modules/bare/package.json").unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["name"], "bare");
        assert_eq!(parsed["main"], "index.js");
    }

    #[test]
    fn fallback_mount_is_single_transpiled_index() {
        let store = PackageStore::default();
        store.mount(MountedPackage::single_file(
            "tiny",
            "2.0.0",
            1,
            "module.exports = 1;".to_string(),
        ));
        assert!(store.is_transpiled("/node_modules/tiny/index.js"));
        assert!(store.is_mounted("tiny", "2.0.0"));
        assert!(!store.is_mounted("tiny", "2.0.1"));
    }
}
