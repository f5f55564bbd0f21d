//! Module resolver: maps `(specifier, fromPath)` to an absolute path in the
//! virtual file system.
//!
//! Probing follows the simplified Node algorithm: relative and absolute
//! specifiers try the exact path, each configured extension, directory
//! `index` files, and finally `package.json` (`browser` over `module` over
//! `main`). Bare specifiers walk `node_modules` upward, honoring `exports`
//! conditions (`browser`, `import`, `default`; longest subpath prefix wins),
//! the `browser` field in both string and mapping form, and tsconfig-style
//! `paths` at the project root. Built-in names, with or without the `node:`
//! prefix, short-circuit to their shim paths.
//!
//! Every `(fromDir, specifier)` lookup is memoized, positive or negative,
//! for the lifetime of one compile.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::trace;

use sandpit_vfs::{path, FileSystem};

use crate::error::BundleError;
use crate::shims;

const DEFAULT_EXTENSIONS: &[&str] = &[".js", ".jsx", ".mjs", ".cjs", ".ts", ".tsx"];

struct PathAlias {
    pattern: String,
    targets: Vec<String>,
}

pub struct Resolver {
    fs: FileSystem,
    extensions: RwLock<Vec<String>>,
    cache: DashMap<(String, String), Option<String>>,
    aliases: Mutex<Option<Arc<Vec<PathAlias>>>>,
}

impl Resolver {
    pub fn new(fs: FileSystem) -> Self {
        Self {
            fs,
            extensions: RwLock::new(
                DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            ),
            cache: DashMap::new(),
            aliases: Mutex::new(None),
        }
    }

    /// Append a template-specific extension (e.g. `.vue`) to the probe list.
    pub fn push_extension(&self, extension: &str) {
        let mut extensions = self.extensions.write();
        if !extensions.iter().any(|e| e == extension) {
            extensions.push(extension.to_string());
        }
    }

    /// Forget memoized lookups and the parsed `paths` config; called at the
    /// start of each compile request.
    pub fn reset_cache(&self) {
        self.cache.clear();
        *self.aliases.lock() = None;
    }

    pub async fn resolve(&self, specifier: &str, from: &str) -> Result<String, BundleError> {
        if let Some(shim) = shims::shim_path(specifier) {
            return Ok(shim);
        }
        let from_dir = path::dirname(from);
        let key = (from_dir.clone(), specifier.to_string());
        if let Some(cached) = self.cache.get(&key) {
            return cached
                .clone()
                .ok_or_else(|| BundleError::not_found(specifier, from));
        }
        let resolved = self.resolve_uncached(specifier, &from_dir).await;
        trace!(specifier, from, resolved = ?resolved, "resolve");
        self.cache.insert(key, resolved.clone());
        resolved.ok_or_else(|| BundleError::not_found(specifier, from))
    }

    async fn resolve_uncached(&self, specifier: &str, from_dir: &str) -> Option<String> {
        if specifier.starts_with("./")
            || specifier.starts_with("../")
            || specifier.starts_with('/')
        {
            let abs = path::join(from_dir, specifier);
            return self.resolve_as_path(abs).await;
        }
        if let Some(hit) = self.resolve_with_aliases(specifier).await {
            return Some(hit);
        }
        self.resolve_package(specifier, from_dir).await
    }

    /// Probe order: exact file, appended extensions, `index.<ext>` inside the
    /// directory, then `package.json` main fields. A file always defeats a
    /// directory of the same name.
    fn resolve_as_path(&self, abs: String) -> BoxFuture<'_, Option<String>> {
        async move {
            if self.fs.exists(&abs).await {
                return Some(abs);
            }
            let extensions = self.extensions.read().clone();
            for ext in &extensions {
                let candidate = format!("{abs}{ext}");
                if self.fs.exists(&candidate).await {
                    return Some(candidate);
                }
            }
            for ext in &extensions {
                let candidate = format!("{abs}/index{ext}");
                if self.fs.exists(&candidate).await {
                    return Some(candidate);
                }
            }
            self.resolve_dir_main(&abs).await
        }
        .boxed()
    }

    async fn resolve_dir_main(&self, dir: &str) -> Option<String> {
        let raw = self.fs.read(&format!("{dir}/package.json")).await.ok()?;
        let parsed: Value = serde_json::from_str(&raw).ok()?;
        let browser = parsed.get("browser");
        let mut main = browser
            .and_then(|b| b.as_str())
            .map(str::to_string)
            .or_else(|| field_string(&parsed, "module"))
            .or_else(|| field_string(&parsed, "main"))?;
        if let Some(map) = browser.and_then(|b| b.as_object()) {
            if let Some(mapped) = browser_map_lookup(map, &main) {
                main = mapped?;
            }
        }
        let target = path::join(dir, &main);
        if target == dir {
            return None;
        }
        self.resolve_as_path(target).await
    }

    async fn resolve_package(&self, specifier: &str, from_dir: &str) -> Option<String> {
        let (name, subpath) = split_package_specifier(specifier)?;
        let mut dir = from_dir.to_string();
        loop {
            let pkg_dir = path::join(&dir, &format!("node_modules/{name}"));
            if let Some(hit) = self.resolve_in_package(&pkg_dir, subpath.as_deref()).await {
                return Some(hit);
            }
            if dir == "/" {
                return None;
            }
            dir = path::dirname(&dir);
        }
    }

    async fn resolve_in_package(&self, pkg_dir: &str, subpath: Option<&str>) -> Option<String> {
        let manifest = match self.fs.read(&format!("{pkg_dir}/package.json")).await {
            Ok(raw) => serde_json::from_str::<Value>(&raw).ok(),
            Err(_) => None,
        };
        if let Some(manifest) = &manifest {
            if let Some(exports) = manifest.get("exports") {
                let key = match subpath {
                    None => ".".to_string(),
                    Some(sub) => format!("./{sub}"),
                };
                if let Some(target) = resolve_exports(exports, &key) {
                    if let Some(hit) = self.resolve_as_path(path::join(pkg_dir, &target)).await {
                        return Some(hit);
                    }
                }
            }
            if let Some(sub) = subpath {
                if let Some(map) = manifest.get("browser").and_then(|b| b.as_object()) {
                    if let Some(mapped) = browser_map_lookup(map, &format!("./{sub}")) {
                        let replacement = mapped?;
                        return self
                            .resolve_as_path(path::join(pkg_dir, &replacement))
                            .await;
                    }
                }
            }
        }
        match subpath {
            Some(sub) => self.resolve_as_path(path::join(pkg_dir, sub)).await,
            None => self.resolve_as_path(pkg_dir.to_string()).await,
        }
    }

    async fn resolve_with_aliases(&self, specifier: &str) -> Option<String> {
        let aliases = self.load_aliases().await;
        if aliases.is_empty() {
            return None;
        }
        let mut candidates: Vec<String> = Vec::new();
        for alias in aliases.iter().filter(|a| !a.pattern.contains('*')) {
            if alias.pattern == specifier {
                candidates.extend(alias.targets.iter().cloned());
            }
        }
        let mut wildcard: Vec<(usize, String, &PathAlias)> = Vec::new();
        for alias in aliases.iter() {
            let Some(star) = alias.pattern.find('*') else {
                continue;
            };
            let prefix = &alias.pattern[..star];
            let suffix = &alias.pattern[star + 1..];
            if specifier.len() >= prefix.len() + suffix.len()
                && specifier.starts_with(prefix)
                && specifier.ends_with(suffix)
            {
                let matched = specifier[prefix.len()..specifier.len() - suffix.len()].to_string();
                wildcard.push((prefix.len(), matched, alias));
            }
        }
        // Longest matched prefix wins.
        wildcard.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, matched, alias) in wildcard {
            for target in &alias.targets {
                candidates.push(target.replace('*', &matched));
            }
        }
        for candidate in candidates {
            if let Some(hit) = self.resolve_as_path(candidate).await {
                return Some(hit);
            }
        }
        None
    }

    async fn load_aliases(&self) -> Arc<Vec<PathAlias>> {
        if let Some(existing) = self.aliases.lock().clone() {
            return existing;
        }
        let mut aliases = Vec::new();
        for file in ["/tsconfig.json", "/jsconfig.json"] {
            let Ok(raw) = self.fs.read(file).await else {
                continue;
            };
            if let Ok(parsed) = serde_json::from_str::<Value>(&strip_json_comments(&raw)) {
                let options = parsed.get("compilerOptions");
                let base = options
                    .and_then(|o| o.get("baseUrl"))
                    .and_then(|b| b.as_str())
                    .unwrap_or(".");
                let base = path::join("/", base);
                if let Some(paths) = options
                    .and_then(|o| o.get("paths"))
                    .and_then(|p| p.as_object())
                {
                    for (pattern, targets) in paths {
                        let targets = targets
                            .as_array()
                            .map(|arr| {
                                arr.iter()
                                    .filter_map(|t| t.as_str())
                                    .map(|t| path::join(&base, t))
                                    .collect()
                            })
                            .unwrap_or_default();
                        aliases.push(PathAlias {
                            pattern: pattern.clone(),
                            targets,
                        });
                    }
                }
            }
            break;
        }
        let aliases = Arc::new(aliases);
        *self.aliases.lock() = Some(aliases.clone());
        aliases
    }
}

fn field_string(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(|v| v.as_str()).map(str::to_string)
}

fn split_package_specifier(specifier: &str) -> Option<(String, Option<String>)> {
    if specifier.is_empty() {
        return None;
    }
    if let Some(rest) = specifier.strip_prefix('@') {
        let mut parts = rest.splitn(3, '/');
        let scope = parts.next()?;
        let name = parts.next()?;
        Some((
            format!("@{scope}/{name}"),
            parts.next().map(str::to_string),
        ))
    } else {
        let mut parts = specifier.splitn(2, '/');
        let name = parts.next()?;
        Some((name.to_string(), parts.next().map(str::to_string)))
    }
}

/// Resolve an `exports` field against `subpath` (`.` or `./x`). Returns the
/// package-relative target.
fn resolve_exports(exports: &Value, subpath: &str) -> Option<String> {
    match exports {
        Value::String(target) => (subpath == ".").then(|| target.clone()),
        Value::Object(map) => {
            let has_subpaths = map.keys().any(|k| k.starts_with('.'));
            if has_subpaths {
                if let Some(value) = map.get(subpath) {
                    if let Some(target) = resolve_export_target(value, "") {
                        return Some(target);
                    }
                }
                let mut best: Option<(usize, String)> = None;
                for (key, value) in map {
                    let Some(star) = key.find('*') else {
                        continue;
                    };
                    let prefix = &key[..star];
                    let suffix = &key[star + 1..];
                    if subpath.len() >= prefix.len() + suffix.len()
                        && subpath.starts_with(prefix)
                        && subpath.ends_with(suffix)
                        && best.as_ref().is_none_or(|(len, _)| prefix.len() > *len)
                    {
                        let matched = &subpath[prefix.len()..subpath.len() - suffix.len()];
                        if let Some(target) = resolve_export_target(value, matched) {
                            best = Some((prefix.len(), target));
                        }
                    }
                }
                best.map(|(_, target)| target)
            } else if subpath == "." {
                resolve_export_target(exports, "")
            } else {
                None
            }
        }
        _ => None,
    }
}

fn resolve_export_target(value: &Value, star: &str) -> Option<String> {
    match value {
        Value::String(target) => Some(target.replace('*', star)),
        Value::Object(map) => ["browser", "import", "default"]
            .iter()
            .find_map(|condition| {
                map.get(*condition)
                    .and_then(|v| resolve_export_target(v, star))
            }),
        Value::Array(items) => items.iter().find_map(|v| resolve_export_target(v, star)),
        _ => None,
    }
}

/// `browser` mapping form: `Some(None)` means the file is disabled for
/// browser targets.
fn browser_map_lookup(
    map: &serde_json::Map<String, Value>,
    request: &str,
) -> Option<Option<String>> {
    let normalize = |s: &str| s.trim_start_matches("./").to_string();
    let request = normalize(request);
    for (key, value) in map {
        if normalize(key) == request {
            return Some(match value {
                Value::String(replacement) => Some(replacement.clone()),
                _ => None,
            });
        }
    }
    None
}

/// tsconfig files routinely carry comments; strip them before parsing.
fn strip_json_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if c == '\\' {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            _ => out.push(c),
        }
    }
    out
}
