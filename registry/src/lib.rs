//! # sandpit-registry - package manifest and CDN fetching
//!
//! Resolves a project's dependency set into a flattened manifest, preloads
//! package contents from the module CDN (falling back through public CDNs),
//! and mounts everything under `/node_modules/...` for the virtual file
//! system.
//!
//! Fetches for the same `name@version` are coalesced through a shared
//! in-flight future, so the registry is idempotent and never issues a
//! duplicate request.

pub mod error;
pub mod fetch;
pub mod manifest;
pub mod store;

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;

pub use error::RegistryError;
pub use fetch::CdnConfig;
pub use manifest::{dependency_signature, strip_range_operators, DependencySet, Manifest, ManifestEntry};
pub use store::{MountedPackage, PackageContents, PackageFile, PackageStore};

type SharedFetch = Shared<BoxFuture<'static, Result<(), Arc<RegistryError>>>>;

pub struct PackageRegistry {
    client: reqwest::Client,
    config: CdnConfig,
    store: Arc<PackageStore>,
    in_flight: DashMap<String, SharedFetch>,
}

impl PackageRegistry {
    pub fn new(config: CdnConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            store: Arc::new(PackageStore::default()),
            in_flight: DashMap::new(),
        }
    }

    /// The mounted-package store, shared with the file system's package layer.
    pub fn store(&self) -> Arc<PackageStore> {
        self.store.clone()
    }

    /// Drop every mounted package and forget in-flight state.
    pub fn reset(&self) {
        self.store.clear();
        self.in_flight.clear();
    }

    /// POST the dependency set to the packager CDN. On any failure a trivial
    /// manifest listing only the direct dependencies is synthesized, with
    /// leading range operators stripped.
    pub async fn fetch_manifest(&self, deps: &DependencySet) -> Manifest {
        if deps.is_empty() {
            return Manifest::default();
        }
        let body = serde_json::json!({ "dependencies": deps });
        let attempt = fetch::retry(self.config.retries, self.config.retry_delay, || async {
            self.client
                .post(&self.config.packager_url)
                .json(&body)
                .send()
                .await?
                .error_for_status()?
                .json::<Manifest>()
                .await
        })
        .await;
        match attempt {
            Ok(manifest) => manifest,
            Err(err) => {
                tracing::warn!(error = %err, "packager CDN unreachable, synthesizing trivial manifest");
                Manifest::trivial(deps)
            }
        }
    }

    /// Fetch and mount every manifest entry, in parallel, coalesced per
    /// `name@version`. The first failed package aborts the preload.
    pub async fn preload_modules(&self, manifest: &Manifest) -> Result<(), Arc<RegistryError>> {
        let jobs: Vec<SharedFetch> = manifest
            .dependencies
            .iter()
            .map(|entry| self.ensure_package(&entry.name, &entry.version, entry.depth))
            .collect();
        for result in futures::future::join_all(jobs).await {
            result?;
        }
        Ok(())
    }

    /// Make sure transient dependencies declared by mounted packages are in
    /// the manifest and mounted too. Runs to a fixpoint with a small bound;
    /// packages the CDN cannot serve are logged and skipped.
    pub async fn load_module_dependencies(
        &self,
        manifest: &mut Manifest,
    ) -> Result<(), Arc<RegistryError>> {
        for _round in 0..5 {
            let mut missing: Vec<ManifestEntry> = Vec::new();
            for name in self.store.package_names() {
                let Some(package) = self.store.get(&name) else {
                    continue;
                };
                let Some(package_json) = package.files.get("package.json") else {
                    continue;
                };
                let Ok(parsed) =
                    serde_json::from_str::<serde_json::Value>(&package_json.content)
                else {
                    continue;
                };
                let Some(deps) = parsed.get("dependencies").and_then(|d| d.as_object()) else {
                    continue;
                };
                for (dep, range) in deps {
                    if manifest.contains(dep) || missing.iter().any(|e| &e.name == dep) {
                        continue;
                    }
                    let range = range.as_str().unwrap_or("latest");
                    missing.push(ManifestEntry {
                        name: dep.clone(),
                        version: manifest::strip_range_operators(range),
                        depth: package.depth + 1,
                    });
                }
            }
            if missing.is_empty() {
                return Ok(());
            }
            let jobs: Vec<(ManifestEntry, SharedFetch)> = missing
                .into_iter()
                .map(|entry| {
                    let job = self.ensure_package(&entry.name, &entry.version, entry.depth);
                    (entry, job)
                })
                .collect();
            for (entry, job) in jobs {
                match job.await {
                    Ok(()) => manifest.dependencies.push(entry),
                    Err(err) => {
                        // Transient deps are best effort; record the entry so
                        // the fixpoint terminates, but keep compiling.
                        tracing::warn!(
                            name = %entry.name,
                            version = %entry.version,
                            error = %err,
                            "skipping unfetchable transient dependency"
                        );
                        manifest.dependencies.push(entry);
                    }
                }
            }
        }
        Ok(())
    }

    fn ensure_package(&self, name: &str, version: &str, depth: u32) -> SharedFetch {
        let key = format!("{name}@{version}");
        if let Some(existing) = self.in_flight.get(&key) {
            return existing.clone();
        }
        if self.store.is_mounted(name, version) {
            return futures::future::ready(Ok(())).boxed().shared();
        }
        let entry = self.in_flight.entry(key).or_insert_with(|| {
            let client = self.client.clone();
            let config = self.config.clone();
            let store = self.store.clone();
            let name = name.to_string();
            let version = version.to_string();
            async move {
                fetch_package(client, config, store, name, version, depth)
                    .await
                    .map_err(Arc::new)
            }
            .boxed()
            .shared()
        });
        entry.value().clone()
    }
}

impl Default for PackageRegistry {
    fn default() -> Self {
        Self::new(CdnConfig::default())
    }
}

async fn fetch_package(
    client: reqwest::Client,
    config: CdnConfig,
    store: Arc<PackageStore>,
    name: String,
    version: String,
    depth: u32,
) -> Result<(), RegistryError> {
    let url = format!(
        "{}/{}@{}",
        config.module_url.trim_end_matches('/'),
        name,
        version
    );
    let primary = fetch::retry(config.retries, config.retry_delay, || async {
        client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<PackageContents>()
            .await
    })
    .await;
    match primary {
        Ok(contents) => {
            tracing::debug!(%name, %version, "mounted package from module CDN");
            store.mount(MountedPackage::from_contents(&name, &version, depth, contents));
            return Ok(());
        }
        Err(err) => {
            tracing::warn!(%name, %version, error = %err, "module CDN failed, trying fallbacks");
        }
    }

    for base in &config.fallback_urls {
        let url = format!("{}/{}@{}", base.trim_end_matches('/'), name, version);
        let attempt = fetch::retry(config.retries, config.retry_delay, || async {
            client
                .get(&url)
                .send()
                .await?
                .error_for_status()?
                .text()
                .await
        })
        .await;
        match attempt {
            Ok(text) => {
                tracing::debug!(%name, %version, cdn = %base, "mounted package from fallback CDN");
                store.mount(MountedPackage::single_file(&name, &version, depth, text));
                return Ok(());
            }
            Err(err) => {
                tracing::debug!(%name, %version, cdn = %base, error = %err, "fallback CDN failed");
            }
        }
    }

    Err(RegistryError::PackageFetch { name, version })
}
