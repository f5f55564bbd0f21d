use std::time::Duration;

use sandpit_registry::{
    CdnConfig, DependencySet, Manifest, ManifestEntry, PackageRegistry,
};
use sandpit_vfs::FileSource;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> CdnConfig {
    CdnConfig {
        packager_url: format!("{}/api/dependencies", server.uri()),
        module_url: format!("{}/api/module", server.uri()),
        fallback_urls: vec![format!("{}/fallback", server.uri())],
        retries: 0,
        retry_delay: Duration::from_millis(1),
    }
}

fn deps(pairs: &[(&str, &str)]) -> DependencySet {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn manifest_comes_from_the_packager() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/dependencies"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "dependencies": [
                { "name": "left-pad", "version": "1.3.0", "depth": 0 },
                { "name": "tiny-dep", "version": "0.1.0", "depth": 1 }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let registry = PackageRegistry::new(config_for(&server));
    let manifest = registry
        .fetch_manifest(&deps(&[("left-pad", "^1.3.0")]))
        .await;
    assert_eq!(manifest.dependencies.len(), 2);
    assert_eq!(manifest.dependencies[0].name, "left-pad");
    assert_eq!(manifest.dependencies[1].depth, 1);
}

#[tokio::test]
async fn unreachable_packager_synthesizes_trivial_manifest() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/dependencies"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let registry = PackageRegistry::new(config_for(&server));
    let manifest = registry
        .fetch_manifest(&deps(&[("left-pad", "^1.3.0")]))
        .await;
    assert_eq!(
        manifest.dependencies,
        vec![ManifestEntry {
            name: "left-pad".to_string(),
            version: "1.3.0".to_string(),
            depth: 0,
        }]
    );
}

#[tokio::test]
async fn preload_mounts_files_from_the_module_cdn() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/module/left-pad@1.3.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "files": {
                "package.json": { "content": "{\"name\":\"left-pad\",\"main\":\"lib/index.js\"}" },
                "lib/index.js": { "content": "module.exports = function pad() {};", "transpiled": true }
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let registry = PackageRegistry::new(config_for(&server));
    let manifest = Manifest {
        dependencies: vec![ManifestEntry {
            name: "left-pad".to_string(),
            version: "1.3.0".to_string(),
            depth: 0,
        }],
    };
    registry.preload_modules(&manifest).await.unwrap();

    let store = registry.store();
    assert!(store.exists("/node_modules/left-pad/lib/index.js"));
    assert!(store.is_transpiled("/node_modules/left-pad/lib/index.js"));
    assert_eq!(
        store.read("/node_modules/left-pad/package.json").unwrap(),
        "{\"name\":\"left-pad\",\"main\":\"lib/index.js\"}"
    );

    // A second preload is a no-op thanks to coalescing (the mock expects
    // exactly one request).
    registry.preload_modules(&manifest).await.unwrap();
}

#[tokio::test]
async fn failed_primary_falls_back_to_the_next_cdn() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/module/tiny@0.1.0"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/fallback/tiny@0.1.0"))
        .respond_with(ResponseTemplate::new(200).set_body_string("module.exports = 42;"))
        .expect(1)
        .mount(&server)
        .await;

    let registry = PackageRegistry::new(config_for(&server));
    let manifest = Manifest {
        dependencies: vec![ManifestEntry {
            name: "tiny".to_string(),
            version: "0.1.0".to_string(),
            depth: 0,
        }],
    };
    registry.preload_modules(&manifest).await.unwrap();

    let store = registry.store();
    assert_eq!(
        store.read("/node_modules/tiny/index.js").unwrap(),
        "module.exports = 42;"
    );
    assert!(store.is_transpiled("/node_modules/tiny/index.js"));
}

#[tokio::test]
async fn exhausted_cdns_fail_with_the_offending_package() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let registry = PackageRegistry::new(config_for(&server));
    let manifest = Manifest {
        dependencies: vec![ManifestEntry {
            name: "ghost".to_string(),
            version: "9.9.9".to_string(),
            depth: 0,
        }],
    };
    let err = registry.preload_modules(&manifest).await.unwrap_err();
    assert!(err.to_string().contains("ghost@9.9.9"));
}

#[tokio::test]
async fn transient_dependencies_join_the_manifest() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/module/parent@1.0.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "files": {
                "package.json": {
                    "content": "{\"name\":\"parent\",\"main\":\"index.js\",\"dependencies\":{\"child\":\"^2.0.0\"}}"
                },
                "index.js": { "content": "module.exports = require('child');", "transpiled": true }
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/module/child@2.0.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "files": {
                "index.js": { "content": "module.exports = 2;", "transpiled": true }
            }
        })))
        .mount(&server)
        .await;

    let registry = PackageRegistry::new(config_for(&server));
    let mut manifest = Manifest {
        dependencies: vec![ManifestEntry {
            name: "parent".to_string(),
            version: "1.0.0".to_string(),
            depth: 0,
        }],
    };
    registry.preload_modules(&manifest).await.unwrap();
    registry.load_module_dependencies(&mut manifest).await.unwrap();

    assert!(manifest.contains("child"));
    assert!(registry.store().exists("/node_modules/child/index.js"));
    let child = manifest
        .dependencies
        .iter()
        .find(|e| e.name == "child")
        .unwrap();
    assert_eq!(child.depth, 1);
}
