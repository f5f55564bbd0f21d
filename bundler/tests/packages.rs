mod common;

use std::time::Duration;

use common::*;

use sandpit_bundler::{Bundler, BundlerOptions, Evaluator};
use sandpit_registry::CdnConfig;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn options_for(server: &MockServer) -> BundlerOptions {
    BundlerOptions {
        cdn: CdnConfig {
            packager_url: format!("{}/api/dependencies", server.uri()),
            module_url: format!("{}/api/module", server.uri()),
            fallback_urls: vec![format!("{}/fallback", server.uri())],
            retries: 0,
            retry_delay: Duration::from_millis(1),
        },
        bridge: None,
    }
}

#[tokio::test]
async fn fetched_packages_resolve_and_evaluate() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/dependencies"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "dependencies": [{ "name": "double", "version": "1.0.0", "depth": 0 }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/module/double@1.0.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "files": {
                "package.json": { "content": "{\"name\":\"double\",\"main\":\"lib/double.js\"}", "transpiled": true },
                "lib/double.js": {
                    "content": "module.exports = function (n) { return n * 2; };",
                    "transpiled": true
                }
            }
        })))
        .mount(&server)
        .await;

    let bundler = Bundler::new(options_for(&server)).unwrap();
    let mut rx = bundler.subscribe();
    let outcome = bundler
        .compile(request(
            &[
                (
                    "/package.json",
                    "{\"main\": \"index.js\", \"dependencies\": {\"double\": \"^1.0.0\"}}",
                ),
                (
                    "/index.js",
                    "var double = require(\"double\");\nconsole.log(double(21));\n",
                ),
            ],
            "vanilla",
        ))
        .await;
    assert!(outcome.is_ready(), "outcome: {:?}", outcome.status);

    let entry = bundler.module("/index.js").unwrap();
    assert_eq!(
        entry.dependency_map["double"],
        "/node_modules/double/lib/double.js"
    );

    let mut evaluator = Evaluator::new(&bundler).unwrap();
    evaluator.run().unwrap();
    let logs = log_lines(&drain(&mut rx));
    assert!(logs.contains(&"42".to_string()), "logs: {logs:?}");
}

#[tokio::test]
async fn packages_arrive_through_the_fallback_cdn_when_the_primary_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/dependencies"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/module/answer@2.0.0"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/fallback/answer@2.0.0"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("module.exports = { value: 42 };"),
        )
        .mount(&server)
        .await;

    let bundler = Bundler::new(options_for(&server)).unwrap();
    let mut rx = bundler.subscribe();
    let outcome = bundler
        .compile(request(
            &[
                (
                    "/package.json",
                    "{\"main\": \"index.js\", \"dependencies\": {\"answer\": \"2.0.0\"}}",
                ),
                (
                    "/index.js",
                    "var answer = require(\"answer\");\nconsole.log(answer.value);\n",
                ),
            ],
            "vanilla",
        ))
        .await;
    assert!(outcome.is_ready(), "outcome: {:?}", outcome.status);

    let entry = bundler.module("/index.js").unwrap();
    assert_eq!(
        entry.dependency_map["answer"],
        "/node_modules/answer/index.js"
    );

    let mut evaluator = Evaluator::new(&bundler).unwrap();
    evaluator.run().unwrap();
    let logs = log_lines(&drain(&mut rx));
    assert!(logs.contains(&"42".to_string()), "logs: {logs:?}");
}

#[tokio::test]
async fn exhausted_package_fetches_fail_the_compile() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/dependencies"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let bundler = Bundler::new(options_for(&server)).unwrap();
    let mut rx = bundler.subscribe();
    let outcome = bundler
        .compile(request(
            &[
                (
                    "/package.json",
                    "{\"main\": \"index.js\", \"dependencies\": {\"ghost\": \"1.0.0\"}}",
                ),
                ("/index.js", "require(\"ghost\");"),
            ],
            "vanilla",
        ))
        .await;
    let err = outcome.error().expect("a registry failure");
    assert!(err.to_string().contains("ghost@1.0.0"));
    assert_eq!(done_flags(&drain(&mut rx)), vec![true]);
}
