mod common;

use common::*;

use sandpit_bundler::{Bundler, BundlerOptions, Evaluator};
use sandpit_vfs::{serve_file_requests, BridgeLayer};

#[tokio::test]
async fn host_file_resolver_backs_missing_reads() {
    let (bridge, rx) = BridgeLayer::channel();
    serve_file_requests(rx, |path| {
        (path == "/remote.js").then(|| "export default \"from-host\";".to_string())
    });

    let bundler = Bundler::new(BundlerOptions {
        bridge: Some(bridge),
        ..Default::default()
    })
    .unwrap();
    let mut messages = bundler.subscribe();

    let mut request = request(
        &[("/index.js", "import v from \"./remote\";\nconsole.log(v);")],
        "vanilla",
    );
    request.has_file_resolver = true;

    let outcome = bundler.compile(request).await;
    assert!(outcome.is_ready(), "outcome: {:?}", outcome.status);

    let remote = bundler.module("/remote.js").unwrap();
    assert!(remote.compiled.is_some());

    let mut evaluator = Evaluator::new(&bundler).unwrap();
    evaluator.run().unwrap();
    let logs = log_lines(&drain(&mut messages));
    assert!(logs.contains(&"from-host".to_string()), "logs: {logs:?}");
}

#[tokio::test]
async fn bridge_stays_silent_without_the_request_flag() {
    let (bridge, rx) = BridgeLayer::channel();
    serve_file_requests(rx, |_| Some("export default 1;".to_string()));

    let bundler = Bundler::new(BundlerOptions {
        bridge: Some(bridge),
        ..Default::default()
    })
    .unwrap();

    // hasFileResolver is false, so the bridge must not answer and the import
    // fails to resolve.
    let outcome = bundler
        .compile(request(
            &[("/index.js", "import v from \"./remote\";")],
            "vanilla",
        ))
        .await;
    let err = outcome.error().expect("resolution failure");
    assert!(err.to_string().contains("./remote"));
}
