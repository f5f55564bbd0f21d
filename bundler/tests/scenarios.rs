mod common;

use common::*;

use sandpit_bundler::{
    Bundler, CompileStatus, EvalOutcome, Evaluator, LogLevel, OutboundMessage, Status,
};

#[tokio::test]
async fn vanilla_project_renders_into_the_page() {
    let bundler = Bundler::with_defaults().unwrap();
    let mut rx = bundler.subscribe();
    let outcome = bundler
        .compile(request(
            &[
                (
                    "/index.html",
                    "<html><body><script src=\"index.js\"></script></body></html>",
                ),
                ("/index.js", "document.body.innerText = \"hi\";"),
            ],
            "vanilla",
        ))
        .await;
    assert!(outcome.is_ready());

    let mut evaluator = Evaluator::new(&bundler).unwrap();
    assert_eq!(evaluator.run().unwrap(), EvalOutcome::Completed);
    assert_eq!(
        evaluator.eval_json("document.body.innerText").unwrap(),
        serde_json::json!("hi")
    );

    let messages = drain(&mut rx);
    assert_statuses_monotonic(&messages);
    assert_eq!(statuses(&messages).last(), Some(&Status::Done));
    assert_eq!(done_flags(&messages), vec![false]);
    assert!(messages
        .iter()
        .any(|m| matches!(m, OutboundMessage::Success)));
}

#[tokio::test]
async fn relative_import_logs_the_imported_value() {
    let bundler = Bundler::with_defaults().unwrap();
    let mut rx = bundler.subscribe();
    let outcome = bundler
        .compile(request(
            &[
                ("/index.js", "import x from \"./m\";\nconsole.log(x);"),
                ("/m.js", "export default 42;"),
            ],
            "vanilla",
        ))
        .await;
    assert!(outcome.is_ready());

    let mut evaluator = Evaluator::new(&bundler).unwrap();
    evaluator.run().unwrap();
    let logs = log_lines(&drain(&mut rx));
    assert!(logs.contains(&"42".to_string()), "logs: {logs:?}");
}

#[tokio::test]
async fn extension_probing_finds_tsx_modules() {
    let bundler = Bundler::with_defaults().unwrap();
    let outcome = bundler
        .compile(request(
            &[
                ("/index.ts", "import v from \"./util\";\nexport default v;"),
                ("/util.tsx", "export default \"ok\";"),
            ],
            "vanilla",
        ))
        .await;
    assert!(outcome.is_ready());

    let entry = bundler.module("/index.ts").unwrap();
    assert_eq!(entry.dependency_map["./util"], "/util.tsx");
    let util = bundler.module("/util.tsx").unwrap();
    assert!(util.compiled.is_some());

    let mut evaluator = Evaluator::new(&bundler).unwrap();
    evaluator.run().unwrap();
    assert_eq!(
        evaluator
            .eval_json("__sandpit.requireModule(\"/index.ts\").default")
            .unwrap(),
        serde_json::json!("ok")
    );
}

#[tokio::test]
async fn empty_project_reports_the_empty_state() {
    let bundler = Bundler::with_defaults().unwrap();
    let mut rx = bundler.subscribe();
    let outcome = bundler.compile(request(&[], "vanilla")).await;
    assert!(matches!(outcome.status, CompileStatus::EmptyProject));

    let messages = drain(&mut rx);
    assert_eq!(done_flags(&messages), vec![false]);
    assert!(!statuses(&messages).contains(&Status::Evaluating));
    assert!(!messages
        .iter()
        .any(|m| matches!(m, OutboundMessage::Action(_))));
}

#[tokio::test]
async fn missing_dependency_surfaces_a_show_error_action() {
    let bundler = Bundler::with_defaults().unwrap();
    let mut rx = bundler.subscribe();
    let outcome = bundler
        .compile(request(
            &[("/index.js", "import \"./does-not-exist\";")],
            "vanilla",
        ))
        .await;
    assert!(outcome.error().is_some());

    let messages = drain(&mut rx);
    let action = messages
        .iter()
        .find_map(|m| match m {
            OutboundMessage::Action(action) => Some(action),
            _ => None,
        })
        .expect("an action message");
    assert_eq!(action.action, "show-error");
    assert!(action.message.contains("does-not-exist"));
    assert_eq!(action.path.as_deref(), Some("/index.js"));
    assert_eq!(done_flags(&messages), vec![true]);
    assert!(!statuses(&messages).contains(&Status::Evaluating));
}

#[tokio::test]
async fn compile_closure_settles_every_reachable_module() {
    let bundler = Bundler::with_defaults().unwrap();
    let outcome = bundler
        .compile(request(
            &[
                ("/index.js", "import \"./a\";"),
                ("/a.js", "import \"./b\";\nimport \"./c\";"),
                ("/b.js", "import \"./c\";\nexport default 1;"),
                ("/c.js", "export default 2;"),
            ],
            "vanilla",
        ))
        .await;
    assert!(outcome.is_ready());

    for path in ["/index.js", "/a.js", "/b.js", "/c.js"] {
        let module = bundler.module(path).unwrap();
        assert!(module.compiled.is_some(), "{path} should be compiled");
        assert!(module.compilation_error.is_none());
    }
    let entry = bundler.module("/index.js").unwrap();
    assert!(entry.is_entry);

    // Reverse edges exist for every dependency edge.
    let a = bundler.module("/a.js").unwrap();
    assert_eq!(a.dependencies, vec!["/b.js".to_string(), "/c.js".to_string()]);
}

#[tokio::test]
async fn html_only_projects_skip_js_bundling() {
    let bundler = Bundler::with_defaults().unwrap();
    let mut rx = bundler.subscribe();
    let outcome = bundler
        .compile(request(
            &[("/index.html", "<html><body><h1>Static</h1></body></html>")],
            "vanilla",
        ))
        .await;
    assert!(matches!(outcome.status, CompileStatus::HtmlOnly));
    assert_eq!(done_flags(&drain(&mut rx)), vec![false]);

    let mut evaluator = Evaluator::new(&bundler).unwrap();
    assert_eq!(evaluator.run().unwrap(), EvalOutcome::Completed);
    let body = evaluator.eval_json("document.body.innerHTML").unwrap();
    assert!(body.as_str().unwrap().contains("<h1>Static</h1>"));
}

#[tokio::test]
async fn runtime_errors_surface_as_runtime_exception_actions() {
    let bundler = Bundler::with_defaults().unwrap();
    let mut rx = bundler.subscribe();
    let outcome = bundler
        .compile(request(
            &[("/index.js", "throw new Error(\"exploded\");")],
            "vanilla",
        ))
        .await;
    assert!(outcome.is_ready());

    let mut evaluator = Evaluator::new(&bundler).unwrap();
    let err = evaluator.run().unwrap_err();
    assert!(err.to_string().contains("exploded"));

    let messages = drain(&mut rx);
    let action = messages
        .iter()
        .find_map(|m| match m {
            OutboundMessage::Action(action) => Some(action),
            _ => None,
        })
        .expect("an action message");
    assert_eq!(action.title, "Runtime Exception");
    assert!(action.message.contains("exploded"));
}

#[tokio::test]
async fn log_level_limits_forwarded_console_output() {
    let bundler = Bundler::with_defaults().unwrap();
    let mut rx = bundler.subscribe();
    let mut request = request(
        &[(
            "/index.js",
            "console.log(\"chatty\");\nconsole.warn(\"beware\");\nconsole.error(\"loud\");",
        )],
        "vanilla",
    );
    request.log_level = Some(LogLevel::Warning);

    let outcome = bundler.compile(request).await;
    assert!(outcome.is_ready());
    let mut evaluator = Evaluator::new(&bundler).unwrap();
    evaluator.run().unwrap();

    let logs = console_logs(&drain(&mut rx));
    assert_eq!(
        logs,
        vec![
            ("warn".to_string(), "beware".to_string()),
            ("error".to_string(), "loud".to_string()),
        ]
    );
}

#[tokio::test]
async fn state_snapshot_keys_keep_the_trailing_colon() {
    let bundler = Bundler::with_defaults().unwrap();
    let mut rx = bundler.subscribe();
    bundler
        .compile(request(&[("/index.js", "export default 1;")], "vanilla"))
        .await;
    let messages = drain(&mut rx);
    let state = messages
        .iter()
        .find_map(|m| match m {
            OutboundMessage::State { state } => Some(state),
            _ => None,
        })
        .expect("a state message");
    let entry = state
        .transpiled_modules
        .get("/index.js:")
        .expect("entry keyed with trailing colon");
    assert!(entry.source.is_entry);
    assert_eq!(entry.source.file_name, "/index.js");
    assert!(entry.source.compiled_code.contains("exports.default"));
}
