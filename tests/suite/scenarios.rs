//! End-to-end scenarios against the scripted fake analyzer.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use gobridge_lsp::{CallContext, EngineError, Router};
use gobridge_tools::{ToolCtx, ToolRegistry};
use gobridge_types::{ErrorKind, Position};
use serde_json::{Value, json};

use crate::common::{FakeAnalyzer, READY_MARKER, Readiness, Reply, method, null_script, script};

fn hover_reply(text: &str) -> Value {
    json!({ "contents": { "kind": "markdown", "value": text } })
}

#[tokio::test]
async fn definition_reports_one_based_lines() {
    let lib_uri = Arc::new(std::sync::OnceLock::<String>::new());
    let uri = lib_uri.clone();
    let fake = FakeAnalyzer::start(
        script(move |msg| match method(msg) {
            "textDocument/definition" => Reply::Result(json!([{
                "uri": uri.get().cloned().unwrap_or_default(),
                "range": {
                    "start": { "line": 3, "character": 0 },
                    "end": { "line": 3, "character": 4 }
                }
            }])),
            _ => Reply::Result(Value::Null),
        }),
        Readiness::Immediate,
    )
    .await;
    lib_uri.set(fake.uri("lib.go")).unwrap();

    let locations = fake
        .engine
        .definition("main.go", Position::new(10, 5).unwrap(), &CallContext::new())
        .await
        .unwrap();

    assert_eq!(locations.len(), 1);
    let start = locations[0].range.start;
    assert_eq!(start.line(), 4);
    assert_eq!(start.character(), 0);
    assert_eq!(locations[0].path.as_deref(), Some("lib.go"));

    let request = &fake.received_method("textDocument/definition")[0];
    assert_eq!(request["params"]["position"], json!({ "line": 9, "character": 5 }));
    fake.engine.stop().await;
}

#[tokio::test]
async fn two_workspaces_are_isolated() {
    let a = FakeAnalyzer::start(
        script(|msg| match method(msg) {
            "textDocument/hover" => Reply::Delayed(Duration::from_millis(50), hover_reply("from a")),
            _ => Reply::Result(Value::Null),
        }),
        Readiness::Immediate,
    )
    .await;
    let b = FakeAnalyzer::start(
        script(|msg| match method(msg) {
            "textDocument/hover" => Reply::Result(hover_reply("from b")),
            _ => Reply::Result(Value::Null),
        }),
        Readiness::Immediate,
    )
    .await;
    let router = Router::from_engines([a.engine.clone(), b.engine.clone()]);

    let pos = Position::new(6, 6).unwrap();
    let engine_a = router.route(&a.root()).unwrap();
    let engine_b = router.route(&b.root()).unwrap();
    let ctx = CallContext::new();
    let (hover_a, hover_b) = tokio::join!(
        engine_a.hover("main.go", pos, &ctx),
        engine_b.hover("main.go", pos, &ctx),
    );

    assert_eq!(hover_a.unwrap().contents, vec!["from a".to_string()]);
    assert_eq!(hover_b.unwrap().contents, vec!["from b".to_string()]);

    // Each engine numbers its own requests; neither sees the other's traffic.
    let id_a = a.received_method("textDocument/hover")[0]["id"].clone();
    let id_b = b.received_method("textDocument/hover")[0]["id"].clone();
    assert_eq!(id_a, id_b);
    assert_eq!(a.received_method("textDocument/hover").len(), 1);
    assert_eq!(b.received_method("textDocument/hover").len(), 1);

    router.stop_all().await;
}

#[tokio::test]
async fn calls_wait_for_package_load() {
    let fake = FakeAnalyzer::start(
        script(|msg| match method(msg) {
            "textDocument/hover" => Reply::Result(hover_reply("func main()")),
            _ => Reply::Result(Value::Null),
        }),
        Readiness::After(Duration::from_millis(200)),
    )
    .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    let issued = Instant::now();
    let hover = fake
        .engine
        .hover("main.go", Position::new(5, 6).unwrap(), &CallContext::new())
        .await
        .unwrap();
    let waited = issued.elapsed();

    assert_eq!(hover.contents, vec!["func main()".to_string()]);
    assert!(waited >= Duration::from_millis(100), "returned after {waited:?}");

    let received = fake.received();
    let marker = received.iter().position(|m| method(m) == READY_MARKER).unwrap();
    let hover_at = received
        .iter()
        .position(|m| method(m) == "textDocument/hover")
        .unwrap();
    assert!(marker < hover_at);
    fake.engine.stop().await;
}

#[tokio::test]
async fn deadline_leaves_engine_usable() {
    let hovers = Arc::new(AtomicUsize::new(0));
    let seen = hovers.clone();
    let fake = FakeAnalyzer::start(
        script(move |msg| match method(msg) {
            "textDocument/hover" if seen.fetch_add(1, Ordering::SeqCst) == 0 => Reply::Silent,
            "textDocument/hover" => Reply::Result(hover_reply("second")),
            _ => Reply::Result(Value::Null),
        }),
        Readiness::Immediate,
    )
    .await;
    let pos = Position::new(5, 6).unwrap();

    let started = Instant::now();
    let err = fake
        .engine
        .hover(
            "main.go",
            pos,
            &CallContext::new().with_deadline(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Deadline);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(fake.engine.pending_requests(), 0);

    let hover = fake
        .engine
        .hover("main.go", pos, &CallContext::new())
        .await
        .unwrap();
    assert_eq!(hover.contents, vec!["second".to_string()]);
    assert!(fake.engine.status().running);
    fake.engine.stop().await;
}

#[tokio::test]
async fn analyzer_crash_fails_in_flight_call() {
    let fake = FakeAnalyzer::start(
        script(|msg| match method(msg) {
            "textDocument/references" => Reply::Exit,
            _ => Reply::Result(Value::Null),
        }),
        Readiness::Immediate,
    )
    .await;
    let router = Router::from_engines([fake.engine.clone()]);

    let err = fake
        .engine
        .references("lib.go", Position::new(4, 6).unwrap(), true, &CallContext::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AnalyzerGone);

    let listed = router.list();
    assert_eq!(listed.len(), 1);
    assert!(!listed[0].running);
    assert!(listed[0].error.is_some());

    // Later calls fail fast instead of hanging.
    let err = fake
        .engine
        .hover("main.go", Position::new(1, 0).unwrap(), &CallContext::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AnalyzerGone);

    router.stop_all().await;
    assert!(fake.is_finished());
}

#[tokio::test]
async fn unknown_workspace_enumerates_configured() {
    let a = FakeAnalyzer::start(null_script(), Readiness::Immediate).await;
    let b = FakeAnalyzer::start(null_script(), Readiness::Immediate).await;
    let router = Arc::new(Router::from_engines([a.engine.clone(), b.engine.clone()]));

    let err = router.route("/c").unwrap_err();
    let EngineError::UnknownWorkspace { available, .. } = &err else {
        panic!("expected UnknownWorkspace, got {err:?}");
    };
    assert_eq!(available, &vec![a.root(), b.root()]);

    let registry = ToolRegistry::with_builtins().unwrap();
    let ctx = ToolCtx::new(router.clone(), CallContext::new());
    let err = registry
        .dispatch(
            "get_hover_info",
            json!({ "workspace": "/c", "path": "main.go", "line": 1, "character": 0 }),
            &ctx,
        )
        .await
        .unwrap_err();
    let body = err.to_error_body();
    assert_eq!(body["kind"], "UnknownWorkspace");
    assert_eq!(body["available"], json!([a.root(), b.root()]));

    router.stop_all().await;
}
