//! Engine invariants: id uniqueness, single open per file, readiness gating,
//! cancellation and shutdown hygiene, position conversion.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use gobridge_lsp::{CallContext, DiagnosticsMode};
use gobridge_types::{DiagnosticSeverity, EngineState, ErrorKind, Position};
use serde_json::{Value, json};

use crate::common::{
    FakeAnalyzer, READY_MARKER, Readiness, Reply, method, null_script, script, test_config,
};

#[tokio::test]
async fn request_ids_are_unique() {
    let fake = FakeAnalyzer::start(null_script(), Readiness::Immediate).await;
    let engine = fake.engine.clone();

    let calls: Vec<_> = (0..16u32)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let pos = Position::new(1 + i % 5, i).unwrap();
                engine.hover("main.go", pos, &CallContext::new()).await
            })
        })
        .collect();
    for call in join_all_handles(calls).await {
        call.unwrap();
    }
    engine.workspace_symbols("Greet", &CallContext::new()).await.unwrap();

    let ids: Vec<u64> = fake
        .received()
        .iter()
        .filter_map(|m| m.get("id").and_then(Value::as_u64))
        .collect();
    let unique: HashSet<u64> = ids.iter().copied().collect();
    assert_eq!(ids.len(), unique.len(), "duplicate ids in {ids:?}");
    assert_eq!(ids.len(), 18);
    engine.stop().await;
}

/// Await spawned calls that are already running concurrently.
async fn join_all_handles<T>(handles: Vec<tokio::task::JoinHandle<T>>) -> Vec<T> {
    let mut out = Vec::new();
    for handle in handles {
        out.push(handle.await.unwrap());
    }
    out
}

#[tokio::test]
async fn each_file_is_opened_once() {
    let fake = FakeAnalyzer::start(null_script(), Readiness::Immediate).await;
    let engine = fake.engine.clone();
    let pos = Position::new(4, 5).unwrap();

    let calls: Vec<_> = (0..8)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let ctx = CallContext::new();
                if i % 2 == 0 {
                    engine.hover("lib.go", pos, &ctx).await.map(|_| ())
                } else {
                    engine.definition("./lib.go", pos, &ctx).await.map(|_| ())
                }
            })
        })
        .collect();
    for result in join_all_handles(calls).await {
        result.unwrap();
    }
    engine
        .document_symbols("main.go", &CallContext::new())
        .await
        .unwrap();
    engine
        .completions("main.go", Position::new(6, 5).unwrap(), &CallContext::new())
        .await
        .unwrap();

    let opens = fake.received_method("textDocument/didOpen");
    let uris: Vec<&str> = opens
        .iter()
        .filter_map(|m| m["params"]["textDocument"]["uri"].as_str())
        .collect();
    assert_eq!(uris, vec![fake.uri("lib.go"), fake.uri("main.go")]);
    assert_eq!(opens[0]["params"]["textDocument"]["languageId"], "go");
    assert_eq!(opens[0]["params"]["textDocument"]["version"], 1);
    assert_eq!(engine.open_documents().await, vec!["lib.go", "main.go"]);
    engine.stop().await;
}

#[tokio::test]
async fn nothing_but_the_handshake_precedes_readiness() {
    let fake = FakeAnalyzer::start(null_script(), Readiness::After(Duration::from_millis(150))).await;
    assert_eq!(fake.engine.state(), EngineState::Initialising);

    let engine = fake.engine.clone();
    let early = tokio::spawn(async move {
        engine
            .definition("main.go", Position::new(6, 14).unwrap(), &CallContext::new())
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(fake.received_method("textDocument/didOpen").is_empty());
    assert!(fake.received_method("textDocument/definition").is_empty());

    early.await.unwrap().unwrap();
    tokio::time::timeout(Duration::from_secs(1), async {
        while fake.engine.state() != EngineState::Ready {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("engine promoted to ready");

    let received = fake.received();
    let marker = received.iter().position(|m| method(m) == READY_MARKER).unwrap();
    for message in &received[..marker] {
        assert!(
            matches!(method(message), "initialize" | "initialized"),
            "{message} sent before readiness"
        );
    }
    fake.engine.stop().await;
}

#[tokio::test]
async fn readiness_wait_is_bounded_by_the_call_deadline() {
    let fake = FakeAnalyzer::start(null_script(), Readiness::Never).await;
    let err = fake
        .engine
        .hover(
            "main.go",
            Position::new(1, 0).unwrap(),
            &CallContext::new().with_deadline(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotReady);
    assert!(fake.received_method("textDocument/hover").is_empty());
    assert!(fake.engine.status().running);
    fake.engine.stop().await;
}

#[tokio::test]
async fn cancellation_releases_the_waiter() {
    let fake = FakeAnalyzer::start(
        script(|msg| match method(msg) {
            "textDocument/implementation" => Reply::Silent,
            _ => Reply::Result(Value::Null),
        }),
        Readiness::Immediate,
    )
    .await;
    let engine = fake.engine.clone();
    let ctx = CallContext::new();
    let call_ctx = ctx.clone();
    let call = tokio::spawn(async move {
        engine
            .implementations("lib.go", Position::new(4, 6).unwrap(), &call_ctx)
            .await
    });

    while fake.received_method("textDocument/implementation").is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(fake.engine.pending_requests(), 1);

    ctx.cancel();
    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(fake.engine.pending_requests(), 0);

    // Dropping the caller's future has the same effect.
    let engine = fake.engine.clone();
    let dropped = tokio::spawn(async move {
        engine
            .implementations("lib.go", Position::new(4, 6).unwrap(), &CallContext::new())
            .await
    });
    while fake.received_method("textDocument/implementation").len() < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    dropped.abort();
    let _ = dropped.await;
    assert_eq!(fake.engine.pending_requests(), 0);
    assert!(fake.engine.status().running);
    fake.engine.stop().await;
}

#[tokio::test]
async fn stop_releases_every_caller() {
    let fake = FakeAnalyzer::start_with(
        script(|msg| match method(msg) {
            "workspace/symbol" => Reply::Silent,
            _ => Reply::Result(Value::Null),
        }),
        Readiness::Immediate,
        gobridge_lsp::EngineConfig {
            diagnostics_mode: DiagnosticsMode::Push,
            diagnostics_wait: Duration::from_secs(60),
            ..test_config()
        },
    )
    .await;

    let mut callers: Vec<_> = (0..4)
        .map(|_| {
            let engine = fake.engine.clone();
            tokio::spawn(async move {
                engine
                    .workspace_symbols("x", &CallContext::new())
                    .await
                    .map(|_| ())
            })
        })
        .collect();
    // Nothing is ever published for main.go, so this one parks in the
    // diagnostics wait.
    let engine = fake.engine.clone();
    callers.push(tokio::spawn(async move {
        engine
            .diagnostics("main.go", &CallContext::new())
            .await
            .map(|_| ())
    }));
    while fake.received_method("workspace/symbol").len() < 4
        || fake.received_method("textDocument/didOpen").is_empty()
    {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    tokio::time::timeout(Duration::from_secs(5), fake.engine.stop())
        .await
        .expect("stop returns");
    for caller in callers {
        let err = tokio::time::timeout(Duration::from_secs(1), caller)
            .await
            .expect("caller released")
            .unwrap()
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::AnalyzerGone | ErrorKind::Cancelled));
    }
    assert_eq!(fake.engine.state(), EngineState::Stopped);
    assert_eq!(fake.engine.pending_requests(), 0);
    assert!(!fake.engine.status().running);
    assert_eq!(fake.received_method("shutdown").len(), 1);
    assert_eq!(fake.received_method("exit").len(), 1);

    // Idempotent, and calls after stop fail fast.
    fake.engine.stop().await;
    let err = fake
        .engine
        .hover("main.go", Position::new(1, 0).unwrap(), &CallContext::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AnalyzerGone);
}

#[tokio::test]
async fn hung_analyzer_cannot_outlast_deadline_or_cancellation() {
    let fake = FakeAnalyzer::start(
        script(|msg| match method(msg) {
            "workspace/symbol" => Reply::Hang,
            _ => Reply::Result(Value::Null),
        }),
        Readiness::Immediate,
    )
    .await;
    let engine = fake.engine.clone();
    engine
        .workspace_symbols("warm", &CallContext::new().with_deadline(Duration::from_millis(50)))
        .await
        .unwrap_err();

    // Enough traffic to fill the pipe and the writer queue behind it.
    let query = "q".repeat(4096);
    let calls: Vec<_> = (0..120)
        .map(|_| {
            let engine = engine.clone();
            let query = query.clone();
            tokio::spawn(async move {
                let ctx = CallContext::new().with_deadline(Duration::from_millis(100));
                engine.workspace_symbols(&query, &ctx).await
            })
        })
        .collect();
    let results = tokio::time::timeout(Duration::from_secs(3), join_all_handles(calls))
        .await
        .expect("every call returns at its deadline");
    for result in results {
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Deadline);
    }

    let ctx = CallContext::new();
    let call = {
        let engine = engine.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move { engine.hover("main.go", Position::new(1, 0).unwrap(), &ctx).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    ctx.cancel();
    let err = tokio::time::timeout(Duration::from_secs(1), call)
        .await
        .expect("cancellation observed")
        .unwrap()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(engine.pending_requests(), 0);

    tokio::time::timeout(Duration::from_secs(5), engine.stop())
        .await
        .expect("stop returns");
    assert_eq!(engine.state(), EngineState::Stopped);
}

#[tokio::test]
async fn positions_convert_at_the_boundary() {
    let fake = FakeAnalyzer::start(
        script(|msg| match method(msg) {
            "textDocument/completion" => {
                let line = msg["params"]["position"]["line"].clone();
                let character = msg["params"]["position"]["character"].clone();
                Reply::Result(json!([{
                    "label": "echo",
                    "kind": 3,
                    "detail": format!("{line}:{character}")
                }]))
            }
            "textDocument/references" => Reply::Result(json!([{
                "uri": msg["params"]["textDocument"]["uri"],
                "range": { "start": msg["params"]["position"], "end": msg["params"]["position"] }
            }])),
            _ => Reply::Result(Value::Null),
        }),
        Readiness::Immediate,
    )
    .await;

    for (line, character) in [(1, 0), (2, 7), (6, 2), (40, 0)] {
        let pos = Position::new(line, character).unwrap();
        let items = fake
            .engine
            .completions("main.go", pos, &CallContext::new())
            .await
            .unwrap();
        assert_eq!(items[0].detail.as_deref(), Some(format!("{}:{character}", line - 1).as_str()));

        let locations = fake
            .engine
            .references("main.go", pos, false, &CallContext::new())
            .await
            .unwrap();
        assert_eq!(locations[0].range.start, pos);
    }

    let request = fake.received_method("textDocument/references").pop().unwrap();
    assert_eq!(request["params"]["context"]["includeDeclaration"], false);
    fake.engine.stop().await;
}

#[tokio::test]
async fn analyzer_errors_leave_engine_usable() {
    let fake = FakeAnalyzer::start(
        script(|msg| match method(msg) {
            "textDocument/typeDefinition" => Reply::Error {
                code: -32602,
                message: "no type at position".to_string(),
            },
            _ => Reply::Result(Value::Null),
        }),
        Readiness::Immediate,
    )
    .await;

    let err = fake
        .engine
        .type_definition("main.go", Position::new(5, 0).unwrap(), &CallContext::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AnalyzerError);
    assert!(err.to_string().contains("no type at position"));

    let locations = fake
        .engine
        .definition("main.go", Position::new(5, 0).unwrap(), &CallContext::new())
        .await
        .unwrap();
    assert!(locations.is_empty());
    fake.engine.stop().await;
}

#[tokio::test]
async fn file_errors_do_not_reach_the_analyzer() {
    let fake = FakeAnalyzer::start(null_script(), Readiness::Immediate).await;
    let pos = Position::new(1, 0).unwrap();

    let err = fake
        .engine
        .hover("README.md", pos, &CallContext::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedFile);

    let err = fake
        .engine
        .hover("../outside.go", pos, &CallContext::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedFile);

    let err = fake
        .engine
        .hover("missing.go", pos, &CallContext::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FileUnreadable);

    assert!(fake.received_method("textDocument/didOpen").is_empty());
    assert!(fake.received_method("textDocument/hover").is_empty());
    fake.engine.stop().await;
}

#[tokio::test]
async fn pushed_diagnostics_are_served() {
    let fake = FakeAnalyzer::start(
        script(|msg| match method(msg) {
            "textDocument/didOpen" => Reply::Publish(json!({
                "uri": msg["params"]["textDocument"]["uri"],
                "diagnostics": [{
                    "range": {
                        "start": { "line": 5, "character": 1 },
                        "end": { "line": 5, "character": 4 }
                    },
                    "severity": 1,
                    "source": "compiler",
                    "message": "undefined: fmt.Printl"
                }]
            })),
            _ => Reply::Result(Value::Null),
        }),
        Readiness::Immediate,
    )
    .await;

    let diagnostics = fake
        .engine
        .diagnostics("main.go", &CallContext::new())
        .await
        .unwrap();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].severity, DiagnosticSeverity::Error);
    assert_eq!(diagnostics[0].range.start.line(), 6);
    assert_eq!(diagnostics[0].message, "undefined: fmt.Printl");

    // lib.go never gets a publish: empty after the grace period.
    let diagnostics = fake
        .engine
        .diagnostics("lib.go", &CallContext::new())
        .await
        .unwrap();
    assert!(diagnostics.is_empty());
    assert!(fake.received_method("textDocument/diagnostic").is_empty());
    fake.engine.stop().await;
}

#[tokio::test]
async fn pulled_diagnostics_are_requested() {
    let config = gobridge_lsp::EngineConfig {
        diagnostics_mode: DiagnosticsMode::Pull,
        ..test_config()
    };
    let fake = FakeAnalyzer::start_with(
        script(|msg| match method(msg) {
            "textDocument/diagnostic" => Reply::Result(json!({
                "kind": "full",
                "items": [{
                    "range": {
                        "start": { "line": 0, "character": 0 },
                        "end": { "line": 0, "character": 7 }
                    },
                    "severity": 2,
                    "message": "package comment missing"
                }]
            })),
            _ => Reply::Result(Value::Null),
        }),
        Readiness::Immediate,
        config,
    )
    .await;

    let diagnostics = fake
        .engine
        .diagnostics("lib.go", &CallContext::new())
        .await
        .unwrap();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].severity, DiagnosticSeverity::Warning);
    assert_eq!(diagnostics[0].range.start.line(), 1);
    assert_eq!(fake.received_method("textDocument/diagnostic").len(), 1);
    fake.engine.stop().await;
}

#[tokio::test]
async fn closed_resolves_when_the_analyzer_dies() {
    let fake = FakeAnalyzer::start(
        script(|msg| match method(msg) {
            "workspace/symbol" => Reply::Exit,
            _ => Reply::Result(Value::Null),
        }),
        Readiness::Immediate,
    )
    .await;
    let engine = Arc::clone(&fake.engine);
    let _ = engine.workspace_symbols("Greet", &CallContext::new()).await;
    tokio::time::timeout(Duration::from_secs(2), engine.closed())
        .await
        .expect("engine closes");
    assert!(!engine.status().running);
    engine.stop().await;
}
