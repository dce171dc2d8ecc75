//! The named tools, driven through the registry against fake analyzers.

use std::sync::Arc;
use std::time::Duration;

use gobridge_lsp::{CallContext, Router};
use gobridge_tools::{ToolCtx, ToolRegistry};
use gobridge_types::ErrorKind;
use serde_json::{Value, json};

use crate::common::{FakeAnalyzer, Readiness, Reply, method, script};

fn range(line: u32, start: u32, end: u32) -> Value {
    json!({
        "start": { "line": line, "character": start },
        "end": { "line": line, "character": end }
    })
}

fn navigation_script() -> crate::common::Script {
    script(|msg| {
        let uri = msg["params"]["textDocument"]["uri"].clone();
        match method(msg) {
            "textDocument/references" => {
                let mut hits = vec![json!({ "uri": uri, "range": range(5, 13, 18) })];
                if msg["params"]["context"]["includeDeclaration"] == true {
                    hits.push(json!({ "uri": uri, "range": range(3, 5, 10) }));
                }
                Reply::Result(Value::Array(hits))
            }
            "textDocument/typeDefinition" => Reply::Result(json!({
                "uri": "file:///usr/local/go/src/builtin/builtin.go",
                "range": range(84, 5, 11)
            })),
            "textDocument/implementation" => Reply::Result(json!([{
                "targetUri": uri,
                "targetRange": range(2, 0, 30),
                "targetSelectionRange": range(3, 5, 10)
            }])),
            "textDocument/documentSymbol" => Reply::Result(json!([{
                "name": "Greet",
                "detail": "func(name string) string",
                "kind": 12,
                "range": range(3, 0, 40),
                "selectionRange": range(3, 5, 10),
                "children": [{
                    "name": "name",
                    "kind": 13,
                    "range": range(3, 11, 22),
                    "selectionRange": range(3, 11, 15)
                }]
            }])),
            "workspace/symbol" => Reply::Result(json!([{
                "name": "Greet",
                "kind": 12,
                "containerName": "example.com/w",
                "location": { "uri": "file:///elsewhere/x.go", "range": range(0, 0, 5) }
            }])),
            "textDocument/completion" => Reply::Result(json!({
                "isIncomplete": false,
                "items": [
                    { "label": "Println", "kind": 3, "detail": "func(a ...any) (n int, err error)" },
                    { "label": "Printf", "kind": 3, "textEdit": { "range": range(5, 5, 8), "newText": "Printf" } }
                ]
            })),
            "textDocument/hover" => Reply::Result(json!({
                "contents": [ "func Greet(name string) string", "Greet says hello." ],
                "range": range(5, 13, 18)
            })),
            _ => Reply::Result(Value::Null),
        }
    })
}

struct Surface {
    fake: FakeAnalyzer,
    registry: ToolRegistry,
    ctx: ToolCtx,
}

impl Surface {
    async fn start() -> Self {
        let fake = FakeAnalyzer::start(navigation_script(), Readiness::Immediate).await;
        let router = Arc::new(Router::from_engines([fake.engine.clone()]));
        Self {
            registry: ToolRegistry::with_builtins().unwrap(),
            ctx: ToolCtx::new(router, CallContext::new()),
            fake,
        }
    }

    async fn call(&self, tool: &str, mut args: Value) -> Result<Value, gobridge_tools::ToolError> {
        args["workspace"] = json!(self.fake.root());
        self.registry.dispatch(tool, args, &self.ctx).await
    }

    async fn stop(self) {
        self.ctx.router.stop_all().await;
    }
}

#[tokio::test]
async fn references_include_declaration_by_default() {
    let surface = Surface::start().await;
    let args = json!({ "path": "main.go", "line": 6, "character": 14 });

    let with_decl = surface.call("find_references", args.clone()).await.unwrap();
    assert_eq!(with_decl["locations"].as_array().unwrap().len(), 2);
    assert_eq!(with_decl["locations"][1]["range"]["start"]["line"], 4);
    assert_eq!(with_decl["locations"][0]["path"], "main.go");

    let mut args = args;
    args["includeDeclaration"] = json!(false);
    let without = surface.call("find_references", args).await.unwrap();
    assert_eq!(without["locations"].as_array().unwrap().len(), 1);
    surface.stop().await;
}

#[tokio::test]
async fn locations_outside_the_workspace_keep_absolute_paths() {
    let surface = Surface::start().await;
    let result = surface
        .call(
            "go_to_type_definition",
            json!({ "path": "main.go", "line": 6, "character": 20 }),
        )
        .await
        .unwrap();
    assert_eq!(
        result["locations"][0]["path"],
        "/usr/local/go/src/builtin/builtin.go"
    );
    assert_eq!(result["locations"][0]["range"]["start"]["line"], 85);

    let result = surface
        .call(
            "find_implementations",
            json!({ "path": "lib.go", "line": 4, "character": 6 }),
        )
        .await
        .unwrap();
    assert_eq!(result["locations"][0]["path"], "lib.go");
    assert_eq!(result["locations"][0]["range"]["start"]["line"], 4);
    surface.stop().await;
}

#[tokio::test]
async fn outline_search_completion_and_hover() {
    let surface = Surface::start().await;

    let outline = surface
        .call("get_document_symbols", json!({ "path": "lib.go" }))
        .await
        .unwrap();
    let greet = &outline["symbols"][0];
    assert_eq!(greet["name"], "Greet");
    assert_eq!(greet["kind"], "Function");
    assert_eq!(greet["selectionRange"]["start"]["line"], 4);
    assert_eq!(greet["children"][0]["kind"], "Variable");

    let found = surface
        .call("search_workspace_symbols", json!({ "query": "Greet" }))
        .await
        .unwrap();
    assert_eq!(found["symbols"][0]["containerName"], "example.com/w");
    assert_eq!(found["symbols"][0]["location"]["path"], "/elsewhere/x.go");

    let completions = surface
        .call(
            "get_completions",
            json!({ "path": "main.go", "line": 6, "character": 8 }),
        )
        .await
        .unwrap();
    let items = completions["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["kind"], "Function");
    assert_eq!(items[1]["insertText"], "Printf");

    let hover = surface
        .call(
            "get_hover_info",
            json!({ "path": "main.go", "line": 6, "character": 14 }),
        )
        .await
        .unwrap();
    assert_eq!(
        hover["hover"]["contents"],
        json!(["func Greet(name string) string", "Greet says hello."])
    );
    assert_eq!(hover["hover"]["range"]["start"]["line"], 6);
    surface.stop().await;
}

#[tokio::test]
async fn list_workspaces_reports_readiness() {
    let surface = Surface::start().await;
    let engine = surface.fake.engine.clone();
    tokio::time::timeout(Duration::from_secs(1), async {
        while engine.status().state != gobridge_types::EngineState::Ready {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("engine ready");

    let listed = surface
        .registry
        .dispatch("list_workspaces", json!({}), &surface.ctx)
        .await
        .unwrap();
    let row = &listed["workspaces"][0];
    assert_eq!(row["path"], surface.fake.root());
    assert_eq!(row["running"], true);
    assert_eq!(row["state"], "ready");
    assert_eq!(row["readiness"], "ready");
    surface.stop().await;
}

#[tokio::test]
async fn bad_arguments_never_reach_the_engine() {
    let surface = Surface::start().await;

    let err = surface
        .call("get_hover_info", json!({ "path": "main.go", "line": 0, "character": 3 }))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArguments);
    assert_eq!(err.to_error_body()["kind"], "InvalidArguments");

    let err = surface
        .call("get_document_symbols", json!({ "file": "main.go" }))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArguments);

    assert!(surface.fake.received_method("textDocument/didOpen").is_empty());
    assert!(surface.fake.engine.status().running);
    surface.stop().await;
}

#[tokio::test]
async fn cancelled_tool_call_reports_cancelled() {
    let fake = FakeAnalyzer::start(
        script(|msg| match method(msg) {
            "textDocument/hover" => Reply::Silent,
            _ => Reply::Result(Value::Null),
        }),
        Readiness::Immediate,
    )
    .await;
    let router = Arc::new(Router::from_engines([fake.engine.clone()]));
    let registry = Arc::new(ToolRegistry::with_builtins().unwrap());
    let call = CallContext::new();
    let ctx = ToolCtx::new(router.clone(), call.clone());
    let args = json!({ "workspace": fake.root(), "path": "main.go", "line": 1, "character": 0 });

    let task = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.dispatch("get_hover_info", args, &ctx).await })
    };
    while fake.received_method("textDocument/hover").is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    call.cancel();

    let err = task.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(fake.engine.pending_requests(), 0);
    router.stop_all().await;
}
