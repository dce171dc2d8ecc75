//! Newline-delimited JSON-RPC 2.0 over a byte stream pair.
//!
//! One JSON message per line. `tools/call` requests each run on their own
//! task so a slow analyzer request never blocks the loop; replies can
//! therefore arrive out of order. `notifications/cancelled` trips the
//! matching call's cancellation token.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use gobridge_lsp::{CallContext, Router};
use gobridge_tools::{ToolCtx, ToolRegistry};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const PROTOCOL_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "gobridge";

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

const OUTBOUND_CAPACITY: usize = 64;

type InFlight = Arc<Mutex<HashMap<String, CancellationToken>>>;

fn success(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn failure(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message.into() }
    })
}

/// Key a request id by its JSON text, so `1` and `"1"` stay distinct.
fn id_key(id: &Value) -> String {
    id.to_string()
}

pub(crate) struct Server {
    registry: Arc<ToolRegistry>,
    router: Arc<Router>,
    in_flight: InFlight,
    calls: JoinSet<()>,
    out: mpsc::Sender<Value>,
}

/// Serve until `reader` reaches end of input, then cancel outstanding calls
/// and flush every reply that was produced.
pub(crate) async fn serve<R, W>(
    reader: R,
    writer: W,
    registry: Arc<ToolRegistry>,
    router: Arc<Router>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out, rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let writer_task = tokio::spawn(write_lines(writer, rx));

    let mut server = Server {
        registry,
        router,
        in_flight: Arc::new(Mutex::new(HashMap::new())),
        calls: JoinSet::new(),
        out,
    };

    let mut lines = BufReader::new(reader).lines();
    let read_result = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if !line.is_empty() {
                    server.handle_line(line).await;
                }
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
        while server.calls.try_join_next().is_some() {}
    };

    server.shutdown().await;
    match writer_task.await {
        Ok(write_result) => read_result.and(write_result),
        Err(join) => Err(std::io::Error::other(join)),
    }
}

async fn write_lines<W>(mut writer: W, mut rx: mpsc::Receiver<Value>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
    }
    Ok(())
}

impl Server {
    async fn reply(&self, message: Value) {
        if self.out.send(message).await.is_err() {
            tracing::warn!("output closed; dropping reply");
        }
    }

    async fn handle_line(&mut self, line: &str) {
        let message: Value = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("unparseable input line: {e}");
                self.reply(failure(Value::Null, PARSE_ERROR, format!("Parse error: {e}")))
                    .await;
                return;
            }
        };

        let Some(method) = message.get("method").and_then(Value::as_str) else {
            if message.get("id").is_some()
                && (message.get("result").is_some() || message.get("error").is_some())
            {
                tracing::debug!("ignoring response from client");
            } else {
                let id = message.get("id").cloned().unwrap_or(Value::Null);
                self.reply(failure(id, INVALID_REQUEST, "Invalid request"))
                    .await;
            }
            return;
        };
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        match message.get("id").cloned() {
            Some(id) => self.handle_request(id, method, params).await,
            None => self.handle_notification(method, &params),
        }
    }

    fn handle_notification(&self, method: &str, params: &Value) {
        match method {
            "notifications/cancelled" => {
                let Some(request_id) = params.get("requestId") else {
                    tracing::debug!("cancellation without requestId");
                    return;
                };
                let token = self
                    .in_flight
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(&id_key(request_id))
                    .cloned();
                match token {
                    Some(token) => {
                        tracing::debug!(id = %request_id, "cancelling tool call");
                        token.cancel();
                    }
                    None => tracing::debug!(id = %request_id, "cancel for unknown or finished call"),
                }
            }
            "notifications/initialized" => tracing::info!("client initialized"),
            other => tracing::trace!(method = other, "ignoring notification"),
        }
    }

    async fn handle_request(&mut self, id: Value, method: &str, params: Value) {
        let response = match method {
            "initialize" => {
                let version = params
                    .get("protocolVersion")
                    .and_then(Value::as_str)
                    .unwrap_or(PROTOCOL_VERSION);
                success(
                    id,
                    json!({
                        "protocolVersion": version,
                        "capabilities": { "tools": { "listChanged": false } },
                        "serverInfo": {
                            "name": SERVER_NAME,
                            "version": env!("CARGO_PKG_VERSION"),
                        }
                    }),
                )
            }
            "tools/list" => success(id, json!({ "tools": self.registry.definitions() })),
            "ping" => success(id, json!({})),
            "tools/call" => {
                self.spawn_call(id, params);
                return;
            }
            other => failure(id, METHOD_NOT_FOUND, format!("Method not found: {other}")),
        };
        self.reply(response).await;
    }

    fn spawn_call(&mut self, id: Value, params: Value) {
        let Some(name) = params.get("name").and_then(Value::as_str).map(str::to_string) else {
            let out = self.out.clone();
            self.calls.spawn(async move {
                let _ = out
                    .send(failure(id, INVALID_PARAMS, "tools/call requires a tool name"))
                    .await;
            });
            return;
        };
        let arguments = match params.get("arguments") {
            None | Some(Value::Null) => json!({}),
            Some(arguments) => arguments.clone(),
        };

        let token = CancellationToken::new();
        let key = id_key(&id);
        let reused = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if in_flight.contains_key(&key) {
                true
            } else {
                in_flight.insert(key.clone(), token.clone());
                false
            }
        };
        if reused {
            // The running call keeps its id, so it stays cancellable.
            tracing::warn!(id = %id, tool = %name, "request id reused while still in flight");
            let out = self.out.clone();
            self.calls.spawn(async move {
                let _ = out
                    .send(failure(id, INVALID_REQUEST, "Request id is already in flight"))
                    .await;
            });
            return;
        }

        let registry = Arc::clone(&self.registry);
        let ctx = ToolCtx::new(
            Arc::clone(&self.router),
            CallContext::new().with_cancel(token),
        );
        let in_flight = Arc::clone(&self.in_flight);
        let out = self.out.clone();

        self.calls.spawn(async move {
            let result = match registry.dispatch(&name, arguments, &ctx).await {
                Ok(value) => json!({
                    "content": [{ "type": "text", "text": value.to_string() }],
                    "structuredContent": value,
                }),
                Err(e) => json!({
                    "content": [{ "type": "text", "text": e.to_error_body().to_string() }],
                    "isError": true,
                }),
            };
            in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
            if out.send(success(id, result)).await.is_err() {
                tracing::warn!(tool = %name, "output closed; dropping tool result");
            }
        });
    }

    /// Cancel outstanding calls, wait for their replies, then close output.
    async fn shutdown(mut self) {
        let pending: Vec<CancellationToken> = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        if !pending.is_empty() {
            tracing::info!(count = pending.len(), "input closed; cancelling in-flight calls");
        }
        for token in pending {
            token.cancel();
        }
        while self.calls.join_next().await.is_some() {}
    }
}
