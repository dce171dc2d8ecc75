//! Tool executor framework: the named tools a remote caller sees.
//!
//! Each tool decodes its JSON arguments, routes to the workspace's engine
//! through the [`Router`], and returns a JSON object result. Failures render
//! to a `{ "kind", "message", ... }` body via [`ToolError::to_error_body`].

pub mod builtins;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use gobridge_lsp::{CallContext, EngineError, Router};
use gobridge_types::ErrorKind;
use serde::Serialize;
use serde_json::Value;

/// Tool execution future type alias.
pub type ToolFut<'a> = Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + 'a>>;

/// Error types for tool execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Bad tool args: {message}")]
    BadArgs { message: String },
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },
    #[error("Duplicate tool registered: {name}")]
    DuplicateTool { name: String },
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ToolError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadArgs { .. } | Self::DuplicateTool { .. } => ErrorKind::InvalidArguments,
            Self::UnknownTool { .. } => ErrorKind::UnknownTool,
            Self::Engine(e) => e.kind(),
        }
    }

    /// JSON body returned to the caller in place of a result.
    #[must_use]
    pub fn to_error_body(&self) -> Value {
        let mut body = serde_json::json!({
            "kind": self.kind().as_str(),
            "message": self.to_string(),
        });
        if let Self::Engine(e) = self
            && let (Some(Value::Object(details)), Value::Object(map)) = (e.details(), &mut body)
        {
            map.extend(details);
        }
        body
    }
}

/// A tool as advertised in a `tools/list` reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's arguments.
    pub input_schema: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// Everything a tool needs for one call.
#[derive(Clone)]
pub struct ToolCtx {
    pub router: Arc<Router>,
    pub call: CallContext,
}

impl ToolCtx {
    pub fn new(router: Arc<Router>, call: CallContext) -> Self {
        Self { router, call }
    }
}

pub trait ToolExecutor: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn schema(&self) -> Value;
    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a>;
}

pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(args: &Value) -> Result<T, ToolError> {
    serde_json::from_value(args.clone()).map_err(|e| ToolError::BadArgs {
        message: e.to_string(),
    })
}

/// Tool registry, keyed by tool name.
#[derive(Default)]
pub struct ToolRegistry {
    executors: HashMap<String, Box<dyn ToolExecutor>>,
}

impl ToolRegistry {
    /// A registry holding `list_workspaces` and every navigation tool.
    pub fn with_builtins() -> Result<Self, ToolError> {
        let mut registry = Self::default();
        builtins::register_builtins(&mut registry)?;
        Ok(registry)
    }

    pub fn register(&mut self, executor: Box<dyn ToolExecutor>) -> Result<(), ToolError> {
        let name = executor.name().to_string();
        if self.executors.contains_key(&name) {
            return Err(ToolError::DuplicateTool { name });
        }
        self.executors.insert(name, executor);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<&dyn ToolExecutor, ToolError> {
        self.executors
            .get(name)
            .map(std::convert::AsRef::as_ref)
            .ok_or_else(|| ToolError::UnknownTool {
                name: name.to_string(),
            })
    }

    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .executors
            .values()
            .map(|exec| ToolDefinition::new(exec.name(), exec.description(), exec.schema()))
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Run tool `name` with `args`.
    pub async fn dispatch(&self, name: &str, args: Value, ctx: &ToolCtx) -> Result<Value, ToolError> {
        let tool = self.lookup(name)?;
        let started = Instant::now();
        let result = tool.execute(args, ctx).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => tracing::debug!(tool = name, elapsed_ms, "tool call succeeded"),
            Err(e) => tracing::debug!(
                tool = name,
                elapsed_ms,
                kind = e.kind().as_str(),
                "tool call failed: {e}"
            ),
        }
        result
    }
}
