//! Built-in tools: `list_workspaces` plus one tool per engine operation.

use gobridge_types::{Position, SymbolNode};
use serde::Deserialize;
use serde_json::Value;

use crate::{ToolCtx, ToolError, ToolExecutor, ToolFut, ToolRegistry, parse_args};

pub fn register_builtins(registry: &mut ToolRegistry) -> Result<(), ToolError> {
    registry.register(Box::new(ListWorkspacesTool))?;
    for kind in [
        LocationKind::Definition,
        LocationKind::TypeDefinition,
        LocationKind::Implementations,
    ] {
        registry.register(Box::new(LocationTool { kind }))?;
    }
    registry.register(Box::new(FindReferencesTool))?;
    registry.register(Box::new(HoverTool))?;
    registry.register(Box::new(DocumentSymbolsTool))?;
    registry.register(Box::new(WorkspaceSymbolsTool))?;
    registry.register(Box::new(DiagnosticsTool))?;
    registry.register(Box::new(CompletionsTool))?;
    Ok(())
}

// ============================================================================
// Arguments
// ============================================================================

#[derive(Debug, Deserialize)]
struct FileArgs {
    workspace: String,
    path: String,
}

#[derive(Debug, Deserialize)]
struct PositionArgs {
    workspace: String,
    path: String,
    line: u32,
    character: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReferencesArgs {
    workspace: String,
    path: String,
    line: u32,
    character: u32,
    #[serde(default = "default_true")]
    include_declaration: bool,
}

#[derive(Debug, Deserialize)]
struct QueryArgs {
    workspace: String,
    query: String,
}

fn default_true() -> bool {
    true
}

fn non_empty_path(path: &str) -> Result<&str, ToolError> {
    if path.trim().is_empty() {
        return Err(ToolError::BadArgs {
            message: "path must not be empty".to_string(),
        });
    }
    Ok(path)
}

fn position(line: u32, character: u32) -> Result<Position, ToolError> {
    Position::new(line, character).map_err(|e| ToolError::BadArgs {
        message: e.to_string(),
    })
}

fn workspace_prop() -> Value {
    serde_json::json!({
        "type": "string",
        "description": "Absolute path of a configured Go workspace"
    })
}

fn file_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "workspace": workspace_prop(),
            "path": { "type": "string", "description": "File path relative to the workspace root" }
        },
        "required": ["workspace", "path"]
    })
}

fn position_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "workspace": workspace_prop(),
            "path": { "type": "string", "description": "File path relative to the workspace root" },
            "line": { "type": "integer", "minimum": 1, "description": "Line number (1-indexed)" },
            "character": { "type": "integer", "minimum": 0, "description": "Character offset within the line (0-indexed)" }
        },
        "required": ["workspace", "path", "line", "character"]
    })
}

// ============================================================================
// list_workspaces
// ============================================================================

struct ListWorkspacesTool;

impl ToolExecutor for ListWorkspacesTool {
    fn name(&self) -> &'static str {
        "list_workspaces"
    }

    fn description(&self) -> &'static str {
        "List configured Go workspaces with their analyzer state and readiness"
    }

    fn schema(&self) -> Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    fn execute<'a>(&'a self, _args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move { Ok(serde_json::json!({ "workspaces": ctx.router.list() })) })
    }
}

// ============================================================================
// Location-returning tools
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum LocationKind {
    Definition,
    TypeDefinition,
    Implementations,
}

struct LocationTool {
    kind: LocationKind,
}

impl ToolExecutor for LocationTool {
    fn name(&self) -> &'static str {
        match self.kind {
            LocationKind::Definition => "go_to_definition",
            LocationKind::TypeDefinition => "go_to_type_definition",
            LocationKind::Implementations => "find_implementations",
        }
    }

    fn description(&self) -> &'static str {
        match self.kind {
            LocationKind::Definition => "Find where the symbol at a position is defined",
            LocationKind::TypeDefinition => "Find the definition of the type of the symbol at a position",
            LocationKind::Implementations => {
                "Find implementations of the interface, or interfaces implemented by the type, at a position"
            }
        }
    }

    fn schema(&self) -> Value {
        position_schema()
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: PositionArgs = parse_args(&args)?;
            let path = non_empty_path(&typed.path)?;
            let position = position(typed.line, typed.character)?;
            let engine = ctx.router.route(&typed.workspace)?;
            let locations = match self.kind {
                LocationKind::Definition => engine.definition(path, position, &ctx.call).await?,
                LocationKind::TypeDefinition => {
                    engine.type_definition(path, position, &ctx.call).await?
                }
                LocationKind::Implementations => {
                    engine.implementations(path, position, &ctx.call).await?
                }
            };
            Ok(serde_json::json!({ "locations": locations }))
        })
    }
}

struct FindReferencesTool;

impl ToolExecutor for FindReferencesTool {
    fn name(&self) -> &'static str {
        "find_references"
    }

    fn description(&self) -> &'static str {
        "Find all references to the symbol at a position"
    }

    fn schema(&self) -> Value {
        let mut schema = position_schema();
        schema["properties"]["includeDeclaration"] = serde_json::json!({
            "type": "boolean",
            "default": true,
            "description": "Include the declaration itself (default: true)"
        });
        schema
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: ReferencesArgs = parse_args(&args)?;
            let path = non_empty_path(&typed.path)?;
            let position = position(typed.line, typed.character)?;
            let engine = ctx.router.route(&typed.workspace)?;
            let locations = engine
                .references(path, position, typed.include_declaration, &ctx.call)
                .await?;
            Ok(serde_json::json!({ "locations": locations }))
        })
    }
}

// ============================================================================
// Hover, symbols, completions, diagnostics
// ============================================================================

struct HoverTool;

impl ToolExecutor for HoverTool {
    fn name(&self) -> &'static str {
        "get_hover_info"
    }

    fn description(&self) -> &'static str {
        "Get type information and documentation for the symbol at a position"
    }

    fn schema(&self) -> Value {
        position_schema()
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: PositionArgs = parse_args(&args)?;
            let path = non_empty_path(&typed.path)?;
            let position = position(typed.line, typed.character)?;
            let engine = ctx.router.route(&typed.workspace)?;
            let hover = engine.hover(path, position, &ctx.call).await?;
            Ok(serde_json::json!({ "hover": hover }))
        })
    }
}

struct DocumentSymbolsTool;

impl ToolExecutor for DocumentSymbolsTool {
    fn name(&self) -> &'static str {
        "get_document_symbols"
    }

    fn description(&self) -> &'static str {
        "Outline of the symbols declared in a file"
    }

    fn schema(&self) -> Value {
        file_schema()
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: FileArgs = parse_args(&args)?;
            let path = non_empty_path(&typed.path)?;
            let engine = ctx.router.route(&typed.workspace)?;
            let symbols = engine.document_symbols(path, &ctx.call).await?;
            tracing::debug!(
                path,
                nodes = symbols.iter().map(SymbolNode::count).sum::<usize>(),
                "document outline"
            );
            Ok(serde_json::json!({ "symbols": symbols }))
        })
    }
}

struct WorkspaceSymbolsTool;

impl ToolExecutor for WorkspaceSymbolsTool {
    fn name(&self) -> &'static str {
        "search_workspace_symbols"
    }

    fn description(&self) -> &'static str {
        "Search symbols across the whole workspace by name"
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "workspace": workspace_prop(),
                "query": { "type": "string", "description": "Symbol name or fuzzy pattern" }
            },
            "required": ["workspace", "query"]
        })
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: QueryArgs = parse_args(&args)?;
            let engine = ctx.router.route(&typed.workspace)?;
            let symbols = engine.workspace_symbols(&typed.query, &ctx.call).await?;
            Ok(serde_json::json!({ "symbols": symbols }))
        })
    }
}

struct DiagnosticsTool;

impl ToolExecutor for DiagnosticsTool {
    fn name(&self) -> &'static str {
        "get_diagnostics"
    }

    fn description(&self) -> &'static str {
        "Compiler and analyzer diagnostics for a file"
    }

    fn schema(&self) -> Value {
        file_schema()
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: FileArgs = parse_args(&args)?;
            let path = non_empty_path(&typed.path)?;
            let engine = ctx.router.route(&typed.workspace)?;
            let diagnostics = engine.diagnostics(path, &ctx.call).await?;
            Ok(serde_json::json!({ "diagnostics": diagnostics }))
        })
    }
}

struct CompletionsTool;

impl ToolExecutor for CompletionsTool {
    fn name(&self) -> &'static str {
        "get_completions"
    }

    fn description(&self) -> &'static str {
        "Completion candidates at a position"
    }

    fn schema(&self) -> Value {
        position_schema()
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: PositionArgs = parse_args(&args)?;
            let path = non_empty_path(&typed.path)?;
            let position = position(typed.line, typed.character)?;
            let engine = ctx.router.route(&typed.workspace)?;
            let items = engine.completions(path, position, &ctx.call).await?;
            Ok(serde_json::json!({ "items": items }))
        })
    }
}
