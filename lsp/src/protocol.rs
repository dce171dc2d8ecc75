//! Language-server message serde types for JSON-RPC communication.
//!
//! Outbound messages are built as `serde_json::Value`s; inbound results are
//! decoded into the `Wire*` types here and reshaped into `gobridge_types`
//! values. Every `Wire*` position is 0-based; the reshaping functions are the
//! only place the 1-based tool convention is applied.

use std::path::{Component, Path, PathBuf};

use gobridge_types::{
    CompletionItem, Diagnostic, DiagnosticSeverity, HoverInfo, Location, Position, Range,
    SymbolNode, WorkspaceSymbol, completion_kind_name, symbol_kind_name,
};
use serde::{Deserialize, Serialize};

/// JSON-RPC internal error, substituted when an error object doesn't decode.
pub(crate) const INTERNAL_ERROR: i64 = -32603;

#[derive(Debug, thiserror::Error)]
#[error("cannot convert path to file URI: {}", path.display())]
pub(crate) struct PathToUriError {
    path: PathBuf,
}

#[derive(Debug, Serialize)]
pub(crate) struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Request {
    pub fn new(id: u64, method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Notification {
    pub fn new(method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// Error object carried by a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// The payload of a response frame.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Reply {
    Result(serde_json::Value),
    Error(ResponseError),
}

/// A decoded inbound frame.
#[derive(Debug)]
pub(crate) enum Incoming {
    Response {
        id: u64,
        reply: Reply,
    },
    ServerRequest {
        id: serde_json::Value,
        method: String,
        params: Option<serde_json::Value>,
    },
    Notification {
        method: String,
        params: Option<serde_json::Value>,
    },
}

/// Classify a frame. `None` means it is neither a response we could have
/// issued nor a well-formed request/notification.
pub(crate) fn parse_incoming(frame: &serde_json::Value) -> Option<Incoming> {
    let id = frame.get("id").filter(|id| !id.is_null());
    let method = frame
        .get("method")
        .and_then(|m| m.as_str())
        .map(String::from);

    match (id, method) {
        (Some(id_val), None) => {
            let id = id_val.as_u64()?;
            let reply = if let Some(error) = frame.get("error").filter(|e| !e.is_null()) {
                let error = serde_json::from_value::<ResponseError>(error.clone()).unwrap_or_else(
                    |_| ResponseError {
                        code: INTERNAL_ERROR,
                        message: error.to_string(),
                        data: None,
                    },
                );
                Reply::Error(error)
            } else if frame.get("result").is_some() {
                Reply::Result(frame["result"].clone())
            } else {
                return None;
            };
            Some(Incoming::Response { id, reply })
        }
        (Some(id_val), Some(method)) => Some(Incoming::ServerRequest {
            id: id_val.clone(),
            method,
            params: frame.get("params").cloned(),
        }),
        (None, Some(method)) => Some(Incoming::Notification {
            method,
            params: frame.get("params").cloned(),
        }),
        (None, None) => None,
    }
}

/// Acknowledge a server-to-client request.
///
/// We implement none of the capabilities a server may ask about, so every
/// request gets a `null` result, except `workspace/configuration`, whose
/// callers index into the returned array.
pub(crate) fn server_request_ack(
    id: &serde_json::Value,
    method: &str,
    params: Option<&serde_json::Value>,
) -> serde_json::Value {
    let result = if method == "workspace/configuration" {
        let items = params
            .and_then(|p| p.get("items"))
            .and_then(serde_json::Value::as_array)
            .map_or(0, Vec::len);
        serde_json::Value::Array(vec![serde_json::Value::Null; items])
    } else {
        serde_json::Value::Null
    };
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

pub(crate) fn initialize_params(root_uri: &str, name: &str) -> serde_json::Value {
    serde_json::json!({
        "processId": std::process::id(),
        "clientInfo": { "name": "gobridge", "version": env!("CARGO_PKG_VERSION") },
        "rootUri": root_uri,
        "capabilities": {
            "window": {
                "workDoneProgress": true,
                "showMessage": {}
            },
            "workspace": {
                "workspaceFolders": true,
                "configuration": true,
                "symbol": {
                    "dynamicRegistration": false
                }
            },
            "textDocument": {
                "synchronization": {
                    "dynamicRegistration": false,
                    "willSave": false,
                    "willSaveWaitUntil": false,
                    "didSave": false
                },
                "hover": {
                    "contentFormat": ["markdown", "plaintext"]
                },
                "definition": { "linkSupport": true },
                "typeDefinition": { "linkSupport": true },
                "implementation": { "linkSupport": true },
                "references": {},
                "documentSymbol": {
                    "hierarchicalDocumentSymbolSupport": true
                },
                "completion": {
                    "completionItem": {
                        "documentationFormat": ["markdown", "plaintext"],
                        "snippetSupport": false
                    }
                },
                "publishDiagnostics": {
                    "relatedInformation": false
                },
                "diagnostic": {
                    "dynamicRegistration": false
                }
            }
        },
        "workspaceFolders": [{
            "uri": root_uri,
            "name": name
        }]
    })
}

pub(crate) fn did_open_params(
    uri: &str,
    language_id: &str,
    version: i32,
    text: &str,
) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "languageId": language_id,
            "version": version,
            "text": text
        }
    })
}

pub(crate) fn text_document_params(uri: &str) -> serde_json::Value {
    serde_json::json!({
        "textDocument": { "uri": uri }
    })
}

/// `TextDocumentPositionParams`, converting the 1-based tool line to the wire.
pub(crate) fn position_params(uri: &str, position: Position) -> serde_json::Value {
    serde_json::json!({
        "textDocument": { "uri": uri },
        "position": {
            "line": position.wire_line(),
            "character": position.character()
        }
    })
}

pub(crate) fn reference_params(
    uri: &str,
    position: Position,
    include_declaration: bool,
) -> serde_json::Value {
    let mut params = position_params(uri, position);
    params["context"] = serde_json::json!({ "includeDeclaration": include_declaration });
    params
}

// ============================================================================
// Inbound wire types
// ============================================================================

#[derive(Debug, Clone, Copy, Deserialize)]
pub(crate) struct WirePosition {
    pub line: u32,
    pub character: u32,
}

impl WirePosition {
    fn to_position(self) -> Position {
        Position::from_wire(self.line, self.character)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub(crate) struct WireRange {
    pub start: WirePosition,
    pub end: WirePosition,
}

impl WireRange {
    pub fn to_range(self) -> Range {
        Range {
            start: self.start.to_position(),
            end: self.end.to_position(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WireLocation {
    pub uri: String,
    pub range: WireRange,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireLocationLink {
    pub target_uri: String,
    #[allow(dead_code)]
    pub target_range: WireRange,
    pub target_selection_range: WireRange,
}

/// `Location | Location[] | LocationLink[]` (null is handled by `Option`).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum GotoResponse {
    Scalar(WireLocation),
    Locations(Vec<WireLocation>),
    Links(Vec<WireLocationLink>),
}

#[derive(Debug, Deserialize)]
pub(crate) struct MarkupContent {
    #[allow(dead_code)]
    pub kind: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum MarkedString {
    Plain(String),
    Code { language: String, value: String },
}

impl MarkedString {
    fn into_text(self) -> String {
        match self {
            Self::Plain(text) => text,
            Self::Code { language, value } => format!("```{language}\n{value}\n```"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum HoverContents {
    // Listed first: a two-string array would otherwise decode as `MarkupContent`.
    List(Vec<MarkedString>),
    Markup(MarkupContent),
    Marked(MarkedString),
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireHover {
    pub contents: HoverContents,
    #[serde(default)]
    pub range: Option<WireRange>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireDocumentSymbol {
    pub name: String,
    #[serde(default)]
    pub detail: Option<String>,
    pub kind: u32,
    pub range: WireRange,
    pub selection_range: WireRange,
    #[serde(default)]
    pub children: Vec<WireDocumentSymbol>,
}

/// `SymbolInformation`, and the 3.17 `WorkspaceSymbol` whose location may be URI-only.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireSymbolInformation {
    pub name: String,
    pub kind: u32,
    pub location: WireSymbolLocation,
    #[serde(default)]
    pub container_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum WireSymbolLocation {
    Full(WireLocation),
    UriOnly { uri: String },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum DocumentSymbolResponse {
    Nested(Vec<WireDocumentSymbol>),
    Flat(Vec<WireSymbolInformation>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum Documentation {
    Plain(String),
    Markup(MarkupContent),
}

impl Documentation {
    fn into_text(self) -> String {
        match self {
            Self::Plain(text) => text,
            Self::Markup(markup) => markup.value,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireTextEdit {
    pub new_text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireCompletionItem {
    pub label: String,
    #[serde(default)]
    pub kind: Option<u32>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub documentation: Option<Documentation>,
    #[serde(default)]
    pub insert_text: Option<String>,
    #[serde(default)]
    pub text_edit: Option<WireTextEdit>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireCompletionList {
    pub items: Vec<WireCompletionItem>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum CompletionResponse {
    List(WireCompletionList),
    Items(Vec<WireCompletionItem>),
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WireDiagnostic {
    pub range: WireRange,
    #[serde(default)]
    pub severity: Option<u64>,
    #[serde(default)]
    pub code: Option<serde_json::Value>,
    #[serde(default)]
    pub source: Option<String>,
    pub message: String,
}

impl WireDiagnostic {
    pub fn to_diagnostic(&self) -> Diagnostic {
        let code = self.code.as_ref().and_then(|code| match code {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        Diagnostic {
            range: self.range.to_range(),
            severity: self
                .severity
                .and_then(DiagnosticSeverity::from_lsp)
                .unwrap_or(DiagnosticSeverity::Warning),
            source: self
                .source
                .clone()
                .unwrap_or_else(|| String::from("unknown")),
            message: self.message.clone(),
            code,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct PublishDiagnosticsParams {
    pub uri: String,
    pub diagnostics: Vec<WireDiagnostic>,
}

/// `textDocument/diagnostic` report; `unchanged` reports carry no items.
#[derive(Debug, Deserialize)]
pub(crate) struct DocumentDiagnosticReport {
    #[allow(dead_code)]
    pub kind: String,
    #[serde(default)]
    pub items: Vec<WireDiagnostic>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WorkDoneProgress {
    pub kind: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProgressParams {
    #[allow(dead_code)]
    pub token: serde_json::Value,
    pub value: WorkDoneProgress,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ShowMessageParams {
    #[serde(rename = "type")]
    #[allow(dead_code)]
    pub kind: u32,
    pub message: String,
}

// ============================================================================
// Reshaping
// ============================================================================

/// Turns wire URIs into tool-surface [`Location`]s relative to one workspace.
#[derive(Debug, Clone)]
pub(crate) struct Reshaper {
    root: PathBuf,
}

impl Reshaper {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn display_path(&self, uri: &str) -> Option<String> {
        let path = file_uri_to_path(uri)?;
        let shown = match path.strip_prefix(&self.root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => path,
        };
        Some(shown.to_string_lossy().into_owned())
    }

    pub fn location(&self, uri: String, range: WireRange) -> Location {
        Location {
            path: self.display_path(&uri),
            uri,
            range: range.to_range(),
        }
    }

    /// Normalise any goto-style response, keeping analyzer order.
    pub fn locations(&self, response: Option<GotoResponse>) -> Vec<Location> {
        match response {
            None => Vec::new(),
            Some(GotoResponse::Scalar(loc)) => vec![self.location(loc.uri, loc.range)],
            Some(GotoResponse::Locations(locs)) => locs
                .into_iter()
                .map(|loc| self.location(loc.uri, loc.range))
                .collect(),
            Some(GotoResponse::Links(links)) => links
                .into_iter()
                .map(|link| self.location(link.target_uri, link.target_selection_range))
                .collect(),
        }
    }

    pub fn hover(response: Option<WireHover>) -> HoverInfo {
        let Some(hover) = response else {
            return HoverInfo::default();
        };
        let contents = match hover.contents {
            HoverContents::Markup(markup) => vec![markup.value],
            HoverContents::Marked(marked) => vec![marked.into_text()],
            HoverContents::List(list) => list.into_iter().map(MarkedString::into_text).collect(),
        };
        HoverInfo {
            contents: contents.into_iter().filter(|s| !s.is_empty()).collect(),
            range: hover.range.map(WireRange::to_range),
        }
    }

    pub fn document_symbols(&self, response: Option<DocumentSymbolResponse>) -> Vec<SymbolNode> {
        fn nested(symbol: WireDocumentSymbol) -> SymbolNode {
            SymbolNode {
                name: symbol.name,
                kind: symbol_kind_name(symbol.kind).to_string(),
                detail: symbol.detail.filter(|d| !d.is_empty()),
                range: symbol.range.to_range(),
                selection_range: Some(symbol.selection_range.to_range()),
                children: symbol.children.into_iter().map(nested).collect(),
            }
        }

        match response {
            None => Vec::new(),
            Some(DocumentSymbolResponse::Nested(symbols)) => {
                symbols.into_iter().map(nested).collect()
            }
            Some(DocumentSymbolResponse::Flat(symbols)) => symbols
                .into_iter()
                .map(|symbol| {
                    let location = self.symbol_location(symbol.location);
                    SymbolNode {
                        name: symbol.name,
                        kind: symbol_kind_name(symbol.kind).to_string(),
                        detail: symbol.container_name,
                        range: location.range,
                        selection_range: None,
                        children: Vec::new(),
                    }
                })
                .collect(),
        }
    }

    pub fn workspace_symbols(
        &self,
        response: Option<Vec<WireSymbolInformation>>,
    ) -> Vec<WorkspaceSymbol> {
        response
            .unwrap_or_default()
            .into_iter()
            .map(|symbol| WorkspaceSymbol {
                name: symbol.name,
                kind: symbol_kind_name(symbol.kind).to_string(),
                location: self.symbol_location(symbol.location),
                container_name: symbol.container_name.filter(|c| !c.is_empty()),
            })
            .collect()
    }

    fn symbol_location(&self, location: WireSymbolLocation) -> Location {
        match location {
            WireSymbolLocation::Full(loc) => self.location(loc.uri, loc.range),
            WireSymbolLocation::UriOnly { uri } => {
                let start = WirePosition {
                    line: 0,
                    character: 0,
                };
                self.location(uri, WireRange { start, end: start })
            }
        }
    }

    pub fn completions(response: Option<CompletionResponse>) -> Vec<CompletionItem> {
        let items = match response {
            None => Vec::new(),
            Some(CompletionResponse::List(list)) => list.items,
            Some(CompletionResponse::Items(items)) => items,
        };
        items
            .into_iter()
            .map(|item| CompletionItem {
                kind: item.kind.map(|k| completion_kind_name(k).to_string()),
                detail: item.detail,
                documentation: item
                    .documentation
                    .map(Documentation::into_text)
                    .filter(|d| !d.is_empty()),
                insert_text: item
                    .insert_text
                    .or_else(|| item.text_edit.map(|edit| edit.new_text)),
                label: item.label,
            })
            .collect()
    }
}

// ============================================================================
// Paths and URIs
// ============================================================================

pub(crate) fn path_to_file_uri(path: &Path) -> Result<url::Url, PathToUriError> {
    url::Url::from_file_path(path).map_err(|()| PathToUriError {
        path: path.to_path_buf(),
    })
}

pub(crate) fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    url::Url::parse(uri)
        .ok()
        .and_then(|u| u.to_file_path().ok())
}

/// Lexically resolve `.` and `..` without touching the file system.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = Vec::new();
    for c in path.components() {
        match c {
            Component::ParentDir => {
                if matches!(out.last(), Some(Component::Normal(_))) {
                    out.pop();
                }
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out.iter().collect()
}
