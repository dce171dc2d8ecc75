//! Tool-surface operations on a ready engine.
//!
//! Each operation waits for readiness, opens the document if needed, issues
//! one analyzer request and reshapes the result. Positions in and out are
//! 1-based lines with 0-based characters.

use gobridge_types::{
    CompletionItem, Diagnostic, HoverInfo, Location, Position, SymbolNode, WorkspaceSymbol,
};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::protocol::{
    self, CompletionResponse, DocumentDiagnosticReport, DocumentSymbolResponse, GotoResponse,
    Reshaper, WireDiagnostic, WireHover, WireSymbolInformation,
};
use crate::types::{CallContext, DiagnosticsMode};

impl Engine {
    pub async fn definition(
        &self,
        file: &str,
        position: Position,
        ctx: &CallContext,
    ) -> Result<Vec<Location>, EngineError> {
        self.goto("textDocument/definition", file, position, ctx)
            .await
    }

    pub async fn type_definition(
        &self,
        file: &str,
        position: Position,
        ctx: &CallContext,
    ) -> Result<Vec<Location>, EngineError> {
        self.goto("textDocument/typeDefinition", file, position, ctx)
            .await
    }

    pub async fn implementations(
        &self,
        file: &str,
        position: Position,
        ctx: &CallContext,
    ) -> Result<Vec<Location>, EngineError> {
        self.goto("textDocument/implementation", file, position, ctx)
            .await
    }

    async fn goto(
        &self,
        method: &'static str,
        file: &str,
        position: Position,
        ctx: &CallContext,
    ) -> Result<Vec<Location>, EngineError> {
        let uri = self.prepare_document(file, ctx).await?;
        let response: Option<GotoResponse> = self
            .request(method, protocol::position_params(&uri, position), ctx)
            .await?;
        Ok(self.reshaper.locations(response))
    }

    pub async fn references(
        &self,
        file: &str,
        position: Position,
        include_declaration: bool,
        ctx: &CallContext,
    ) -> Result<Vec<Location>, EngineError> {
        let uri = self.prepare_document(file, ctx).await?;
        let response: Option<GotoResponse> = self
            .request(
                "textDocument/references",
                protocol::reference_params(&uri, position, include_declaration),
                ctx,
            )
            .await?;
        Ok(self.reshaper.locations(response))
    }

    pub async fn hover(
        &self,
        file: &str,
        position: Position,
        ctx: &CallContext,
    ) -> Result<HoverInfo, EngineError> {
        let uri = self.prepare_document(file, ctx).await?;
        let response: Option<WireHover> = self
            .request(
                "textDocument/hover",
                protocol::position_params(&uri, position),
                ctx,
            )
            .await?;
        Ok(Reshaper::hover(response))
    }

    pub async fn document_symbols(
        &self,
        file: &str,
        ctx: &CallContext,
    ) -> Result<Vec<SymbolNode>, EngineError> {
        let uri = self.prepare_document(file, ctx).await?;
        let response: Option<DocumentSymbolResponse> = self
            .request(
                "textDocument/documentSymbol",
                protocol::text_document_params(&uri),
                ctx,
            )
            .await?;
        Ok(self.reshaper.document_symbols(response))
    }

    pub async fn workspace_symbols(
        &self,
        query: &str,
        ctx: &CallContext,
    ) -> Result<Vec<WorkspaceSymbol>, EngineError> {
        self.await_ready(ctx).await?;
        let response: Option<Vec<WireSymbolInformation>> = self
            .request(
                "workspace/symbol",
                serde_json::json!({ "query": query }),
                ctx,
            )
            .await?;
        Ok(self.reshaper.workspace_symbols(response))
    }

    pub async fn completions(
        &self,
        file: &str,
        position: Position,
        ctx: &CallContext,
    ) -> Result<Vec<CompletionItem>, EngineError> {
        let uri = self.prepare_document(file, ctx).await?;
        let response: Option<CompletionResponse> = self
            .request(
                "textDocument/completion",
                protocol::position_params(&uri, position),
                ctx,
            )
            .await?;
        Ok(Reshaper::completions(response))
    }

    /// Diagnostics for one file, pushed or pulled according to config.
    ///
    /// In push mode a file that was only just opened gets a short grace
    /// period for its first publish; if none arrives the result is empty.
    pub async fn diagnostics(
        &self,
        file: &str,
        ctx: &CallContext,
    ) -> Result<Vec<Diagnostic>, EngineError> {
        let uri = self.prepare_document(file, ctx).await?;
        match self.config.diagnostics_mode {
            DiagnosticsMode::Pull => {
                let report: Option<DocumentDiagnosticReport> = self
                    .request(
                        "textDocument/diagnostic",
                        protocol::text_document_params(&uri),
                        ctx,
                    )
                    .await?;
                Ok(report
                    .map(|r| r.items.iter().map(WireDiagnostic::to_diagnostic).collect())
                    .unwrap_or_default())
            }
            DiagnosticsMode::Push => {
                let wait = ctx.deadline().map_or(self.config.diagnostics_wait, |d| {
                    d.min(self.config.diagnostics_wait)
                });
                tokio::select! {
                    items = self.diagnostics.wait_for(&uri, wait) => Ok(items.unwrap_or_default()),
                    () = ctx.cancel_token().cancelled() => Err(EngineError::Cancelled),
                    reason = self.lifecycle.terminated() => Err(EngineError::gone(reason)),
                }
            }
        }
    }
}
