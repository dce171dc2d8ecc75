//! Tool-surface value types for gobridge.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Every type here is what a remote tool caller sees: positions are 1-based lines with
//! 0-based characters, and all results serialize with camelCase keys.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod completion;
mod diagnostic;
mod position;
mod status;
mod symbols;

pub use completion::{CompletionItem, completion_kind_name};
pub use diagnostic::{Diagnostic, DiagnosticSeverity};
pub use position::{HoverInfo, InvalidPosition, Location, Position, Range};
pub use status::{EngineState, ReadinessState, WorkspaceStatus};
pub use symbols::{SymbolNode, WorkspaceSymbol, symbol_kind_name};

use serde::{Deserialize, Serialize};

// ============================================================================
// Error taxonomy
// ============================================================================

/// Classification of every failure a tool call can surface.
///
/// The engine, router and tool layers each carry richer error types; all of
/// them collapse onto one of these kinds at the tool boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The call named a workspace that is not configured.
    UnknownWorkspace,
    /// The analyzer did not finish loading packages before the deadline.
    NotReady,
    /// No response arrived before the request deadline.
    Deadline,
    /// The analyzer answered with a JSON-RPC error object.
    AnalyzerError,
    /// The analyzer exited, or the engine is stopping.
    AnalyzerGone,
    /// The analyzer's output stream lost frame synchronisation.
    ProtocolFraming,
    /// The file is not a Go source or module file, or lies outside the workspace.
    UnsupportedFile,
    /// The file could not be read from disk.
    FileUnreadable,
    /// The caller cancelled the call.
    Cancelled,
    /// Tool arguments were missing or malformed.
    InvalidArguments,
    /// No tool with the requested name exists.
    UnknownTool,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnknownWorkspace => "UnknownWorkspace",
            Self::NotReady => "NotReady",
            Self::Deadline => "Deadline",
            Self::AnalyzerError => "AnalyzerError",
            Self::AnalyzerGone => "AnalyzerGone",
            Self::ProtocolFraming => "ProtocolFraming",
            Self::UnsupportedFile => "UnsupportedFile",
            Self::FileUnreadable => "FileUnreadable",
            Self::Cancelled => "Cancelled",
            Self::InvalidArguments => "InvalidArguments",
            Self::UnknownTool => "UnknownTool",
        }
    }

    /// Whether the engine that produced this error is still usable afterwards.
    #[must_use]
    pub const fn leaves_engine_usable(self) -> bool {
        !matches!(self, Self::AnalyzerGone | Self::ProtocolFraming)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
