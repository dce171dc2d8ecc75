//! Per-workspace engines supervising a Go analyzer over framed JSON-RPC.
//!
//! A [`Router`] owns one [`Engine`] per configured workspace. Each engine
//! launches the analyzer (or connects to an in-memory transport), completes
//! the `initialize` handshake, tracks package-load readiness, and serves the
//! navigation and diagnostics operations the tool layer exposes.

pub mod codec;
pub mod types;

mod correlator;
mod diagnostics;
mod dispatch;
mod documents;
mod engine;
mod error;
mod lifecycle;
mod operations;
mod process;
mod protocol;
mod readiness;
mod router;

pub use engine::Engine;
pub use error::EngineError;
pub use protocol::normalize_path;
pub use router::Router;
pub use types::{AnalyzerCommand, CallContext, DiagnosticsMode, EngineConfig, ReadinessPhrases};
