//! Public configuration and call-context types.
//!
//! [`EngineConfig`] is shared by every engine the router starts; the config
//! crate builds it from the user's TOML. [`CallContext`] travels with a
//! single tool call.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

/// How the analyzer is launched.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AnalyzerCommand {
    /// Executable name or path, resolved through `PATH`. Default: `gopls`.
    #[serde(default = "default_program")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment for the child, on top of the inherited one.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_program() -> String {
    "gopls".to_string()
}

impl Default for AnalyzerCommand {
    fn default() -> Self {
        Self {
            command: default_program(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }
}

/// Where `diagnostics` results come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticsMode {
    /// Serve the most recent `publishDiagnostics` for the file.
    #[default]
    Push,
    /// Ask with `textDocument/diagnostic`.
    Pull,
}

/// Human text the analyzer uses to announce its initial package load.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReadinessPhrases {
    #[serde(default = "default_loading_phrase")]
    pub loading: String,
    #[serde(default = "default_ready_phrase")]
    pub ready: String,
}

fn default_loading_phrase() -> String {
    "Loading packages".to_string()
}

fn default_ready_phrase() -> String {
    "Finished loading packages".to_string()
}

impl Default for ReadinessPhrases {
    fn default() -> Self {
        Self {
            loading: default_loading_phrase(),
            ready: default_ready_phrase(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub analyzer: AnalyzerCommand,
    /// Default bound on a single analyzer request.
    pub request_timeout: Duration,
    /// Default bound on waiting for the initial package load.
    pub ready_timeout: Duration,
    pub initialize_timeout: Duration,
    /// How long a stopping analyzer gets between SIGTERM and SIGKILL.
    pub shutdown_grace: Duration,
    /// Push mode only: how long to wait for a first publish after opening.
    pub diagnostics_wait: Duration,
    pub diagnostics_mode: DiagnosticsMode,
    pub readiness: ReadinessPhrases,
    /// Period of the "still waiting" warning for a slow request.
    pub slow_request_log_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            analyzer: AnalyzerCommand::default(),
            request_timeout: Duration::from_secs(60),
            ready_timeout: Duration::from_secs(120),
            initialize_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(2),
            diagnostics_wait: Duration::from_secs(2),
            diagnostics_mode: DiagnosticsMode::Push,
            readiness: ReadinessPhrases::default(),
            slow_request_log_interval: Duration::from_secs(10),
        }
    }
}

/// Per-call cancellation and deadline.
///
/// `deadline` bounds both the readiness wait and the analyzer response wait;
/// when absent the engine's configured defaults apply to each.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Duration>,
}

impl CallContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
