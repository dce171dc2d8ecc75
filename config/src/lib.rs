//! `~/.gobridge/config.toml` loading.
//!
//! Every key except `workspaces` is optional. [`BridgeConfig::into_engine_config`]
//! fills the gaps from [`EngineConfig::default`].

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use gobridge_lsp::{AnalyzerCommand, DiagnosticsMode, EngineConfig, ReadinessPhrases, normalize_path};
use serde::Deserialize;

/// Overrides the default config file location.
pub const CONFIG_ENV: &str = "GOBRIDGE_CONFIG";
/// Replaces the file's workspace list (platform path-list syntax).
pub const WORKSPACES_ENV: &str = "GOBRIDGE_WORKSPACES";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("no workspaces configured in {}", path.display())]
    NoWorkspaces { path: PathBuf },
    #[error("workspace path must be absolute: {}", workspace.display())]
    RelativeWorkspace { path: PathBuf, workspace: PathBuf },
}

impl ConfigError {
    /// The config file the error refers to.
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. }
            | ConfigError::Parse { path, .. }
            | ConfigError::NoWorkspaces { path }
            | ConfigError::RelativeWorkspace { path, .. } => path,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    #[serde(default)]
    pub workspaces: Vec<PathBuf>,
    #[serde(default)]
    pub analyzer: AnalyzerCommand,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutsConfig {
    pub request_secs: Option<u64>,
    pub ready_secs: Option<u64>,
    pub initialize_secs: Option<u64>,
    pub shutdown_secs: Option<u64>,
    pub diagnostics_wait_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiagnosticsConfig {
    #[serde(default)]
    pub mode: DiagnosticsMode,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReadinessConfig {
    pub loading_phrase: Option<String>,
    pub ready_phrase: Option<String>,
}

pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".gobridge").join("config.toml"))
}

impl BridgeConfig {
    /// `GOBRIDGE_CONFIG` if set, else `~/.gobridge/config.toml`.
    #[must_use]
    pub fn path() -> Option<PathBuf> {
        std::env::var_os(CONFIG_ENV)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .or_else(config_path)
    }

    /// Load and validate `path`, applying `GOBRIDGE_WORKSPACES`.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };
        Self::parse(path, &content, std::env::var_os(WORKSPACES_ENV))
    }

    fn parse(
        path: &Path,
        content: &str,
        workspaces_override: Option<OsString>,
    ) -> Result<Self, ConfigError> {
        let mut config: BridgeConfig = match toml::from_str(content) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                return Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        if let Some(list) = workspaces_override.filter(|list| !list.is_empty()) {
            config.workspaces = std::env::split_paths(&list).collect();
            tracing::info!(count = config.workspaces.len(), "workspaces taken from {WORKSPACES_ENV}");
        }

        config.workspaces = dedupe_workspaces(path, &config.workspaces)?;
        if config.workspaces.is_empty() {
            return Err(ConfigError::NoWorkspaces {
                path: path.to_path_buf(),
            });
        }
        Ok(config)
    }

    #[must_use]
    pub fn into_engine_config(self) -> EngineConfig {
        let defaults = EngineConfig::default();
        let secs = |value: Option<u64>, fallback: Duration| value.map_or(fallback, Duration::from_secs);
        let phrases = ReadinessPhrases::default();
        EngineConfig {
            analyzer: self.analyzer,
            request_timeout: secs(self.timeouts.request_secs, defaults.request_timeout),
            ready_timeout: secs(self.timeouts.ready_secs, defaults.ready_timeout),
            initialize_timeout: secs(self.timeouts.initialize_secs, defaults.initialize_timeout),
            shutdown_grace: secs(self.timeouts.shutdown_secs, defaults.shutdown_grace),
            diagnostics_wait: self
                .timeouts
                .diagnostics_wait_ms
                .map_or(defaults.diagnostics_wait, Duration::from_millis),
            diagnostics_mode: self.diagnostics.mode,
            readiness: ReadinessPhrases {
                loading: self.readiness.loading_phrase.unwrap_or(phrases.loading),
                ready: self.readiness.ready_phrase.unwrap_or(phrases.ready),
            },
            slow_request_log_interval: defaults.slow_request_log_interval,
        }
    }
}

/// Reject relative roots, normalise the rest and drop repeats.
fn dedupe_workspaces(path: &Path, workspaces: &[PathBuf]) -> Result<Vec<PathBuf>, ConfigError> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(workspaces.len());
    for workspace in workspaces {
        if !workspace.is_absolute() {
            return Err(ConfigError::RelativeWorkspace {
                path: path.to_path_buf(),
                workspace: workspace.clone(),
            });
        }
        let normalized = normalize_path(workspace);
        if seen.insert(normalized.clone()) {
            out.push(normalized);
        } else {
            tracing::warn!(workspace = %normalized.display(), "duplicate workspace in config ignored");
        }
    }
    Ok(out)
}
