//! gobridge - serve Go navigation tools over standard input/output.
//!
//! ```text
//! main() -> BridgeConfig::load_from -> Router::start (one engine per workspace)
//!        -> stdio::serve(stdin, stdout) until end of input or Ctrl-C
//!        -> Router::stop_all
//! ```
//!
//! Standard output carries the tool protocol only; logs go to
//! `~/.gobridge/logs/gobridge.log` (or standard error when no log file can
//! be opened).

mod stdio;

use anyhow::{Context, Result};
use std::{
    env,
    fs::{self, OpenOptions},
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use gobridge_config::{BridgeConfig, config_path};
use gobridge_lsp::Router;
use gobridge_tools::ToolRegistry;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // Never stdout: it carries the protocol.
    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(false).with_writer(std::io::stderr))
        .with(env_filter)
        .init();
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_log_file() -> (Option<(PathBuf, std::fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.gobridge/logs/gobridge.log
    if let Some(config_path) = config_path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("gobridge.log"));
    }

    // Fallback: ./.gobridge/logs/gobridge.log
    candidates.push(PathBuf::from(".gobridge").join("logs").join("gobridge.log"));

    candidates
}

fn resolve_config_path() -> Result<PathBuf> {
    if let Some(arg) = env::args_os().nth(1) {
        return Ok(PathBuf::from(arg));
    }
    BridgeConfig::path().context("cannot locate home directory; pass a config file path")
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let path = resolve_config_path()?;
    let config = BridgeConfig::load_from(&path)
        .with_context(|| format!("loading {}", path.display()))?;
    tracing::info!(
        config = %path.display(),
        workspaces = config.workspaces.len(),
        "starting gobridge"
    );

    let workspaces = config.workspaces.clone();
    let engine_config = config.into_engine_config();
    let registry = Arc::new(ToolRegistry::with_builtins()?);
    let router = Arc::new(Router::start(&workspaces, &engine_config).await);

    tokio::select! {
        result = stdio::serve(tokio::io::stdin(), tokio::io::stdout(), registry, Arc::clone(&router)) => {
            match result {
                Ok(()) => tracing::info!("input closed"),
                Err(e) => tracing::error!("stdio transport failed: {e}"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
        }
    }

    router.stop_all().await;
    Ok(())
}
