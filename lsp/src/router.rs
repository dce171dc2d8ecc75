//! Workspace router: the public entry point for tool calls.
//!
//! Construction IS initialization: [`Router::start`] launches one engine per
//! configured workspace, concurrently. A workspace whose analyzer fails to
//! start is kept in the table with its error so `list` can report it; the
//! rest keep working.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::future::join_all;
use gobridge_types::{EngineState, ReadinessState, WorkspaceStatus};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::protocol::normalize_path;
use crate::types::EngineConfig;

enum Slot {
    Running(Arc<Engine>),
    Failed(String),
}

struct Entry {
    path: PathBuf,
    slot: Slot,
}

impl Entry {
    fn name(&self) -> String {
        self.path.display().to_string()
    }
}

/// Routes calls by workspace path. The set of workspaces is fixed for the
/// router's lifetime.
pub struct Router {
    entries: Vec<Entry>,
}

/// Normalise and de-duplicate workspace roots, keeping first-seen order.
fn unique_roots<'a>(workspaces: impl IntoIterator<Item = &'a Path>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut roots = Vec::new();
    for workspace in workspaces {
        let root = normalize_path(workspace);
        if seen.insert(root.clone()) {
            roots.push(root);
        } else {
            tracing::warn!(workspace = %root.display(), "duplicate workspace ignored");
        }
    }
    roots
}

impl Router {
    /// Start an engine for every workspace.
    pub async fn start(workspaces: &[PathBuf], config: &EngineConfig) -> Self {
        let roots = unique_roots(workspaces.iter().map(PathBuf::as_path));
        let started = join_all(
            roots
                .iter()
                .map(|root| Engine::start(root, config.clone())),
        )
        .await;

        let entries = roots
            .into_iter()
            .zip(started)
            .map(|(path, result)| {
                let slot = match result {
                    Ok(engine) => Slot::Running(engine),
                    Err(e) => {
                        tracing::warn!(workspace = %path.display(), "failed to start engine: {e}");
                        Slot::Failed(e.to_string())
                    }
                };
                Entry { path, slot }
            })
            .collect();
        Self { entries }
    }

    /// Build a router over engines that are already running.
    pub fn from_engines(engines: impl IntoIterator<Item = Arc<Engine>>) -> Self {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for engine in engines {
            let path = engine.root().to_path_buf();
            if seen.insert(path.clone()) {
                entries.push(Entry {
                    path,
                    slot: Slot::Running(engine),
                });
            } else {
                tracing::warn!(workspace = %path.display(), "duplicate workspace ignored");
            }
        }
        Self { entries }
    }

    /// Configured workspace paths, in configuration order.
    #[must_use]
    pub fn workspaces(&self) -> Vec<String> {
        self.entries.iter().map(Entry::name).collect()
    }

    /// The engine serving `workspace`.
    pub fn route(&self, workspace: &str) -> Result<Arc<Engine>, EngineError> {
        let key = normalize_path(Path::new(workspace));
        let Some(entry) = self.entries.iter().find(|entry| entry.path == key) else {
            return Err(EngineError::UnknownWorkspace {
                requested: workspace.to_string(),
                available: self.workspaces(),
            });
        };
        match &entry.slot {
            Slot::Running(engine) => Ok(engine.clone()),
            Slot::Failed(reason) => Err(EngineError::gone(format!(
                "analyzer failed to start: {reason}"
            ))),
        }
    }

    /// Status of every configured workspace, including ones that failed to start.
    #[must_use]
    pub fn list(&self) -> Vec<WorkspaceStatus> {
        self.entries
            .iter()
            .map(|entry| match &entry.slot {
                Slot::Running(engine) => engine.status(),
                Slot::Failed(reason) => WorkspaceStatus {
                    path: entry.name(),
                    running: false,
                    state: EngineState::Stopped,
                    readiness: ReadinessState::Unknown,
                    progress: None,
                    error: Some(reason.clone()),
                },
            })
            .collect()
    }

    /// Stop every engine concurrently.
    pub async fn stop_all(&self) {
        let engines = self.entries.iter().filter_map(|entry| match &entry.slot {
            Slot::Running(engine) => Some(engine.clone()),
            Slot::Failed(_) => None,
        });
        join_all(engines.map(|engine| async move { engine.stop().await })).await;
        tracing::info!(count = self.entries.len(), "all engines stopped");
    }
}
