use serde::{Deserialize, Serialize};

/// Lifecycle of a per-workspace engine.
///
/// Transitions only move forward: `created → starting → initialising → ready →
/// stopping → stopped`. `stopping` may be entered from any live state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Created,
    Starting,
    Initialising,
    Ready,
    Stopping,
    Stopped,
}

impl EngineState {
    /// Whether the engine still owns a live analyzer and accepts calls.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::Starting | Self::Initialising | Self::Ready)
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopping | Self::Stopped)
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Initialising => "initialising",
            Self::Ready => "ready",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }
}

/// Whether the analyzer has finished its initial package load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessState {
    #[default]
    Unknown,
    Loading,
    Ready,
}

/// One row of `list_workspaces`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceStatus {
    pub path: String,
    pub running: bool,
    pub state: EngineState,
    pub readiness: ReadinessState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    /// Why the engine never started, when it didn't.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
