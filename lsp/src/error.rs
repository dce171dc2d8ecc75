//! Engine error taxonomy.
//!
//! Every failure an engine operation can report maps onto exactly one
//! [`ErrorKind`], which is what callers above the router branch on.

use std::path::PathBuf;
use std::time::Duration;

use gobridge_types::ErrorKind;
use thiserror::Error;

use crate::codec::FrameError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown workspace {requested}; configured workspaces: {}", available.join(", "))]
    UnknownWorkspace {
        requested: String,
        available: Vec<String>,
    },
    #[error("workspace not ready after {}ms{}", waited.as_millis(), progress_suffix(progress.as_deref()))]
    NotReady {
        waited: Duration,
        progress: Option<String>,
    },
    #[error("{method} timed out after {}ms", waited.as_millis())]
    Deadline { method: String, waited: Duration },
    #[error("analyzer error {code} on {method}: {message}")]
    AnalyzerError {
        method: String,
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },
    #[error("analyzer unavailable: {reason}")]
    AnalyzerGone { reason: String },
    #[error("analyzer stream lost framing: {0}")]
    ProtocolFraming(#[from] FrameError),
    #[error("unsupported file {}: {reason}", path.display())]
    UnsupportedFile { path: PathBuf, reason: String },
    #[error("cannot read {}: {source}", path.display())]
    FileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("call cancelled")]
    Cancelled,
}

fn progress_suffix(progress: Option<&str>) -> String {
    progress.map_or_else(String::new, |p| format!(" ({p})"))
}

impl EngineError {
    pub(crate) fn gone(reason: impl Into<String>) -> Self {
        Self::AnalyzerGone {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownWorkspace { .. } => ErrorKind::UnknownWorkspace,
            Self::NotReady { .. } => ErrorKind::NotReady,
            Self::Deadline { .. } => ErrorKind::Deadline,
            Self::AnalyzerError { .. } => ErrorKind::AnalyzerError,
            Self::AnalyzerGone { .. } => ErrorKind::AnalyzerGone,
            Self::ProtocolFraming(_) => ErrorKind::ProtocolFraming,
            Self::UnsupportedFile { .. } => ErrorKind::UnsupportedFile,
            Self::FileUnreadable { .. } => ErrorKind::FileUnreadable,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Structured detail for the error body, beyond `kind` and `message`.
    #[must_use]
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::UnknownWorkspace { available, .. } => {
                Some(serde_json::json!({ "available": available }))
            }
            Self::AnalyzerError { code, data, .. } => {
                let mut details = serde_json::json!({ "code": code });
                if let Some(data) = data {
                    details["data"] = data.clone();
                }
                Some(details)
            }
            Self::NotReady {
                progress: Some(progress),
                ..
            } => Some(serde_json::json!({ "progress": progress })),
            _ => None,
        }
    }
}
