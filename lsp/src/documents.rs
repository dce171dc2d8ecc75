//! Document cache: which files the analyzer has been told about.
//!
//! A file is opened at most once per engine lifetime. The cache lock is held
//! across the disk read and the `didOpen` hand-off, so concurrent calls on
//! the same file send exactly one `didOpen` and the second caller never
//! races ahead of the first.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::correlator::Correlator;
use crate::error::EngineError;
use crate::protocol::{self, normalize_path};

/// What the analyzer was told when a document was opened.
#[derive(Debug, Clone)]
pub(crate) struct OpenDocument {
    pub path: PathBuf,
    pub language: &'static str,
    pub version: i32,
}

pub(crate) struct DocumentCache {
    root: PathBuf,
    /// Keyed by document URI.
    open: Mutex<HashMap<String, OpenDocument>>,
}

/// Language id for a Go source or module file.
pub(crate) fn language_id(path: &Path) -> Option<&'static str> {
    match path.file_name().and_then(|n| n.to_str()) {
        Some("go.mod") => return Some("go.mod"),
        Some("go.sum") => return Some("go.sum"),
        Some("go.work") => return Some("go.work"),
        _ => {}
    }
    match path.extension().and_then(|e| e.to_str()) {
        Some("go") => Some("go"),
        _ => None,
    }
}

impl DocumentCache {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a workspace-relative (or absolute) path to a confined absolute
    /// path and its file URI.
    pub fn resolve(&self, file: &str) -> Result<(PathBuf, String), EngineError> {
        let path = normalize_path(&self.root.join(file));
        if !path.starts_with(&self.root) {
            return Err(EngineError::UnsupportedFile {
                path,
                reason: "outside the workspace".to_string(),
            });
        }
        let uri = protocol::path_to_file_uri(&path).map_err(|e| EngineError::UnsupportedFile {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        Ok((path, uri.to_string()))
    }

    /// Resolve `file` and reject anything the analyzer cannot open.
    pub fn check(&self, file: &str) -> Result<(PathBuf, String, &'static str), EngineError> {
        let (path, uri) = self.resolve(file)?;
        let Some(language) = language_id(&path) else {
            return Err(EngineError::UnsupportedFile {
                path,
                reason: "not a Go source or module file".to_string(),
            });
        };
        Ok((path, uri, language))
    }

    /// Make sure the analyzer has `file` open, sending `didOpen` on first use.
    /// Returns the document URI. `deadline` and `cancel` bound the hand-off to
    /// the writer; a document whose `didOpen` never left is not recorded.
    pub async fn ensure_open(
        &self,
        file: &str,
        correlator: &Correlator,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, EngineError> {
        let (path, uri, language) = self.check(file)?;

        let mut open = self.open.lock().await;
        if let Some(doc) = open.get(&uri) {
            tracing::trace!(uri = %uri, language = doc.language, version = doc.version, "document already open");
            return Ok(uri);
        }

        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| EngineError::FileUnreadable {
                path: path.clone(),
                source,
            })?;

        let version = 1;
        correlator
            .notify(
                "textDocument/didOpen",
                Some(protocol::did_open_params(&uri, language, version, &text)),
                deadline,
                cancel,
            )
            .await?;
        tracing::debug!(path = %path.display(), language, "opened document");
        open.insert(
            uri.clone(),
            OpenDocument {
                path,
                language,
                version,
            },
        );
        Ok(uri)
    }

    /// The record for an open document, if any.
    #[cfg(test)]
    pub async fn get(&self, uri: &str) -> Option<OpenDocument> {
        self.open.lock().await.get(uri).cloned()
    }

    /// Workspace-relative paths of every open document, sorted.
    pub async fn open_paths(&self) -> Vec<String> {
        let open = self.open.lock().await;
        let mut paths: Vec<String> = open
            .values()
            .map(|doc| {
                doc.path
                    .strip_prefix(&self.root)
                    .unwrap_or(&doc.path)
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        paths.sort();
        paths
    }
}
