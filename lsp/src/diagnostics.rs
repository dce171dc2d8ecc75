//! Diagnostics sink: the latest pushed diagnostics per document URI.
//!
//! An empty publish is stored, not removed, so "the analyzer says this file
//! is clean" stays distinguishable from "nothing published yet".

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use gobridge_types::Diagnostic;
use tokio::sync::watch;

pub(crate) struct DiagnosticsSink {
    data: Mutex<HashMap<String, Vec<Diagnostic>>>,
    /// Bumped on every publish to wake waiters.
    generation: watch::Sender<u64>,
}

impl DiagnosticsSink {
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            data: Mutex::new(HashMap::new()),
            generation,
        }
    }

    pub fn publish(&self, uri: String, items: Vec<Diagnostic>) {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uri, items);
        self.generation.send_modify(|g| *g = g.wrapping_add(1));
    }

    pub fn get(&self, uri: &str) -> Option<Vec<Diagnostic>> {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uri)
            .cloned()
    }

    /// The stored diagnostics for `uri`, waiting up to `timeout` for a first
    /// publish. `None` if nothing arrived in time.
    pub async fn wait_for(&self, uri: &str, timeout: Duration) -> Option<Vec<Diagnostic>> {
        let mut rx = self.generation.subscribe();
        let expiry = tokio::time::sleep(timeout);
        tokio::pin!(expiry);
        loop {
            if let Some(items) = self.get(uri) {
                return Some(items);
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                () = &mut expiry => return None,
            }
        }
    }

    pub fn document_count(&self) -> usize {
        self.data.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
