//! Readiness tracking.
//!
//! The analyzer answers `initialize` long before it has loaded the module
//! graph, and queries issued in between return empty or partial results.
//! The tracker watches `$/progress` and `window/showMessage` for the
//! analyzer's package-loading phrases and moves `unknown → loading → ready`.
//! Once ready, it stays ready.

use std::time::Duration;

use gobridge_types::ReadinessState;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::protocol::{ProgressParams, ShowMessageParams};
use crate::types::ReadinessPhrases;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ReadinessSnapshot {
    pub state: ReadinessState,
    pub progress: Option<String>,
}

pub(crate) struct ReadinessTracker {
    phrases: ReadinessPhrases,
    tx: watch::Sender<ReadinessSnapshot>,
}

impl ReadinessTracker {
    pub fn new(phrases: ReadinessPhrases) -> Self {
        let (tx, _) = watch::channel(ReadinessSnapshot::default());
        Self { phrases, tx }
    }

    pub fn snapshot(&self) -> ReadinessSnapshot {
        self.tx.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.tx.borrow().state == ReadinessState::Ready
    }

    pub fn subscribe(&self) -> watch::Receiver<ReadinessSnapshot> {
        self.tx.subscribe()
    }

    pub fn observe_progress(&self, params: &ProgressParams) {
        let value = &params.value;
        let text = [value.title.as_deref(), value.message.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(": ");
        match value.kind.as_str() {
            "begin" | "report" if text.contains(&self.phrases.loading) => {
                self.mark_loading(&text);
            }
            "end" if text.contains(&self.phrases.ready) => self.mark_ready(),
            _ => {}
        }
    }

    pub fn observe_message(&self, params: &ShowMessageParams) {
        if params.message.contains(&self.phrases.ready) {
            self.mark_ready();
        }
    }

    fn mark_loading(&self, progress: &str) {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.state == ReadinessState::Ready {
                return false;
            }
            snapshot.state = ReadinessState::Loading;
            snapshot.progress = Some(progress.to_string());
            true
        });
    }

    pub fn mark_ready(&self) {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.state == ReadinessState::Ready {
                return false;
            }
            snapshot.state = ReadinessState::Ready;
            snapshot.progress = None;
            true
        });
    }

    /// Wait until ready, at most `timeout`.
    pub async fn await_ready(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let mut rx = self.tx.subscribe();
        tokio::select! {
            ready = rx.wait_for(|s| s.state == ReadinessState::Ready) => ready
                .map(|_| ())
                .map_err(|_| EngineError::gone("readiness tracker dropped")),
            () = tokio::time::sleep(timeout) => Err(EngineError::NotReady {
                waited: timeout,
                progress: self.snapshot().progress,
            }),
            () = cancel.cancelled() => Err(EngineError::Cancelled),
        }
    }
}
