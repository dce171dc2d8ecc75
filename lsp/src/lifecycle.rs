//! Engine lifecycle state shared by the engine and its background tasks.

use std::sync::{Mutex, PoisonError};

use gobridge_types::EngineState;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::correlator::Correlator;

pub(crate) struct Lifecycle {
    workspace: String,
    state: watch::Sender<EngineState>,
    /// Cancelled once the analyzer must be terminated and reaped.
    teardown: CancellationToken,
    /// Why the analyzer went away, when it wasn't asked to.
    lost_reason: Mutex<Option<String>>,
}

impl Lifecycle {
    pub fn new(workspace: String) -> Self {
        let (state, _) = watch::channel(EngineState::Created);
        Self {
            workspace,
            state,
            teardown: CancellationToken::new(),
            lost_reason: Mutex::new(None),
        }
    }

    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// Move to `to` if that is forward. `Ready` is only reachable from a live
    /// state. Returns whether the state changed.
    pub fn advance(&self, to: EngineState) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if to <= *state || (to == EngineState::Ready && !state.is_live()) {
                return false;
            }
            *state = to;
            true
        });
        if changed {
            tracing::debug!(workspace = %self.workspace, state = to.label(), "engine state changed");
        }
        changed
    }

    pub fn teardown_token(&self) -> CancellationToken {
        self.teardown.clone()
    }

    pub fn begin_teardown(&self) {
        self.teardown.cancel();
    }

    pub fn lost_reason(&self) -> Option<String> {
        self.lost_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The analyzer went away on its own (exit, EOF, broken framing): fail
    /// every waiter and start teardown. Idempotent.
    pub fn analyzer_lost(&self, reason: &str, correlator: &Correlator) {
        let first = {
            let mut lost = self
                .lost_reason
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if lost.is_none() && self.state().is_live() {
                *lost = Some(reason.to_string());
                true
            } else {
                false
            }
        };
        if first {
            tracing::warn!(workspace = %self.workspace, "analyzer lost: {reason}");
        } else {
            tracing::debug!(workspace = %self.workspace, "analyzer stream ended: {reason}");
        }
        // State first: a woken waiter must already observe a dead engine.
        self.advance(EngineState::Stopping);
        correlator.fail_all(reason);
        self.teardown.cancel();
    }

    /// Resolves once the engine has left the live states, with the reason.
    pub async fn terminated(&self) -> String {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| state.is_terminal()).await;
        self.lost_reason()
            .unwrap_or_else(|| "engine stopping".to_string())
    }
}
