//! Request/response correlation.
//!
//! Every outbound request gets a fresh id and a one-shot waiter in the
//! pending table. The dispatch core completes waiters as responses arrive;
//! a waiter whose caller gave up (deadline, cancellation, dropped future)
//! removes its own entry, so a late response finds nothing and is dropped.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::codec::FrameError;
use crate::error::EngineError;
use crate::protocol::{Notification, Reply, Request};

pub(crate) const WRITER_CHANNEL_CAPACITY: usize = 64;

/// Commands for the single writer task that owns the analyzer's stdin.
#[derive(Debug)]
pub(crate) enum WriterCommand {
    Send(serde_json::Value),
    Shutdown,
}

/// How a pending request ended, as seen by its waiter.
#[derive(Debug)]
pub(crate) enum Outcome {
    Reply(Reply),
    Gone(String),
}

#[derive(Default)]
struct PendingTable {
    next_id: u64,
    waiters: HashMap<u64, oneshot::Sender<Outcome>>,
    /// Set once the analyzer is gone; no new waiter may be registered after.
    closed: Option<String>,
}

pub(crate) struct Correlator {
    workspace: String,
    pending: Mutex<PendingTable>,
    writer_tx: mpsc::Sender<WriterCommand>,
    /// Cancelled by [`Correlator::fail_all`]; wakes notifications still
    /// waiting for writer room.
    gone: CancellationToken,
    slow_log_interval: Duration,
}

/// Removes a waiter on every exit path of [`Correlator::call`].
struct PendingGuard<'a> {
    correlator: &'a Correlator,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.correlator.table().waiters.remove(&self.id);
    }
}

impl Correlator {
    pub fn new(
        workspace: String,
        writer_tx: mpsc::Sender<WriterCommand>,
        slow_log_interval: Duration,
    ) -> Self {
        Self {
            workspace,
            pending: Mutex::new(PendingTable {
                next_id: 1,
                ..PendingTable::default()
            }),
            writer_tx,
            gone: CancellationToken::new(),
            slow_log_interval,
        }
    }

    fn table(&self) -> MutexGuard<'_, PendingTable> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Issue a request and wait for its reply, the deadline, or cancellation,
    /// whichever comes first. The deadline also covers waiting for room in the
    /// writer queue, so an analyzer that stops reading cannot park the caller.
    pub async fn call(
        &self,
        method: &'static str,
        params: Option<serde_json::Value>,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let (tx, mut rx) = oneshot::channel();
        let id = {
            let mut table = self.table();
            if let Some(reason) = &table.closed {
                return Err(EngineError::gone(reason.clone()));
            }
            let id = table.next_id;
            table.next_id += 1;
            table.waiters.insert(id, tx);
            id
        };
        let _guard = PendingGuard {
            correlator: self,
            id,
        };

        let mut unsent = Some(
            serde_json::to_value(Request::new(id, method, params)).map_err(FrameError::Serialize)?,
        );

        let started = Instant::now();
        let expiry = tokio::time::sleep(deadline);
        tokio::pin!(expiry);
        let mut slow = tokio::time::interval_at(
            started + self.slow_log_interval,
            self.slow_log_interval,
        );

        loop {
            tokio::select! {
                permit = self.writer_tx.reserve(), if unsent.is_some() => {
                    let permit = permit.map_err(|_| EngineError::gone("analyzer writer closed"))?;
                    if let Some(frame) = unsent.take() {
                        // No await between reserve and send: a dropped caller
                        // never leaves a half-sent message behind.
                        permit.send(WriterCommand::Send(frame));
                    }
                    tracing::trace!(workspace = %self.workspace, method, id, "request sent");
                }
                outcome = &mut rx => {
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    tracing::debug!(workspace = %self.workspace, method, id, elapsed_ms, "response received");
                    return match outcome {
                        Ok(Outcome::Reply(Reply::Result(value))) => Ok(value),
                        Ok(Outcome::Reply(Reply::Error(error))) => Err(EngineError::AnalyzerError {
                            method: method.to_string(),
                            code: error.code,
                            message: error.message,
                            data: error.data,
                        }),
                        Ok(Outcome::Gone(reason)) => Err(EngineError::gone(reason)),
                        Err(_) => Err(EngineError::gone("response channel dropped")),
                    };
                }
                () = &mut expiry => {
                    tracing::warn!(
                        workspace = %self.workspace,
                        method,
                        id,
                        sent = unsent.is_none(),
                        elapsed_ms = deadline.as_millis() as u64,
                        "request deadline exceeded"
                    );
                    return Err(EngineError::Deadline {
                        method: method.to_string(),
                        waited: deadline,
                    });
                }
                () = cancel.cancelled() => {
                    tracing::debug!(workspace = %self.workspace, method, id, "request cancelled");
                    return Err(EngineError::Cancelled);
                }
                _ = slow.tick() => {
                    tracing::warn!(
                        workspace = %self.workspace,
                        method,
                        id,
                        sent = unsent.is_none(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "still waiting for analyzer response"
                    );
                }
            }
        }
    }

    /// Send a notification once the writer queue has room, bounded like a
    /// request by `deadline`, `cancel` and the analyzer going away.
    pub async fn notify(
        &self,
        method: &'static str,
        params: Option<serde_json::Value>,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        if let Some(err) = self.closed_error() {
            return Err(err);
        }
        let frame =
            serde_json::to_value(Notification::new(method, params)).map_err(FrameError::Serialize)?;
        tokio::select! {
            permit = self.writer_tx.reserve() => {
                let permit = permit.map_err(|_| EngineError::gone("analyzer writer closed"))?;
                permit.send(WriterCommand::Send(frame));
                Ok(())
            }
            () = tokio::time::sleep(deadline) => {
                tracing::warn!(workspace = %self.workspace, method, "analyzer input stalled");
                Err(EngineError::Deadline {
                    method: method.to_string(),
                    waited: deadline,
                })
            }
            () = cancel.cancelled() => Err(EngineError::Cancelled),
            () = self.gone.cancelled() => Err(self
                .closed_error()
                .unwrap_or_else(|| EngineError::gone("analyzer gone"))),
        }
    }

    fn closed_error(&self) -> Option<EngineError> {
        self.table().closed.as_ref().map(|reason| EngineError::gone(reason.clone()))
    }

    /// Deliver a response. Returns `false` when no one is waiting for `id`.
    pub fn complete(&self, id: u64, reply: Reply) -> bool {
        let Some(tx) = self.table().waiters.remove(&id) else {
            return false;
        };
        // The receiver may have been dropped between removal and send.
        tx.send(Outcome::Reply(reply)).is_ok()
    }

    /// Fail every waiter and refuse new requests from now on.
    pub fn fail_all(&self, reason: &str) {
        let waiters: Vec<_> = {
            let mut table = self.table();
            if table.closed.is_none() {
                table.closed = Some(reason.to_string());
            }
            table.waiters.drain().collect()
        };
        self.gone.cancel();
        if !waiters.is_empty() {
            tracing::debug!(
                workspace = %self.workspace,
                count = waiters.len(),
                "failing pending requests: {reason}"
            );
        }
        for (_, tx) in waiters {
            let _ = tx.send(Outcome::Gone(reason.to_string()));
        }
    }

    pub fn pending_len(&self) -> usize {
        self.table().waiters.len()
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.table().closed.is_some()
    }
}
