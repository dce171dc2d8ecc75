//! Background I/O tasks for one engine.
//!
//! The writer task is the only owner of the analyzer's stdin. The reader
//! task (the dispatch core) is the only reader of its stdout: it routes
//! responses to waiters, acknowledges server requests, and feeds readiness
//! and diagnostics notifications to their trackers.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::codec::{FrameReader, FrameWriter};
use crate::correlator::{Correlator, WriterCommand};
use crate::diagnostics::DiagnosticsSink;
use crate::lifecycle::Lifecycle;
use crate::protocol::{
    self, Incoming, ProgressParams, PublishDiagnosticsParams, ShowMessageParams,
};
use crate::readiness::ReadinessTracker;

pub(crate) fn spawn_writer<W>(
    writer: W,
    mut rx: mpsc::Receiver<WriterCommand>,
    workspace: String,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut writer = FrameWriter::new(writer);
        while let Some(cmd) = rx.recv().await {
            match cmd {
                WriterCommand::Send(frame) => {
                    if let Err(e) = writer.write_frame(&frame).await {
                        tracing::warn!(workspace = %workspace, "analyzer write error: {e}");
                        break;
                    }
                }
                WriterCommand::Shutdown => break,
            }
        }
        rx.close();
        // Closing stdin is the analyzer's cue that no more input is coming.
        if let Err(e) = writer.close().await {
            tracing::debug!(workspace = %workspace, "closing analyzer stdin: {e}");
        }
    })
}

pub(crate) struct DispatchCore {
    pub workspace: String,
    pub correlator: Arc<Correlator>,
    pub readiness: Arc<ReadinessTracker>,
    pub diagnostics: Arc<DiagnosticsSink>,
    pub writer_tx: mpsc::Sender<WriterCommand>,
    pub lifecycle: Arc<Lifecycle>,
}

impl DispatchCore {
    pub fn spawn<R>(self, reader: R) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(self.run(reader))
    }

    async fn run<R: AsyncRead + Unpin>(self, reader: R) {
        let mut reader = FrameReader::new(reader);
        loop {
            match reader.read_frame().await {
                Ok(Some(frame)) => self.dispatch_frame(&frame),
                Ok(None) => {
                    self.lifecycle
                        .analyzer_lost("analyzer closed its output stream", &self.correlator);
                    break;
                }
                Err(e) => {
                    // Framing is unrecoverable: nothing after this point can be
                    // trusted to start on a frame boundary.
                    self.lifecycle.analyzer_lost(
                        &format!("analyzer stream lost framing: {e}"),
                        &self.correlator,
                    );
                    break;
                }
            }
        }
    }

    fn dispatch_frame(&self, frame: &serde_json::Value) {
        let Some(incoming) = protocol::parse_incoming(frame) else {
            tracing::trace!(workspace = %self.workspace, "ignoring unrecognised frame");
            return;
        };

        match incoming {
            Incoming::Response { id, reply } => {
                if !self.correlator.complete(id, reply) {
                    tracing::debug!(workspace = %self.workspace, id, "dropping response with no waiter");
                }
            }
            Incoming::ServerRequest { id, method, params } => {
                tracing::debug!(workspace = %self.workspace, method = %method, "acknowledging server request");
                let ack = protocol::server_request_ack(&id, &method, params.as_ref());
                // The reader never waits on the writer: a stalled analyzer
                // stdin must not stop responses from being routed.
                if let Err(e) = self.writer_tx.try_send(WriterCommand::Send(ack)) {
                    tracing::warn!(workspace = %self.workspace, method = %method, "dropping server request ack: {e}");
                }
            }
            Incoming::Notification { method, params } => {
                self.handle_notification(&method, params);
            }
        }
    }

    fn handle_notification(&self, method: &str, params: Option<serde_json::Value>) {
        let Some(params) = params else {
            tracing::trace!(workspace = %self.workspace, method, "notification without params");
            return;
        };
        match method {
            "$/progress" => {
                if let Ok(progress) = serde_json::from_value::<ProgressParams>(params) {
                    self.readiness.observe_progress(&progress);
                }
            }
            "window/showMessage" => {
                if let Ok(message) = serde_json::from_value::<ShowMessageParams>(params) {
                    tracing::debug!(workspace = %self.workspace, "analyzer message: {}", message.message);
                    self.readiness.observe_message(&message);
                }
            }
            "textDocument/publishDiagnostics" => {
                match serde_json::from_value::<PublishDiagnosticsParams>(params) {
                    Ok(published) => {
                        let items: Vec<_> = published
                            .diagnostics
                            .iter()
                            .map(protocol::WireDiagnostic::to_diagnostic)
                            .collect();
                        let count = items.len();
                        let uri = published.uri;
                        self.diagnostics.publish(uri.clone(), items);
                        tracing::debug!(
                            workspace = %self.workspace,
                            uri = %uri,
                            count,
                            tracked = self.diagnostics.document_count(),
                            "diagnostics published"
                        );
                    }
                    Err(e) => {
                        tracing::debug!(workspace = %self.workspace, "bad publishDiagnostics: {e}");
                    }
                }
            }
            _ => {
                tracing::trace!(workspace = %self.workspace, method, "ignoring notification");
            }
        }
    }
}
