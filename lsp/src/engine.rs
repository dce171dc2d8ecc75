//! Per-workspace engine: one analyzer, one handshake, one lifecycle.
//!
//! Construction IS initialization: [`Engine::start`] and [`Engine::connect`]
//! return only after the `initialize` handshake succeeded, with the engine in
//! `initialising`. A background task promotes it to `ready` once the analyzer
//! reports that its package load finished. Every tool operation waits for
//! that before touching the analyzer.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use gobridge_types::{EngineState, ReadinessState, WorkspaceStatus};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::correlator::{Correlator, WRITER_CHANNEL_CAPACITY, WriterCommand};
use crate::diagnostics::DiagnosticsSink;
use crate::dispatch::{self, DispatchCore};
use crate::documents::DocumentCache;
use crate::error::EngineError;
use crate::lifecycle::Lifecycle;
use crate::process::{self, AnalyzerProcess};
use crate::protocol::{self, INTERNAL_ERROR, Reshaper, normalize_path};
use crate::readiness::ReadinessTracker;
use crate::types::{CallContext, EngineConfig};

struct EngineTasks {
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
    supervisor: JoinHandle<()>,
    promoter: JoinHandle<()>,
    stderr: Option<JoinHandle<()>>,
}

impl EngineTasks {
    fn abort(&self) {
        self.writer.abort();
        self.reader.abort();
        self.supervisor.abort();
        self.promoter.abort();
        if let Some(stderr) = &self.stderr {
            stderr.abort();
        }
    }
}

pub struct Engine {
    root: PathBuf,
    name: String,
    pub(crate) config: EngineConfig,
    pub(crate) lifecycle: Arc<Lifecycle>,
    pub(crate) correlator: Arc<Correlator>,
    readiness: Arc<ReadinessTracker>,
    pub(crate) diagnostics: Arc<DiagnosticsSink>,
    documents: DocumentCache,
    pub(crate) reshaper: Reshaper,
    writer_tx: mpsc::Sender<WriterCommand>,
    initialized: AtomicBool,
    tasks: Mutex<Option<EngineTasks>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("root", &self.root)
            .field("state", &self.lifecycle.state())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Launch the configured analyzer in `root` and complete the handshake.
    pub async fn start(root: &Path, config: EngineConfig) -> Result<Arc<Self>, EngineError> {
        let root = normalize_path(root);
        tracing::info!(
            workspace = %root.display(),
            command = %config.analyzer.command,
            "starting analyzer"
        );
        let (analyzer, io) = AnalyzerProcess::start(&config.analyzer, &root)?;
        let stderr = process::drain_stderr(io.stderr, root.display().to_string());
        Self::launch(root, config, io.stdout, io.stdin, Some(analyzer), Some(stderr)).await
    }

    /// Run the engine over an already-connected analyzer transport.
    pub async fn connect<R, W>(
        root: &Path,
        config: EngineConfig,
        reader: R,
        writer: W,
    ) -> Result<Arc<Self>, EngineError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::launch(normalize_path(root), config, reader, writer, None, None).await
    }

    async fn launch<R, W>(
        root: PathBuf,
        config: EngineConfig,
        reader: R,
        writer: W,
        analyzer: Option<AnalyzerProcess>,
        stderr: Option<JoinHandle<()>>,
    ) -> Result<Arc<Self>, EngineError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let name = root.display().to_string();
        let lifecycle = Arc::new(Lifecycle::new(name.clone()));
        lifecycle.advance(EngineState::Starting);

        let (writer_tx, writer_rx) = mpsc::channel(WRITER_CHANNEL_CAPACITY);
        let correlator = Arc::new(Correlator::new(
            name.clone(),
            writer_tx.clone(),
            config.slow_request_log_interval,
        ));
        let readiness = Arc::new(ReadinessTracker::new(config.readiness.clone()));
        let diagnostics = Arc::new(DiagnosticsSink::new());

        let writer = dispatch::spawn_writer(writer, writer_rx, name.clone());
        let reader = DispatchCore {
            workspace: name.clone(),
            correlator: correlator.clone(),
            readiness: readiness.clone(),
            diagnostics: diagnostics.clone(),
            writer_tx: writer_tx.clone(),
            lifecycle: lifecycle.clone(),
        }
        .spawn(reader);
        let supervisor = tokio::spawn(supervise(
            analyzer,
            lifecycle.clone(),
            correlator.clone(),
            config.shutdown_grace,
        ));
        let promoter = tokio::spawn(promote_when_ready(
            readiness.clone(),
            lifecycle.clone(),
            name.clone(),
        ));

        let engine = Arc::new(Self {
            documents: DocumentCache::new(root.clone()),
            reshaper: Reshaper::new(&root),
            root,
            name,
            config,
            lifecycle,
            correlator,
            readiness,
            diagnostics,
            writer_tx,
            initialized: AtomicBool::new(false),
            tasks: Mutex::new(Some(EngineTasks {
                writer,
                reader,
                supervisor,
                promoter,
                stderr,
            })),
        });

        if let Err(e) = engine.initialize().await {
            tracing::warn!(workspace = %engine.name, "analyzer handshake failed: {e}");
            engine.stop().await;
            return Err(e);
        }
        Ok(engine)
    }

    async fn initialize(&self) -> Result<(), EngineError> {
        let root_uri = protocol::path_to_file_uri(&self.root)
            .map_err(|e| EngineError::gone(e.to_string()))?;
        let folder = self
            .root
            .file_name()
            .map_or_else(|| self.name.clone(), |n| n.to_string_lossy().into_owned());

        self.correlator
            .call(
                "initialize",
                Some(protocol::initialize_params(root_uri.as_str(), &folder)),
                self.config.initialize_timeout,
                &CancellationToken::new(),
            )
            .await?;
        self.correlator
            .notify(
                "initialized",
                Some(serde_json::json!({})),
                self.config.initialize_timeout,
                &CancellationToken::new(),
            )
            .await?;
        self.initialized.store(true, Ordering::Release);
        self.lifecycle.advance(EngineState::Initialising);
        tracing::info!(workspace = %self.name, "analyzer initialised");
        Ok(())
    }

    /// Stop the analyzer: polite `shutdown`/`exit`, then close stdin,
    /// terminate and reap. Every pending waiter is failed. Idempotent.
    pub async fn stop(&self) {
        let tasks = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(tasks) = tasks else {
            return;
        };
        let grace = self.config.shutdown_grace;

        if self.lifecycle.state().is_live() && self.initialized.load(Ordering::Acquire) {
            let polite = self
                .correlator
                .call("shutdown", None, grace, &CancellationToken::new())
                .await;
            match polite {
                Ok(_) => {
                    // Leave the live states first: the EOF that follows `exit`
                    // is not a loss.
                    self.lifecycle.advance(EngineState::Stopping);
                    let _ = self
                        .correlator
                        .notify("exit", None, grace, &CancellationToken::new())
                        .await;
                }
                Err(e) => tracing::debug!(workspace = %self.name, "shutdown request: {e}"),
            }
        }

        self.lifecycle.advance(EngineState::Stopping);
        self.correlator.fail_all("engine stopping");

        // An analyzer that stopped reading leaves the writer blocked; dropping
        // it closes stdin regardless.
        let writer = tasks.writer;
        let writer_abort = writer.abort_handle();
        let drained = async {
            let _ = self.writer_tx.send(WriterCommand::Shutdown).await;
            let _ = writer.await;
        };
        if tokio::time::timeout(grace, drained).await.is_err() {
            tracing::debug!(workspace = %self.name, "writer did not drain in time");
            writer_abort.abort();
        }

        self.lifecycle.begin_teardown();
        let _ = tasks.supervisor.await;

        // An in-memory peer may keep its end open; the process-backed reader
        // sees EOF once the child is reaped.
        let reader = tasks.reader;
        let reader_abort = reader.abort_handle();
        if tokio::time::timeout(grace, reader).await.is_err() {
            reader_abort.abort();
        }
        tasks.promoter.abort();
        if let Some(stderr) = tasks.stderr {
            let stderr_abort = stderr.abort_handle();
            if tokio::time::timeout(grace, stderr).await.is_err() {
                stderr_abort.abort();
            }
        }

        self.lifecycle.advance(EngineState::Stopped);
        tracing::info!(workspace = %self.name, "engine stopped");
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        self.lifecycle.state()
    }

    #[must_use]
    pub fn readiness(&self) -> ReadinessState {
        self.readiness.snapshot().state
    }

    #[must_use]
    pub fn status(&self) -> WorkspaceStatus {
        let state = self.lifecycle.state();
        let readiness = self.readiness.snapshot();
        WorkspaceStatus {
            path: self.name.clone(),
            running: state.is_live(),
            state,
            readiness: readiness.state,
            progress: readiness.progress,
            error: self.lifecycle.lost_reason(),
        }
    }

    /// Number of requests still awaiting a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.correlator.pending_len()
    }

    /// Workspace-relative paths the analyzer has been sent `didOpen` for.
    pub async fn open_documents(&self) -> Vec<String> {
        self.documents.open_paths().await
    }

    /// Resolves once the engine has left the live states.
    pub async fn closed(&self) {
        let _ = self.lifecycle.terminated().await;
    }

    fn ensure_live(&self) -> Result<(), EngineError> {
        let state = self.lifecycle.state();
        if state.is_live() {
            return Ok(());
        }
        Err(EngineError::gone(
            self.lifecycle
                .lost_reason()
                .unwrap_or_else(|| format!("engine is {}", state.label())),
        ))
    }

    /// Wait for the analyzer's package load, bounded by the call deadline.
    pub(crate) async fn await_ready(&self, ctx: &CallContext) -> Result<(), EngineError> {
        self.ensure_live()?;
        if ctx.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if !self.readiness.is_ready() {
            let wait = ctx.deadline().unwrap_or(self.config.ready_timeout);
            tokio::select! {
                ready = self.readiness.await_ready(wait, ctx.cancel_token()) => ready?,
                reason = self.lifecycle.terminated() => return Err(EngineError::gone(reason)),
            }
        }
        self.ensure_live()
    }

    /// Validate `file`, wait for readiness, then make sure it is open.
    pub(crate) async fn prepare_document(
        &self,
        file: &str,
        ctx: &CallContext,
    ) -> Result<String, EngineError> {
        self.documents.check(file)?;
        self.await_ready(ctx).await?;
        let deadline = ctx.deadline().unwrap_or(self.config.request_timeout);
        tokio::select! {
            uri = self.documents.ensure_open(file, &self.correlator, deadline, ctx.cancel_token()) => uri,
            () = ctx.cancel_token().cancelled() => Err(EngineError::Cancelled),
        }
    }

    pub(crate) async fn request<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: serde_json::Value,
        ctx: &CallContext,
    ) -> Result<T, EngineError> {
        let deadline = ctx.deadline().unwrap_or(self.config.request_timeout);
        let value = self
            .correlator
            .call(method, Some(params), deadline, ctx.cancel_token())
            .await?;
        serde_json::from_value(value).map_err(|e| EngineError::AnalyzerError {
            method: method.to_string(),
            code: INTERNAL_ERROR,
            message: format!("unexpected result shape: {e}"),
            data: None,
        })
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let tasks = self
            .tasks
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tasks) = tasks {
            // Aborting the supervisor drops the child, which kills it.
            tasks.abort();
        }
    }
}

/// Own the child: reap it if it exits, terminate it on teardown.
async fn supervise(
    analyzer: Option<AnalyzerProcess>,
    lifecycle: Arc<Lifecycle>,
    correlator: Arc<Correlator>,
    grace: Duration,
) {
    let teardown = lifecycle.teardown_token();
    if let Some(mut analyzer) = analyzer {
        let exited = tokio::select! {
            status = analyzer.wait() => Some(status),
            () = teardown.cancelled() => None,
        };
        match exited {
            Some(Ok(status)) => {
                lifecycle.analyzer_lost(&format!("analyzer exited ({status})"), &correlator);
            }
            Some(Err(e)) => {
                lifecycle.analyzer_lost(&format!("waiting for analyzer: {e}"), &correlator);
            }
            None => {
                let status = analyzer.stop(grace).await;
                tracing::debug!(?status, "analyzer reaped");
            }
        }
    } else {
        teardown.cancelled().await;
    }
    lifecycle.advance(EngineState::Stopped);
}

async fn promote_when_ready(
    readiness: Arc<ReadinessTracker>,
    lifecycle: Arc<Lifecycle>,
    workspace: String,
) {
    let mut rx = readiness.subscribe();
    let ready = rx
        .wait_for(|snapshot| snapshot.state == ReadinessState::Ready)
        .await
        .is_ok();
    if ready && lifecycle.advance(EngineState::Ready) {
        tracing::info!(workspace = %workspace, "workspace ready");
    }
}
