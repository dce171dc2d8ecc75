//! Analyzer child process: spawn in the workspace root, terminate, reap.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::error::EngineError;
use crate::types::AnalyzerCommand;

/// The three piped streams of a freshly started analyzer.
#[derive(Debug)]
pub(crate) struct AnalyzerIo {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

#[derive(Debug)]
pub struct AnalyzerProcess {
    child: Child,
    program: String,
}

impl AnalyzerProcess {
    /// Spawn the analyzer with `root` as its working directory.
    pub(crate) fn start(
        command: &AnalyzerCommand,
        root: &Path,
    ) -> Result<(Self, AnalyzerIo), EngineError> {
        let resolved = which::which(&command.command).map_err(|e| {
            EngineError::gone(format!("{} not found in PATH: {e}", command.command))
        })?;

        let mut child = Command::new(&resolved)
            .args(&command.args)
            .envs(&command.env)
            .current_dir(root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::gone(format!("spawning {}: {e}", resolved.display())))?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(EngineError::gone("analyzer started without piped stdio"));
        };

        tracing::info!(
            workspace = %root.display(),
            program = %resolved.display(),
            pid = child.id(),
            "analyzer started"
        );

        Ok((
            Self {
                child,
                program: command.command.clone(),
            },
            AnalyzerIo {
                stdin,
                stdout,
                stderr,
            },
        ))
    }

    #[cfg(test)]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the child to exit on its own.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Ask the child to terminate, escalating to a kill after `grace`, and
    /// reap it. Stdin is closed by the writer before this runs.
    pub async fn stop(mut self, grace: Duration) -> Option<ExitStatus> {
        self.terminate();
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                tracing::warn!(program = %self.program, "waiting for analyzer: {e}");
                None
            }
            Err(_) => {
                tracing::warn!(
                    program = %self.program,
                    grace_ms = grace.as_millis() as u64,
                    "analyzer ignored SIGTERM, killing"
                );
                if let Err(e) = self.child.kill().await {
                    tracing::warn!(program = %self.program, "killing analyzer: {e}");
                    return None;
                }
                self.child.try_wait().ok().flatten()
            }
        }
    }

    #[cfg(unix)]
    fn terminate(&mut self) {
        if let Some(pid) = self.child.id() {
            // SAFETY: signalling a pid we spawned and have not yet reaped.
            unsafe {
                if libc::kill(pid as libc::pid_t, libc::SIGTERM) == -1 {
                    let _ = self.child.start_kill();
                }
            }
        }
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) {
        let _ = self.child.start_kill();
    }
}

/// Forward the analyzer's stderr to the log, line by line.
pub(crate) fn drain_stderr(stderr: ChildStderr, workspace: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => tracing::debug!(workspace = %workspace, "analyzer stderr: {line}"),
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(workspace = %workspace, "analyzer stderr closed: {e}");
                    break;
                }
            }
        }
    })
}
