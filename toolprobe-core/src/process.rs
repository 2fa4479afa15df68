//! Lifecycle management for the server process under test.

use std::collections::VecDeque;
use std::fmt;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::{DiagnosticSink, ServerDescriptor};

const DIAGNOSTIC_LINES: usize = 256;
const REAP_TIMEOUT: Duration = Duration::from_secs(5);
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(200);

/// The server executable could not be spawned.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchError {
    /// Command that failed to start.
    pub command: String,
    /// Human-readable failure description.
    pub reason: String,
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to launch '{}': {}", self.command, self.reason)
    }
}

impl std::error::Error for LaunchError {}

type DiagnosticBuffer = Arc<Mutex<VecDeque<String>>>;

/// Owns one running server process.
///
/// The process is killed when [`ServerProcess::stop`] runs or, failing that,
/// when the handle is dropped.
pub struct ServerProcess {
    name: String,
    child: Option<Child>,
    stdio: Option<(ChildStdout, ChildStdin)>,
    diagnostics: DiagnosticBuffer,
    stderr_task: Option<JoinHandle<()>>,
}

impl ServerProcess {
    /// Spawns the server described by `descriptor`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(descriptor: &ServerDescriptor) -> Result<Self, LaunchError> {
        Self::start_with_sink(descriptor, None)
    }

    /// Spawns the server and forwards its stderr lines to `sink`.
    pub fn start_with_sink(
        descriptor: &ServerDescriptor,
        sink: Option<Arc<dyn DiagnosticSink>>,
    ) -> Result<Self, LaunchError> {
        let mut command = Command::new(&descriptor.command);
        command
            .args(&descriptor.args)
            .envs(&descriptor.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &descriptor.cwd {
            command.current_dir(cwd);
        }

        log::info!(
            "starting server '{}': {} {}",
            descriptor.name,
            descriptor.command,
            descriptor.args.join(" ")
        );
        let mut child = command.spawn().map_err(|error| LaunchError {
            command: descriptor.command.clone(),
            reason: error.to_string(),
        })?;

        let missing_pipe = |pipe: &str| LaunchError {
            command: descriptor.command.clone(),
            reason: format!("{pipe} pipe unavailable"),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

        let diagnostics: DiagnosticBuffer = Arc::default();
        let stderr_task = tokio::spawn(capture_stderr(
            descriptor.name.clone(),
            stderr,
            Arc::clone(&diagnostics),
            sink,
        ));

        Ok(Self {
            name: descriptor.name.clone(),
            child: Some(child),
            stdio: Some((stdout, stdin)),
            diagnostics,
            stderr_task: Some(stderr_task),
        })
    }

    /// Display name of the server.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// OS process id, while the process is owned by this handle.
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Hands the stdout/stdin pipes to a transport. Returns `None` once taken.
    pub fn take_stdio(&mut self) -> Option<(ChildStdout, ChildStdin)> {
        self.stdio.take()
    }

    /// Most recent stderr lines, oldest first.
    pub fn diagnostics(&self) -> Vec<String> {
        lock(&self.diagnostics).iter().cloned().collect()
    }

    /// Reports whether the process is still alive.
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Terminates and reaps the process.
    ///
    /// Safe to call repeatedly and on a process that already exited; returns
    /// `true` only for the call that performed the teardown.
    pub async fn stop(&mut self) -> bool {
        let Some(mut child) = self.child.take() else {
            return false;
        };
        self.stdio = None;

        match child.try_wait() {
            Ok(Some(status)) => {
                log::debug!("server '{}' already exited: {status}", self.name);
            }
            _ => {
                log::info!("stopping server '{}'", self.name);
                if let Err(error) = child.start_kill() {
                    log::debug!("kill for server '{}' failed: {error}", self.name);
                }
                match tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
                    Ok(Ok(status)) => log::debug!("server '{}' exited: {status}", self.name),
                    Ok(Err(error)) => log::warn!("failed to reap server '{}': {error}", self.name),
                    Err(_) => log::warn!("server '{}' did not exit after kill", self.name),
                }
            }
        }

        if let Some(mut task) = self.stderr_task.take() {
            if tokio::time::timeout(STDERR_DRAIN_TIMEOUT, &mut task)
                .await
                .is_err()
            {
                task.abort();
            }
        }
        true
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

impl fmt::Debug for ServerProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerProcess")
            .field("name", &self.name)
            .field("id", &self.id())
            .finish()
    }
}

async fn capture_stderr(
    server: String,
    stderr: ChildStderr,
    buffer: DiagnosticBuffer,
    sink: Option<Arc<dyn DiagnosticSink>>,
) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                log::info!(target: "toolprobe::server", "[{server} stderr] {line}");
                if let Some(sink) = &sink {
                    sink.line(&server, &line);
                }
                let mut buffer = lock(&buffer);
                if buffer.len() == DIAGNOSTIC_LINES {
                    buffer.pop_front();
                }
                buffer.push_back(line);
            }
            Ok(None) => break,
            Err(error) => {
                log::debug!("stopped reading stderr of '{server}': {error}");
                break;
            }
        }
    }
}

fn lock(buffer: &DiagnosticBuffer) -> MutexGuard<'_, VecDeque<String>> {
    buffer
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(all(test, unix))]
#[path = "../tests/internal/process_unit_tests.rs"]
mod tests;
