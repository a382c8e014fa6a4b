//! Transport layer: one session against one host.
//!
//! `SshExecutor` talks to remote hosts over russh, `LocalExecutor` runs against the
//! machine hosting the orchestrator. Both hand out a [`TailHandle`] for following files.

mod local;
pub mod os_probe;
pub mod shell;
mod ssh;

pub use local::LocalExecutor;
pub use os_probe::OsFamily;
pub use shell::ShellDialect;
pub use ssh::SshExecutor;

use async_trait::async_trait;
use futures::Stream;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use crate::models::{ConnectionMode, EnvironmentTarget};

/// Transport-level failures. A command exiting non-zero is not one of them.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("failed to connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },
    #[error("connection to {addr} timed out after {secs}s")]
    Timeout { addr: String, secs: u64 },
    #[error("authentication rejected for {user}@{addr}: {reason}")]
    Auth {
        user: String,
        addr: String,
        reason: String,
    },
    #[error("transfer of {local} to {remote} failed: {reason}")]
    Transfer {
        local: String,
        remote: String,
        reason: String,
    },
    #[error("command did not finish within {secs}s: {command}")]
    CommandTimeout { command: String, secs: u64 },
    #[error("channel error: {0}")]
    Channel(String),
    #[error("executor is not connected")]
    NotConnected,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Fully captured result of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the remote side closed without reporting a status.
    pub exit_code: Option<u32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        match self.exit_code {
            Some(code) => code == 0,
            None => self.stderr.trim().is_empty(),
        }
    }

    /// Clean exit with nothing on stderr.
    pub fn is_clean(&self) -> bool {
        self.success() && self.stderr.trim().is_empty()
    }
}

/// Live follow of a file. Dropping or closing it stops the follower process.
pub struct TailHandle {
    chunks: ReceiverStream<String>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl TailHandle {
    pub fn new(
        chunks: mpsc::Receiver<String>,
        stop: oneshot::Sender<()>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            chunks: ReceiverStream::new(chunks),
            stop: Some(stop),
            task: Some(task),
        }
    }

    /// Stops the follower and waits for its reader task to wind down.
    pub async fn close(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Stream for TailHandle {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.chunks).poll_next(cx)
    }
}

impl Drop for TailHandle {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

/// Abstraction over a session with one target host.
///
/// Production: `SshExecutor` (russh) and `LocalExecutor` (tokio::process).
/// Tests: recording executors that script outputs per command.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn connect(&mut self, target: &EnvironmentTarget) -> Result<(), RemoteError>;

    /// Runs one shell command and captures both streams.
    async fn run(&self, command: &str) -> Result<CommandOutput, RemoteError>;

    /// Copies a local file to `remote_path`, overwriting it. Parent directories must exist.
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<(), RemoteError>;

    /// Follows `remote_path`, yielding output chunks (not necessarily line aligned).
    async fn tail_file(&self, remote_path: &str) -> Result<TailHandle, RemoteError>;

    /// Releases the session. Safe to call more than once.
    async fn disconnect(&mut self);
}

/// Timeouts and tail settings shared by every executor the factory hands out.
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub tail_lines: u32,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(600),
            tail_lines: 100,
        }
    }
}

/// Owns one executor and disconnects it however its owner ends: [`Session::release`]
/// on the normal path, a disconnect spawned from `Drop` after a panic or cancellation.
pub struct Session {
    executor: Option<Box<dyn RemoteExecutor>>,
}

impl Session {
    pub fn new(executor: Box<dyn RemoteExecutor>) -> Self {
        Self {
            executor: Some(executor),
        }
    }

    pub fn executor(&self) -> Result<&dyn RemoteExecutor, RemoteError> {
        self.executor.as_deref().ok_or(RemoteError::NotConnected)
    }

    pub fn executor_mut(&mut self) -> Result<&mut (dyn RemoteExecutor + 'static), RemoteError> {
        self.executor.as_deref_mut().ok_or(RemoteError::NotConnected)
    }

    pub async fn release(mut self) {
        if let Some(mut executor) = self.executor.take() {
            executor.disconnect().await;
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(mut executor) = self.executor.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(async move {
                        executor.disconnect().await;
                        tracing::debug!("Abandoned session released");
                    });
                }
                Err(_) => tracing::warn!("No runtime to release abandoned session"),
            }
        }
    }
}

/// Hands out a fresh, unconnected executor per attempt.
pub trait ExecutorFactory: Send + Sync {
    fn executor_for(&self, target: &EnvironmentTarget) -> Box<dyn RemoteExecutor>;
}

/// Picks the executor from the target's connection mode.
pub struct ConnectionModeFactory {
    options: ExecutorOptions,
}

impl ConnectionModeFactory {
    pub fn new(options: ExecutorOptions) -> Self {
        Self { options }
    }
}

impl ExecutorFactory for ConnectionModeFactory {
    fn executor_for(&self, target: &EnvironmentTarget) -> Box<dyn RemoteExecutor> {
        match target.connection_mode {
            ConnectionMode::Ssh => Box::new(SshExecutor::new(self.options.clone())),
            ConnectionMode::Local => Box::new(LocalExecutor::new(self.options.clone())),
        }
    }
}
