use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use super::{CommandOutput, ExecutorOptions, RemoteError, RemoteExecutor, ShellDialect, TailHandle};
use crate::models::EnvironmentTarget;

/// Executor for targets that are the orchestrator's own host.
///
/// Commands go through `sh -c` (`cmd /C` on Windows), uploads are plain file copies
/// and tails run a local follower process.
pub struct LocalExecutor {
    options: ExecutorOptions,
    connected: bool,
}

impl LocalExecutor {
    pub fn new(options: ExecutorOptions) -> Self {
        Self {
            options,
            connected: false,
        }
    }

    fn shell(command: &str) -> Command {
        let mut cmd = if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(command);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command);
            cmd
        };
        cmd.kill_on_drop(true);
        cmd
    }

    fn ensure_connected(&self) -> Result<(), RemoteError> {
        if self.connected {
            Ok(())
        } else {
            Err(RemoteError::NotConnected)
        }
    }
}

#[async_trait]
impl RemoteExecutor for LocalExecutor {
    async fn connect(&mut self, target: &EnvironmentTarget) -> Result<(), RemoteError> {
        tracing::info!("Using local execution for environment {}", target.id);
        self.connected = true;
        Ok(())
    }

    async fn run(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        self.ensure_connected()?;
        tracing::debug!(command, "Running local command");

        let output = timeout(self.options.command_timeout, Self::shell(command).output())
            .await
            .map_err(|_| RemoteError::CommandTimeout {
                command: command.to_string(),
                secs: self.options.command_timeout.as_secs(),
            })??;

        Ok(CommandOutput {
            exit_code: output.status.code().map(|code| code as u32),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<(), RemoteError> {
        self.ensure_connected()?;
        tokio::fs::copy(local_path, remote_path)
            .await
            .map_err(|e| RemoteError::Transfer {
                local: local_path.display().to_string(),
                remote: remote_path.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn tail_file(&self, remote_path: &str) -> Result<TailHandle, RemoteError> {
        self.ensure_connected()?;
        let dialect = if cfg!(windows) {
            ShellDialect::PowerShell
        } else {
            ShellDialect::Posix
        };
        let mut child = Self::shell(&dialect.tail_follow(remote_path, self.options.tail_lines))
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| RemoteError::Channel("follower has no stdout".to_string()))?;

        let (chunk_tx, chunk_rx) = mpsc::channel(64);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; 8192];
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    read = stdout.read(&mut buf) => match read {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            let chunk = String::from_utf8_lossy(&buf[..n]).to_string();
                            if chunk_tx.send(chunk).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
            let _ = child.kill().await;
        });

        Ok(TailHandle::new(chunk_rx, stop_tx, task))
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }
}
