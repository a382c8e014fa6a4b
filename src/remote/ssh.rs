//! SSH executor
//!
//! Uses russh to open one session per attempt; every command, upload and tail runs on
//! its own channel of that session.

use async_trait::async_trait;
use russh::client::{self, Config, Handle};
use russh::keys::{decode_secret_key, load_secret_key, PrivateKey, PrivateKeyWithHashAlg};
use russh::{ChannelMsg, Disconnect, Preferred};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use super::shell::dialect_for_path;
use super::{CommandOutput, ExecutorOptions, RemoteError, RemoteExecutor, TailHandle};
use crate::models::{Credential, EnvironmentTarget};

/// SSH client handler for russh
struct ClientHandler;

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Host keys are not pinned per environment yet; accept whatever the target presents.
        Ok(true)
    }
}

pub struct SshExecutor {
    options: ExecutorOptions,
    handle: Option<Handle<ClientHandler>>,
    addr: String,
}

impl SshExecutor {
    pub fn new(options: ExecutorOptions) -> Self {
        Self {
            options,
            handle: None,
            addr: String::new(),
        }
    }

    fn handle(&self) -> Result<&Handle<ClientHandler>, RemoteError> {
        self.handle.as_ref().ok_or(RemoteError::NotConnected)
    }

    fn channel_error(err: russh::Error) -> RemoteError {
        RemoteError::Channel(err.to_string())
    }

    async fn authenticate(
        handle: &mut Handle<ClientHandler>,
        target: &EnvironmentTarget,
    ) -> Result<bool, RemoteError> {
        let auth_error = |reason: String| RemoteError::Auth {
            user: target.username.clone(),
            addr: target.address(),
            reason,
        };

        let key = match &target.credential {
            Credential::Password(password) => {
                let result = handle
                    .authenticate_password(target.username.clone(), password.clone())
                    .await
                    .map_err(|e| auth_error(e.to_string()))?;
                return Ok(result.success());
            }
            Credential::PrivateKey { pem, passphrase } => {
                parse_private_key(pem, passphrase.as_deref()).map_err(|e| auth_error(e.to_string()))?
            }
            Credential::PrivateKeyFile { path, passphrase } => {
                load_secret_key(path, passphrase.as_deref())
                    .map_err(|e| auth_error(format!("cannot load key {}: {}", path, e)))?
            }
        };

        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .map_err(|e| auth_error(e.to_string()))?
            .flatten();
        let result = handle
            .authenticate_publickey(
                target.username.clone(),
                PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
            )
            .await
            .map_err(|e| auth_error(e.to_string()))?;

        Ok(result.success())
    }

    /// Drains a channel until the remote side closes it.
    async fn collect(channel: &mut russh::Channel<client::Msg>) -> CommandOutput {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
                // ext 1 is SSH_EXTENDED_DATA_STDERR
                ChannelMsg::ExtendedData { data, ext: 1 } => stderr.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status),
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
        }
    }
}

/// Parse a PEM-encoded private key (OpenSSH or traditional formats)
fn parse_private_key(pem: &str, passphrase: Option<&str>) -> Result<PrivateKey, anyhow::Error> {
    let key = decode_secret_key(pem, passphrase)?;
    Ok(key)
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn connect(&mut self, target: &EnvironmentTarget) -> Result<(), RemoteError> {
        if self.handle.is_some() {
            return Ok(());
        }

        let config = Arc::new(Config {
            preferred: Preferred::DEFAULT,
            ..Default::default()
        });
        let addr = target.address();
        tracing::info!("Connecting to {} as {}", addr, target.username);

        let connection = timeout(
            self.options.connect_timeout,
            client::connect(config, (target.host.as_str(), target.port), ClientHandler),
        )
        .await;

        let mut handle = match connection {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                tracing::warn!("SSH connection to {} failed: {}", addr, e);
                return Err(RemoteError::Connect {
                    addr,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                tracing::warn!(
                    "SSH connection timed out after {:?}",
                    self.options.connect_timeout
                );
                return Err(RemoteError::Timeout {
                    addr,
                    secs: self.options.connect_timeout.as_secs(),
                });
            }
        };

        let authenticated = timeout(
            self.options.connect_timeout,
            Self::authenticate(&mut handle, target),
        )
        .await
        .map_err(|_| RemoteError::Timeout {
            addr: addr.clone(),
            secs: self.options.connect_timeout.as_secs(),
        })??;

        if !authenticated {
            return Err(RemoteError::Auth {
                user: target.username.clone(),
                addr,
                reason: "credential rejected by server".to_string(),
            });
        }

        tracing::info!("SSH connection established successfully");
        self.addr = addr;
        self.handle = Some(handle);
        Ok(())
    }

    async fn run(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        let handle = self.handle()?;
        tracing::debug!(addr = %self.addr, command, "Running remote command");

        let execution = async {
            let mut channel = handle
                .channel_open_session()
                .await
                .map_err(Self::channel_error)?;
            channel
                .exec(true, command)
                .await
                .map_err(Self::channel_error)?;
            Ok::<_, RemoteError>(Self::collect(&mut channel).await)
        };

        match timeout(self.options.command_timeout, execution).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("Command '{}' timed out", command);
                Err(RemoteError::CommandTimeout {
                    command: command.to_string(),
                    secs: self.options.command_timeout.as_secs(),
                })
            }
        }
    }

    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<(), RemoteError> {
        let transfer_error = |reason: String| RemoteError::Transfer {
            local: local_path.display().to_string(),
            remote: remote_path.to_string(),
            reason,
        };
        let handle = self.handle()?;
        let file = tokio::fs::File::open(local_path)
            .await
            .map_err(|e| transfer_error(e.to_string()))?;

        let command = dialect_for_path(remote_path).write_stdin_to(remote_path);
        let transfer = async {
            let mut channel = handle
                .channel_open_session()
                .await
                .map_err(Self::channel_error)?;
            channel
                .exec(true, command.as_str())
                .await
                .map_err(Self::channel_error)?;
            channel
                .data(file)
                .await
                .map_err(|e| transfer_error(e.to_string()))?;
            channel.eof().await.map_err(Self::channel_error)?;
            Ok::<_, RemoteError>(Self::collect(&mut channel).await)
        };

        let output = timeout(self.options.command_timeout, transfer)
            .await
            .map_err(|_| transfer_error("transfer timed out".to_string()))??;

        if !output.success() {
            return Err(transfer_error(format!(
                "remote write exited with {:?}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }

        tracing::info!("Uploaded {} to {}", local_path.display(), remote_path);
        Ok(())
    }

    async fn tail_file(&self, remote_path: &str) -> Result<TailHandle, RemoteError> {
        let handle = self.handle()?;
        let mut channel = handle
            .channel_open_session()
            .await
            .map_err(Self::channel_error)?;
        // A pty makes sshd hang up the follower when the channel goes away.
        channel
            .request_pty(false, "xterm", 200, 50, 0, 0, &[])
            .await
            .map_err(Self::channel_error)?;
        let command = dialect_for_path(remote_path).tail_follow(remote_path, self.options.tail_lines);
        channel
            .exec(true, command.as_str())
            .await
            .map_err(Self::channel_error)?;

        let (chunk_tx, chunk_rx) = mpsc::channel(64);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let path = remote_path.to_string();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    msg = channel.wait() => match msg {
                        Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
                            let chunk = String::from_utf8_lossy(&data).to_string();
                            if chunk_tx.send(chunk).await.is_err() {
                                break;
                            }
                        }
                        Some(ChannelMsg::Close) | None => break,
                        Some(_) => {}
                    }
                }
            }
            let _ = channel.close().await;
            tracing::debug!("Stopped following {}", path);
        });

        Ok(TailHandle::new(chunk_rx, stop_tx, task))
    }

    async fn disconnect(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
            {
                tracing::debug!("SSH disconnect from {} reported: {}", self.addr, e);
            }
        }
    }
}

impl Drop for SshExecutor {
    fn drop(&mut self) {
        // Sessions that were not disconnected explicitly (panics, dropped log streams).
        if let Some(handle) = self.handle.take() {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    let _ = handle
                        .disconnect(Disconnect::ByApplication, "", "English")
                        .await;
                });
            }
        }
    }
}
