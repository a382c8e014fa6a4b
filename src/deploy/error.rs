use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde_json::json;

use crate::remote::{CommandOutput, RemoteError};

/// Failures that end an attempt. `Display` keeps the full original text for the
/// persisted output log; [`DeployError::user_message`] is the sanitized summary.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("connection failed: {reason}")]
    Connection { reason: String, timed_out: bool },
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("invalid remote path: {0}")]
    InvalidPath(String),
    #[error("invalid artifact: {0}")]
    InvalidArtifact(String),
    #[error("no {0} command configured")]
    MissingCommand(&'static str),
    #[error("transfer failed: {0}")]
    Transfer(String),
    #[error("remote command `{command}` exited with {exit_code:?}: {stderr}")]
    RemoteCommand {
        command: String,
        exit_code: Option<u32>,
        stderr: String,
    },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("ledger error: {0}")]
    Ledger(String),
    #[error("attempt interrupted: {0}")]
    Interrupted(String),
}

impl DeployError {
    pub fn remote_command(command: &str, output: &CommandOutput) -> Self {
        Self::RemoteCommand {
            command: command.to_string(),
            exit_code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        }
    }

    /// Classified, operator-friendly message without raw transport detail.
    pub fn user_message(&self) -> String {
        match self {
            Self::Connection {
                timed_out: true, ..
            } => "Connection timed out - check host and port".to_string(),
            Self::Connection { .. } => {
                "Could not connect to the target host - check host, port and network".to_string()
            }
            Self::Auth(_) => {
                "Authentication failed - check the username and credential of this environment"
                    .to_string()
            }
            Self::InvalidPath(detail) => format!("Invalid remote path: {}", detail),
            Self::InvalidArtifact(detail) => format!("Artifact rejected: {}", detail),
            Self::MissingCommand(kind) => {
                format!("No {} command is configured for this module", kind)
            }
            Self::Transfer(_) => {
                "Artifact transfer failed - check the uploaded file and remote directory permissions"
                    .to_string()
            }
            Self::RemoteCommand { exit_code, .. } => match exit_code {
                Some(code) => format!("Remote command failed with exit code {}", code),
                None => "Remote command failed".to_string(),
            },
            Self::Transport(_) => "Lost connection to the target host".to_string(),
            Self::Config(detail) => detail.clone(),
            Self::Ledger(_) => "Deployment history could not be recorded".to_string(),
            Self::Interrupted(_) => {
                "The attempt stopped unexpectedly - check the server log".to_string()
            }
        }
    }
}

impl From<RemoteError> for DeployError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Timeout { .. } => Self::Connection {
                reason: err.to_string(),
                timed_out: true,
            },
            RemoteError::Connect { ref reason, .. } => {
                let lowered = reason.to_lowercase();
                if lowered.contains("auth") || lowered.contains("permission denied") {
                    Self::Auth(err.to_string())
                } else {
                    Self::Connection {
                        timed_out: lowered.contains("timed out") || lowered.contains("timeout"),
                        reason: err.to_string(),
                    }
                }
            }
            RemoteError::Auth { .. } => Self::Auth(err.to_string()),
            RemoteError::Transfer { .. } => Self::Transfer(err.to_string()),
            RemoteError::CommandTimeout { .. }
            | RemoteError::Channel(_)
            | RemoteError::NotConnected
            | RemoteError::Io(_) => Self::Transport(err.to_string()),
        }
    }
}

/// Non-fatal outcome of a restart, stop or cleanup command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommandWarning {
    pub command: String,
    pub exit_code: Option<u32>,
    pub stderr: String,
}

impl RemoteCommandWarning {
    /// `None` when the command exited cleanly.
    pub fn from_output(command: &str, output: &CommandOutput) -> Option<Self> {
        if output.is_clean() {
            return None;
        }
        Some(Self {
            command: command.to_string(),
            exit_code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        })
    }
}

impl std::fmt::Display for RemoteCommandWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let exit = self
            .exit_code
            .map(|code| code.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        if self.stderr.is_empty() {
            write!(f, "warning: `{}` exited with {}", self.command, exit)
        } else {
            write!(
                f,
                "warning: `{}` exited with {}: {}",
                self.command, exit, self.stderr
            )
        }
    }
}

impl ResponseError for DeployError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "status": "Error",
            "message": self.user_message(),
        }))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidPath(_) | Self::InvalidArtifact(_) | Self::MissingCommand(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Config(_) => StatusCode::NOT_FOUND,
            Self::Connection { timed_out: true, .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Connection { .. }
            | Self::Auth(_)
            | Self::Transfer(_)
            | Self::RemoteCommand { .. }
            | Self::Transport(_) => StatusCode::BAD_GATEWAY,
            Self::Ledger(_) | Self::Interrupted(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
