use serde::{Deserialize, Serialize};
use std::fmt;

/// How the orchestrator reaches a target host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    #[default]
    Ssh,
    /// The target is the host running the orchestrator.
    Local,
}

/// Decrypted secret used to authenticate against a target.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Credential {
    Password(String),
    PrivateKey {
        pem: String,
        #[serde(default)]
        passphrase: Option<String>,
    },
    PrivateKeyFile {
        path: String,
        #[serde(default)]
        passphrase: Option<String>,
    },
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => write!(f, "Password(***)"),
            Credential::PrivateKey { .. } => write!(f, "PrivateKey(***)"),
            Credential::PrivateKeyFile { path, .. } => write!(f, "PrivateKeyFile({})", path),
        }
    }
}

/// Resolved connection details for one environment. Never persisted by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentTarget {
    pub id: i32,
    #[serde(default)]
    pub name: String,
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    pub credential: Credential,
    #[serde(default)]
    pub connection_mode: ConnectionMode,
}

fn default_ssh_port() -> u16 {
    22
}

impl EnvironmentTarget {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
