use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "failed")]
    Failed,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Success | StepStatus::Failed)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::Running => write!(f, "running"),
            StepStatus::Success => write!(f, "success"),
            StepStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StepStatus::Pending),
            "running" => Ok(StepStatus::Running),
            "success" => Ok(StepStatus::Success),
            "failed" => Ok(StepStatus::Failed),
            other => Err(format!("unknown step status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepSection {
    #[serde(rename = "local")]
    Local,
    #[serde(rename = "remote")]
    Remote,
}

impl std::fmt::Display for StepSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepSection::Local => write!(f, "local"),
            StepSection::Remote => write!(f, "remote"),
        }
    }
}

impl FromStr for StepSection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(StepSection::Local),
            "remote" => Ok(StepSection::Remote),
            other => Err(format!("unknown step section: {}", other)),
        }
    }
}

/// Phases an attempt is broken into, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepKey {
    #[serde(rename = "local.uploaded")]
    LocalUploaded,
    #[serde(rename = "remote.connect")]
    Connect,
    #[serde(rename = "remote.detect_os")]
    DetectOs,
    #[serde(rename = "remote.prepare")]
    Prepare,
    #[serde(rename = "remote.transfer")]
    Transfer,
    #[serde(rename = "remote.stop")]
    Stop,
    #[serde(rename = "remote.backup")]
    Backup,
    #[serde(rename = "remote.swap")]
    Swap,
    #[serde(rename = "remote.restart")]
    Restart,
    #[serde(rename = "remote.cleanup")]
    Cleanup,
}

impl StepKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKey::LocalUploaded => "local.uploaded",
            StepKey::Connect => "remote.connect",
            StepKey::DetectOs => "remote.detect_os",
            StepKey::Prepare => "remote.prepare",
            StepKey::Transfer => "remote.transfer",
            StepKey::Stop => "remote.stop",
            StepKey::Backup => "remote.backup",
            StepKey::Swap => "remote.swap",
            StepKey::Restart => "remote.restart",
            StepKey::Cleanup => "remote.cleanup",
        }
    }

    pub fn section(&self) -> StepSection {
        match self {
            StepKey::LocalUploaded => StepSection::Local,
            _ => StepSection::Remote,
        }
    }
}

impl std::fmt::Display for StepKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            StepKey::LocalUploaded,
            StepKey::Connect,
            StepKey::DetectOs,
            StepKey::Prepare,
            StepKey::Transfer,
            StepKey::Stop,
            StepKey::Backup,
            StepKey::Swap,
            StepKey::Restart,
            StepKey::Cleanup,
        ]
        .into_iter()
        .find(|key| key.as_str() == s)
        .ok_or_else(|| format!("unknown step key: {}", s))
    }
}

/// Persisted record of one phase of an attempt. Unique per (attempt, step key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployStep {
    pub deploy_attempt_id: i32,
    pub step_key: StepKey,
    pub section: StepSection,
    pub status: StepStatus,
    pub message: Option<String>,
    pub order_index: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}
