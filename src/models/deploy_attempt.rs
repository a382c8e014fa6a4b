use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::DeployStep;

/// Attempt status matching the `deploy_attempt.status` column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "deploying")]
    Deploying,
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "rollback")]
    Rollback,
}

impl AttemptStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptStatus::Success | AttemptStatus::Failed | AttemptStatus::Rollback
        )
    }
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptStatus::Pending => write!(f, "pending"),
            AttemptStatus::Deploying => write!(f, "deploying"),
            AttemptStatus::Success => write!(f, "success"),
            AttemptStatus::Failed => write!(f, "failed"),
            AttemptStatus::Rollback => write!(f, "rollback"),
        }
    }
}

impl FromStr for AttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AttemptStatus::Pending),
            "deploying" => Ok(AttemptStatus::Deploying),
            "success" => Ok(AttemptStatus::Success),
            "failed" => Ok(AttemptStatus::Failed),
            "rollback" => Ok(AttemptStatus::Rollback),
            other => Err(format!("unknown attempt status: {}", other)),
        }
    }
}

/// What kind of operation an attempt records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogType {
    #[serde(rename = "deploy")]
    Deploy,
    #[serde(rename = "restart")]
    Restart,
    #[serde(rename = "stop")]
    Stop,
}

impl std::fmt::Display for LogType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogType::Deploy => write!(f, "deploy"),
            LogType::Restart => write!(f, "restart"),
            LogType::Stop => write!(f, "stop"),
        }
    }
}

impl FromStr for LogType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deploy" => Ok(LogType::Deploy),
            "restart" => Ok(LogType::Restart),
            "stop" => Ok(LogType::Stop),
            other => Err(format!("unknown log type: {}", other)),
        }
    }
}

/// One deploy, restart or stop operation against a module+environment pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployAttempt {
    pub id: i32,
    pub module_id: i32,
    pub environment_id: i32,
    pub user_id: String,
    pub status: AttemptStatus,
    pub log_type: LogType,
    pub version: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub output_log: Option<String>,
}

impl DeployAttempt {
    pub fn new(module_id: i32, environment_id: i32, user_id: String, log_type: LogType) -> Self {
        Self {
            id: 0,
            module_id,
            environment_id,
            user_id,
            status: AttemptStatus::Deploying,
            log_type,
            version: None,
            start_time: Utc::now(),
            end_time: None,
            output_log: None,
        }
    }

    /// Still running, or finished recently enough that a poller has not seen the outcome yet.
    pub fn is_active(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        match (self.status, self.end_time) {
            (AttemptStatus::Pending | AttemptStatus::Deploying, _) => true,
            (_, Some(end)) => now - end <= window,
            (_, None) => false,
        }
    }
}

/// Attempt plus its steps ordered by `order_index`, as served to pollers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptProgress {
    #[serde(flatten)]
    pub attempt: DeployAttempt,
    pub steps: Vec<DeployStep>,
}
