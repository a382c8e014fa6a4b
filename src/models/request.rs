use serde::{Deserialize, Serialize};
use serde_valid::Validate;

/// Inbound request to deploy an already reassembled artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct DeploymentRequest {
    #[validate(minimum = 1)]
    pub module_id: i32,
    /// Falls back to the module's project-bound environment when absent.
    #[serde(default)]
    pub environment_id: Option<i32>,
    #[validate(min_length = 1)]
    pub artifact_local_path: String,
    #[validate(min_length = 1)]
    #[validate(max_length = 255)]
    pub artifact_file_name: String,
    #[serde(default)]
    pub skip_restart: bool,
    /// Caller identity, filled in by the HTTP layer.
    #[serde(default)]
    pub requested_by: String,
}
