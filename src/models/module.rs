use serde::{Deserialize, Serialize};

/// Artifact kind a module is built into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleType {
    #[serde(rename = "binary")]
    Binary,
    #[serde(rename = "archive")]
    Archive,
    #[serde(rename = "static-archive")]
    StaticArchive,
}

impl std::fmt::Display for ModuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleType::Binary => write!(f, "binary"),
            ModuleType::Archive => write!(f, "archive"),
            ModuleType::StaticArchive => write!(f, "static-archive"),
        }
    }
}

/// Deployable unit of a project, as owned by the project configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub id: i32,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub module_type: ModuleType,
    /// Base path of the owning project, prefixed to `remote_base_path`.
    #[serde(default)]
    pub project_base_path: Option<String>,
    pub remote_base_path: String,
    #[serde(default)]
    pub backup_path: Option<String>,
    #[serde(default)]
    pub start_command: Option<String>,
    #[serde(default)]
    pub stop_command: Option<String>,
    #[serde(default)]
    pub restart_command: Option<String>,
    #[serde(default)]
    pub allowed_file_extensions: Vec<String>,
    /// Environment the owning project is bound to; used when a request names none.
    #[serde(default)]
    pub default_environment_id: Option<i32>,
    #[serde(default)]
    pub log_path: Option<String>,
    /// Users allowed to operate this module. Empty means any caller.
    #[serde(default)]
    pub operators: Vec<String>,
}

/// Per (module, environment) settings taking priority over the module defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentOverride {
    pub module_id: i32,
    pub environment_id: i32,
    #[serde(default)]
    pub remote_path: Option<String>,
    #[serde(default)]
    pub backup_path: Option<String>,
    #[serde(default)]
    pub start_command: Option<String>,
    #[serde(default)]
    pub stop_command: Option<String>,
    #[serde(default)]
    pub restart_command: Option<String>,
    #[serde(default)]
    pub log_path: Option<String>,
}
