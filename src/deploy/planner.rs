//! Turns module configuration plus an environment override into concrete remote
//! paths and commands for one attempt.

use chrono::{DateTime, Local};
use serde::Serialize;

use super::DeployError;
use crate::models::{EnvironmentOverride, ModuleConfig, ModuleType};
use crate::remote::shell::join;

/// Suffix format shared by the attempt version and backup file names.
pub const VERSION_FORMAT: &str = "%y%m%d%H%M";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStrategy {
    /// Back up the expanded directory, then unzip the new archive over it.
    ArchiveExpand,
    /// Upload beside the live file and swap by rename.
    BinarySwap,
}

impl From<ModuleType> for ArtifactStrategy {
    fn from(module_type: ModuleType) -> Self {
        match module_type {
            ModuleType::Archive => ArtifactStrategy::ArchiveExpand,
            ModuleType::Binary | ModuleType::StaticArchive => ArtifactStrategy::BinarySwap,
        }
    }
}

/// Paths and commands after environment overrides were applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveSettings {
    pub remote_path: String,
    pub backup_dir: String,
    pub start_command: Option<String>,
    pub stop_command: Option<String>,
    pub restart_command: Option<String>,
    pub log_path: Option<String>,
}

impl EffectiveSettings {
    /// Restart command, falling back to the start command.
    pub fn lifecycle_command(&self) -> Option<&str> {
        self.restart_command
            .as_deref()
            .or(self.start_command.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedPlan {
    pub settings: EffectiveSettings,
    pub strategy: ArtifactStrategy,
    pub artifact_file_name: String,
    /// File name without its last extension.
    pub base_name: String,
    /// Last extension including the dot, or empty.
    pub extension: String,
    pub destination_path: String,
    /// Where the upload lands before the swap.
    pub staging_path: String,
    pub backup_file_name: String,
    pub backup_path: String,
    pub version_suffix: String,
}

impl ResolvedPlan {
    pub fn remote_path(&self) -> &str {
        &self.settings.remote_path
    }

    pub fn backup_dir(&self) -> &str {
        &self.settings.backup_dir
    }

    /// Directory an archive expands into, named after the archive.
    pub fn expanded_dir(&self) -> String {
        join(&self.settings.remote_path, &self.base_name)
    }

    /// Lifecycle commands run from the deployment directory for both strategies.
    pub fn working_dir(&self) -> &str {
        &self.settings.remote_path
    }
}

fn pick(override_value: Option<&String>, default: Option<&String>) -> Option<String> {
    override_value
        .filter(|value| !value.trim().is_empty())
        .or(default.filter(|value| !value.trim().is_empty()))
        .map(|value| value.trim().to_string())
}

fn compose(project_base: Option<&str>, raw: &str) -> String {
    let base = project_base.map(str::trim).unwrap_or_default();
    let raw = raw.trim();
    if base.is_empty() {
        raw.to_string()
    } else if raw.is_empty() {
        base.to_string()
    } else {
        join(base, raw)
    }
}

/// Rejects paths that are empty, a filesystem root, or carry `.`/`..` segments.
fn ensure_usable(path: &str, what: &str) -> Result<(), DeployError> {
    let is_separator = |c: char| c == '/' || c == '\\';
    let trimmed = path.trim();
    let without_trailing = trimmed.trim_end_matches(is_separator);
    let drive_root = without_trailing.len() == 2
        && without_trailing.as_bytes()[0].is_ascii_alphabetic()
        && without_trailing.as_bytes()[1] == b':';
    if without_trailing.is_empty() || drive_root {
        return Err(DeployError::InvalidPath(format!(
            "{} resolves to `{}`",
            what, trimmed
        )));
    }
    if trimmed
        .split(is_separator)
        .any(|segment| segment == "." || segment == "..")
    {
        return Err(DeployError::InvalidPath(format!(
            "{} `{}` contains `.` or `..` segments",
            what, trimmed
        )));
    }
    Ok(())
}

/// Applies override precedence and path composition.
pub fn resolve_settings(
    module: &ModuleConfig,
    override_cfg: Option<&EnvironmentOverride>,
) -> Result<EffectiveSettings, DeployError> {
    let project_base = module.project_base_path.as_deref();
    let raw_remote = pick(
        override_cfg.and_then(|o| o.remote_path.as_ref()),
        Some(&module.remote_base_path),
    )
    .unwrap_or_default();
    let remote_path = compose(project_base, &raw_remote);
    ensure_usable(&remote_path, "remote path")?;

    let backup_dir = match pick(
        override_cfg.and_then(|o| o.backup_path.as_ref()),
        module.backup_path.as_ref(),
    ) {
        Some(raw_backup) => compose(project_base, &raw_backup),
        None => remote_path.clone(),
    };
    ensure_usable(&backup_dir, "backup path")?;

    Ok(EffectiveSettings {
        remote_path,
        backup_dir,
        start_command: pick(
            override_cfg.and_then(|o| o.start_command.as_ref()),
            module.start_command.as_ref(),
        ),
        stop_command: pick(
            override_cfg.and_then(|o| o.stop_command.as_ref()),
            module.stop_command.as_ref(),
        ),
        restart_command: pick(
            override_cfg.and_then(|o| o.restart_command.as_ref()),
            module.restart_command.as_ref(),
        ),
        log_path: pick(
            override_cfg.and_then(|o| o.log_path.as_ref()),
            module.log_path.as_ref(),
        ),
    })
}

/// Splits `app.jar` into (`app`, `.jar`).
pub fn split_file_name(file_name: &str) -> (String, String) {
    match file_name.rfind('.') {
        Some(idx) if idx > 0 => (file_name[..idx].to_string(), file_name[idx..].to_string()),
        _ => (file_name.to_string(), String::new()),
    }
}

fn validate_artifact(module: &ModuleConfig, file_name: &str) -> Result<(), DeployError> {
    if file_name.trim().is_empty()
        || file_name == "."
        || file_name == ".."
        || file_name.contains('/')
        || file_name.contains('\\')
    {
        return Err(DeployError::InvalidArtifact(format!(
            "`{}` is not a plain file name",
            file_name
        )));
    }

    if module.allowed_file_extensions.is_empty() {
        return Ok(());
    }
    let (_, extension) = split_file_name(file_name);
    let extension = extension.trim_start_matches('.').to_lowercase();
    let allowed = module
        .allowed_file_extensions
        .iter()
        .any(|allowed| allowed.trim_start_matches('.').to_lowercase() == extension);
    if allowed {
        Ok(())
    } else {
        Err(DeployError::InvalidArtifact(format!(
            "`{}` is not one of the allowed extensions ({})",
            file_name,
            module.allowed_file_extensions.join(", ")
        )))
    }
}

pub fn resolve(
    module: &ModuleConfig,
    override_cfg: Option<&EnvironmentOverride>,
    environment_id: i32,
    file_name: &str,
) -> Result<ResolvedPlan, DeployError> {
    resolve_at(module, override_cfg, environment_id, file_name, Local::now())
}

/// Same as [`resolve`] with an explicit clock.
pub fn resolve_at(
    module: &ModuleConfig,
    override_cfg: Option<&EnvironmentOverride>,
    environment_id: i32,
    file_name: &str,
    now: DateTime<Local>,
) -> Result<ResolvedPlan, DeployError> {
    if let Some(o) = override_cfg {
        if o.module_id != module.id || o.environment_id != environment_id {
            return Err(DeployError::Config(format!(
                "override for module {} / environment {} applied to module {} / environment {}",
                o.module_id, o.environment_id, module.id, environment_id
            )));
        }
    }

    validate_artifact(module, file_name)?;
    let settings = resolve_settings(module, override_cfg)?;
    let strategy = ArtifactStrategy::from(module.module_type);

    let version_suffix = now.format(VERSION_FORMAT).to_string();
    let (base_name, extension) = split_file_name(file_name);
    let destination_path = join(&settings.remote_path, file_name);
    let staging_path = match strategy {
        ArtifactStrategy::ArchiveExpand => destination_path.clone(),
        ArtifactStrategy::BinarySwap => format!("{}_new", destination_path),
    };
    let backup_file_name = format!("{}{}{}", base_name, version_suffix, extension);
    let backup_path = join(&settings.backup_dir, &backup_file_name);

    Ok(ResolvedPlan {
        settings,
        strategy,
        artifact_file_name: file_name.to_string(),
        base_name,
        extension,
        destination_path,
        staging_path,
        backup_file_name,
        backup_path,
        version_suffix,
    })
}
