use crate::deploy::retention::DEFAULT_RETENTION;
use crate::models::{EnvironmentOverride, EnvironmentTarget, ModuleConfig};
use crate::remote::ExecutorOptions;
use serde;
use std::time::Duration;

#[derive(Debug, serde::Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub app_port: u16,
    pub app_host: String,
    #[serde(default)]
    pub deployer: DeployerSettings,
    #[serde(default)]
    pub catalog: CatalogSettings,
}

#[derive(Debug, serde::Deserialize)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database_name: String,
}

impl DatabaseSettings {
    // Connection string: postgresql://<username>:<password>@<host>:<port>/<database_name>
    pub fn connection_string(&self) -> String {
        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name,
        )
    }
}

/// Timeouts and housekeeping knobs for remote operations.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct DeployerSettings {
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
    /// Pause after stopping a Windows process so it releases its file handles.
    pub windows_settle_ms: u64,
    pub backup_retention: usize,
    /// How long a finished attempt keeps showing up in the active list.
    pub active_window_secs: i64,
    pub tail_lines: u32,
    /// Directory uploaded artifacts are reassembled in. When set, deploys refuse
    /// local paths that resolve outside of it.
    pub upload_dir: Option<String>,
}

impl Default for DeployerSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            command_timeout_secs: 600,
            windows_settle_ms: 2000,
            backup_retention: DEFAULT_RETENTION,
            active_window_secs: 60,
            tail_lines: 100,
            upload_dir: None,
        }
    }
}

impl DeployerSettings {
    pub fn executor_options(&self) -> ExecutorOptions {
        ExecutorOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
            tail_lines: self.tail_lines,
        }
    }
}

/// Modules, environments and per-pair overrides served by the static catalog.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    pub modules: Vec<ModuleConfig>,
    pub environments: Vec<EnvironmentTarget>,
    pub overrides: Vec<EnvironmentOverride>,
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // configuration.yaml first, then DECKHAND__* variables on top of it,
    // e.g. DECKHAND__DATABASE__HOST or DECKHAND__DEPLOYER__CONNECT_TIMEOUT_SECS
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration"))
        .add_source(
            config::Environment::with_prefix("DECKHAND")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    settings.try_deserialize::<Settings>()
}
