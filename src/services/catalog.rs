//! Configuration collaborator: where modules, environments and overrides come from.
//!
//! The orchestrator only sees the [`ConfigResolver`] trait. [`StaticCatalog`] serves
//! the lists loaded from `configuration.yaml`; other sources can implement the trait.

use async_trait::async_trait;

use crate::configuration::CatalogSettings;
use crate::deploy::DeployError;
use crate::models::{EnvironmentOverride, EnvironmentTarget, ModuleConfig};

#[async_trait]
pub trait ConfigResolver: Send + Sync {
    async fn resolve_module_config(&self, module_id: i32) -> Result<ModuleConfig, DeployError>;

    /// `None` when the pair has no override; module defaults then apply unchanged.
    async fn resolve_environment_override(
        &self,
        module_id: i32,
        environment_id: i32,
    ) -> Result<Option<EnvironmentOverride>, DeployError>;

    /// Target with its credential already decrypted.
    async fn resolve_environment_target(
        &self,
        environment_id: i32,
    ) -> Result<EnvironmentTarget, DeployError>;
}

/// Environment named by the caller, else the module's default one.
pub fn effective_environment_id(
    module: &ModuleConfig,
    requested: Option<i32>,
) -> Result<i32, DeployError> {
    requested
        .or(module.default_environment_id)
        .ok_or_else(|| {
            DeployError::Config(format!(
                "Module {} has no default environment; pass environment_id",
                module.id
            ))
        })
}

pub struct StaticCatalog {
    settings: CatalogSettings,
}

impl StaticCatalog {
    pub fn new(settings: CatalogSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ConfigResolver for StaticCatalog {
    async fn resolve_module_config(&self, module_id: i32) -> Result<ModuleConfig, DeployError> {
        self.settings
            .modules
            .iter()
            .find(|module| module.id == module_id)
            .cloned()
            .ok_or_else(|| DeployError::Config(format!("Module {} not found", module_id)))
    }

    async fn resolve_environment_override(
        &self,
        module_id: i32,
        environment_id: i32,
    ) -> Result<Option<EnvironmentOverride>, DeployError> {
        Ok(self
            .settings
            .overrides
            .iter()
            .find(|o| o.module_id == module_id && o.environment_id == environment_id)
            .cloned())
    }

    async fn resolve_environment_target(
        &self,
        environment_id: i32,
    ) -> Result<EnvironmentTarget, DeployError> {
        self.settings
            .environments
            .iter()
            .find(|env| env.id == environment_id)
            .cloned()
            .ok_or_else(|| {
                DeployError::Config(format!("Environment {} not found", environment_id))
            })
    }
}
