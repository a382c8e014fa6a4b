use async_trait::async_trait;
use std::sync::Arc;

use super::ConfigResolver;
use crate::deploy::DeployError;

/// Decides whether a caller may deploy, restart, stop or tail a module.
#[async_trait]
pub trait AccessPolicy: Send + Sync {
    async fn can_operate(&self, user_id: &str, module_id: i32) -> Result<bool, DeployError>;
}

/// Grants access to the module's listed operators. An empty list admits every caller.
pub struct CatalogAccessPolicy {
    catalog: Arc<dyn ConfigResolver>,
}

impl CatalogAccessPolicy {
    pub fn new(catalog: Arc<dyn ConfigResolver>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl AccessPolicy for CatalogAccessPolicy {
    async fn can_operate(&self, user_id: &str, module_id: i32) -> Result<bool, DeployError> {
        let module = self.catalog.resolve_module_config(module_id).await?;
        Ok(module.operators.is_empty() || module.operators.iter().any(|op| op == user_id))
    }
}
