//! Long-lived follow of a module's log file, independent of any deploy attempt.

use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use super::{effective_environment_id, ConfigResolver};
use crate::deploy::DeployError;
use crate::models::{EnvironmentOverride, ModuleConfig};
use crate::remote::{ExecutorFactory, Session, TailHandle};

pub struct LogTailer {
    catalog: Arc<dyn ConfigResolver>,
    executors: Arc<dyn ExecutorFactory>,
}

/// Log path from the caller, else the environment override, else the module.
pub fn effective_log_path(
    requested: Option<&str>,
    override_cfg: Option<&EnvironmentOverride>,
    module: &ModuleConfig,
) -> Option<String> {
    [
        requested,
        override_cfg.and_then(|o| o.log_path.as_deref()),
        module.log_path.as_deref(),
    ]
    .into_iter()
    .flatten()
    .map(str::trim)
    .find(|path| !path.is_empty())
    .map(str::to_string)
}

impl LogTailer {
    pub fn new(catalog: Arc<dyn ConfigResolver>, executors: Arc<dyn ExecutorFactory>) -> Self {
        Self { catalog, executors }
    }

    /// Opens a dedicated session and starts following the log.
    ///
    /// The session lives exactly as long as the returned stream.
    #[tracing::instrument(name = "Stream module log", skip(self))]
    pub async fn stream_log(
        &self,
        module_id: i32,
        environment_id: Option<i32>,
        log_path: Option<&str>,
    ) -> Result<LogStream, DeployError> {
        let module = self.catalog.resolve_module_config(module_id).await?;
        let environment_id = effective_environment_id(&module, environment_id)?;
        let override_cfg = self
            .catalog
            .resolve_environment_override(module_id, environment_id)
            .await?;
        let path = effective_log_path(log_path, override_cfg.as_ref(), &module).ok_or_else(|| {
            DeployError::InvalidPath(format!("no log path configured for module {}", module_id))
        })?;
        let target = self.catalog.resolve_environment_target(environment_id).await?;

        let mut session = Session::new(self.executors.executor_for(&target));
        let opened = async {
            session.executor_mut()?.connect(&target).await?;
            session.executor()?.tail_file(&path).await
        }
        .await;
        match opened {
            Ok(tail) => {
                tracing::info!(%path, host = %target.address(), "Log tail opened");
                Ok(LogStream { tail, session })
            }
            Err(err) => {
                session.release().await;
                Err(err.into())
            }
        }
    }
}

/// Chunks of a followed log. Dropping the stream stops the remote follower and
/// releases the session; [`LogStream::close`] does the same and waits for it.
pub struct LogStream {
    // declared first: the follower stops before the session goes away
    tail: TailHandle,
    session: Session,
}

impl LogStream {
    pub async fn close(self) {
        let LogStream { tail, session } = self;
        tail.close().await;
        session.release().await;
    }
}

impl Stream for LogStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.tail).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModuleType;

    fn module(log_path: Option<&str>) -> ModuleConfig {
        ModuleConfig {
            id: 1,
            name: "api".to_string(),
            module_type: ModuleType::Binary,
            project_base_path: None,
            remote_base_path: "/opt/api".to_string(),
            backup_path: None,
            start_command: None,
            stop_command: None,
            restart_command: None,
            allowed_file_extensions: vec![],
            default_environment_id: Some(1),
            log_path: log_path.map(str::to_string),
            operators: vec![],
        }
    }

    #[test]
    fn log_path_precedence() {
        let override_cfg = EnvironmentOverride {
            module_id: 1,
            environment_id: 1,
            log_path: Some("/var/log/api/staging.log".to_string()),
            ..Default::default()
        };
        let module = module(Some("/var/log/api/app.log"));

        assert_eq!(
            effective_log_path(Some("/tmp/x.log"), Some(&override_cfg), &module).as_deref(),
            Some("/tmp/x.log")
        );
        assert_eq!(
            effective_log_path(Some("  "), Some(&override_cfg), &module).as_deref(),
            Some("/var/log/api/staging.log")
        );
        assert_eq!(
            effective_log_path(None, None, &module).as_deref(),
            Some("/var/log/api/app.log")
        );
        assert_eq!(effective_log_path(None, None, &self::module(None)), None);
    }
}
