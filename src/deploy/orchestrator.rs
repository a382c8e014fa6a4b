//! Runs one deploy, restart or stop attempt against a single target host.
//!
//! Every phase is a ledger step. A failing phase marks its own step `failed`,
//! leaves later steps `pending` and fails the attempt; warnings end up in the
//! step message instead. The executor session is released on every exit path.
//!
//! Attempts run as their own tokio task: a caller that stops waiting (a dropped
//! HTTP request) does not stop the attempt half way through a swap.

use futures::FutureExt;
use serde_valid::Validate;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

use super::error::{DeployError, RemoteCommandWarning};
use super::planner::{self, EffectiveSettings, ResolvedPlan};
use super::retention;
use super::strategy::{deploy_steps, SwapStrategy};
use crate::configuration::DeployerSettings;
use crate::ledger::StepLedger;
use crate::models::{AttemptStatus, DeploymentRequest, LogType, ModuleConfig, StepKey, StepStatus};
use crate::remote::shell::join;
use crate::remote::{
    os_probe, CommandOutput, ExecutorFactory, OsFamily, RemoteError, RemoteExecutor, Session,
    ShellDialect,
};
use crate::services::{effective_environment_id, ConfigResolver};

/// Value produced by a phase plus the message stored on its step.
type PhaseResult<T> = Result<(T, String), DeployError>;

/// Writes step transitions for one attempt and keeps a transcript for the output log.
struct StepRecorder<'a> {
    ledger: &'a dyn StepLedger,
    attempt_id: i32,
    transcript: Vec<String>,
    running: Option<StepKey>,
}

impl<'a> StepRecorder<'a> {
    fn new(ledger: &'a dyn StepLedger, attempt_id: i32) -> Self {
        Self {
            ledger,
            attempt_id,
            transcript: vec![],
            running: None,
        }
    }

    /// Ledger write failures are logged and the attempt carries on.
    async fn write(&self, key: StepKey, status: StepStatus, message: Option<&str>) {
        if let Err(err) = self
            .ledger
            .record_step(self.attempt_id, key, key.section(), status, message)
            .await
        {
            tracing::error!(
                attempt_id = self.attempt_id,
                step = %key,
                "Failed to record step: {}",
                err
            );
        }
    }

    async fn register(&mut self, keys: &[StepKey]) {
        for key in keys {
            self.write(*key, StepStatus::Pending, None).await;
        }
    }

    async fn step<T>(
        &mut self,
        key: StepKey,
        work: impl Future<Output = PhaseResult<T>>,
    ) -> Result<T, DeployError> {
        self.write(key, StepStatus::Running, None).await;
        self.running = Some(key);
        tracing::info!(step = %key, "Step started");
        let outcome = work.await;
        self.running = None;
        match outcome {
            Ok((value, message)) => {
                tracing::info!(step = %key, %message, "Step succeeded");
                self.write(key, StepStatus::Success, Some(&message)).await;
                self.transcript.push(format!("[{}] {}", key, message));
                Ok(value)
            }
            Err(err) => {
                tracing::error!(step = %key, "Step failed: {}", err);
                self.write(key, StepStatus::Failed, Some(&err.user_message()))
                    .await;
                self.transcript.push(format!("[{}] failed: {}", key, err));
                Err(err)
            }
        }
    }

    /// Phase intentionally not executed; stays `pending` with the reason.
    async fn note_pending(&mut self, key: StepKey, message: &str) {
        tracing::info!(step = %key, %message, "Step not executed");
        self.write(key, StepStatus::Pending, Some(message)).await;
        self.transcript.push(format!("[{}] {}", key, message));
    }

    /// Fails the step that was running when the attempt was cut short by a panic.
    async fn fail_running(&mut self, err: &DeployError) {
        if let Some(key) = self.running.take() {
            self.write(key, StepStatus::Failed, Some(&err.user_message()))
                .await;
            self.transcript.push(format!("[{}] failed: {}", key, err));
        }
    }

    fn output_log(&self, error: Option<&DeployError>) -> String {
        let mut lines = self.transcript.clone();
        if let Some(err) = error {
            lines.push(format!("error: {}", err));
        }
        lines.join("\n")
    }
}

/// Single-command lifecycle operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleAction {
    Restart,
    Stop,
}

impl LifecycleAction {
    fn log_type(self) -> LogType {
        match self {
            LifecycleAction::Restart => LogType::Restart,
            LifecycleAction::Stop => LogType::Stop,
        }
    }

    fn step_key(self) -> StepKey {
        match self {
            LifecycleAction::Restart => StepKey::Restart,
            LifecycleAction::Stop => StepKey::Stop,
        }
    }

    fn command(self, settings: &EffectiveSettings) -> Result<&str, DeployError> {
        match self {
            LifecycleAction::Restart => settings
                .lifecycle_command()
                .ok_or(DeployError::MissingCommand("restart or start")),
            LifecycleAction::Stop => settings
                .stop_command
                .as_deref()
                .ok_or(DeployError::MissingCommand("stop")),
        }
    }
}

async fn run_checked(
    executor: &dyn RemoteExecutor,
    command: &str,
) -> Result<CommandOutput, DeployError> {
    let output = executor.run(command).await?;
    if !output.success() {
        return Err(DeployError::remote_command(command, &output));
    }
    Ok(output)
}

async fn answers_yes(executor: &dyn RemoteExecutor, command: &str) -> Result<bool, DeployError> {
    let output = run_checked(executor, command).await?;
    Ok(output.stdout.trim().eq_ignore_ascii_case("yes"))
}

/// Runs an attempt as a task of its own, so it reaches a terminal state even when
/// the caller stops waiting for it.
async fn detached<T>(
    work: impl Future<Output = Result<T, DeployError>> + Send + 'static,
) -> Result<T, DeployError>
where
    T: Send + 'static,
{
    tokio::spawn(work.in_current_span())
        .await
        .map_err(|err| DeployError::Interrupted(err.to_string()))?
}

/// Turns a panic inside an attempt into an `Interrupted` failure.
async fn guarded<T>(work: impl Future<Output = Result<T, DeployError>>) -> Result<T, DeployError> {
    AssertUnwindSafe(work).catch_unwind().await.unwrap_or_else(|panic| {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|reason| reason.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic".to_string());
        tracing::error!("Attempt panicked: {}", reason);
        Err(DeployError::Interrupted(reason))
    })
}

/// Runs an operator command from `dir`. Non-zero exits, stderr output and the
/// command ceiling become warnings; a broken session is still an error.
async fn run_operator_command(
    executor: &dyn RemoteExecutor,
    dialect: ShellDialect,
    dir: &str,
    command: &str,
) -> Result<String, DeployError> {
    match executor.run(&dialect.in_dir(dir, command)).await {
        Ok(output) => match RemoteCommandWarning::from_output(command, &output) {
            Some(warning) => {
                tracing::warn!(%command, "{}", warning);
                Ok(warning.to_string())
            }
            None => Ok(format!("ran `{}`", command)),
        },
        Err(RemoteError::CommandTimeout { secs, .. }) => {
            tracing::warn!(%command, secs, "Operator command hit the command ceiling");
            Ok(format!(
                "warning: `{}` still running after {}s, not waiting any longer",
                command, secs
            ))
        }
        Err(err) => Err(err.into()),
    }
}

#[derive(Clone)]
pub struct DeploymentOrchestrator {
    catalog: Arc<dyn ConfigResolver>,
    ledger: Arc<dyn StepLedger>,
    executors: Arc<dyn ExecutorFactory>,
    settings: DeployerSettings,
}

impl DeploymentOrchestrator {
    pub fn new(
        catalog: Arc<dyn ConfigResolver>,
        ledger: Arc<dyn StepLedger>,
        executors: Arc<dyn ExecutorFactory>,
        settings: DeployerSettings,
    ) -> Self {
        Self {
            catalog,
            ledger,
            executors,
            settings,
        }
    }

    /// Deploys an uploaded artifact and returns the version suffix of the attempt.
    pub async fn deploy(&self, request: &DeploymentRequest) -> Result<String, DeployError> {
        let this = self.clone();
        let request = request.clone();
        detached(async move { this.deploy_attempt(request).await }).await
    }

    pub async fn restart(
        &self,
        module_id: i32,
        environment_id: Option<i32>,
        user_id: &str,
    ) -> Result<(), DeployError> {
        let this = self.clone();
        let user_id = user_id.to_string();
        detached(async move {
            this.lifecycle(LifecycleAction::Restart, module_id, environment_id, &user_id)
                .await
        })
        .await
    }

    pub async fn stop(
        &self,
        module_id: i32,
        environment_id: Option<i32>,
        user_id: &str,
    ) -> Result<(), DeployError> {
        let this = self.clone();
        let user_id = user_id.to_string();
        detached(async move {
            this.lifecycle(LifecycleAction::Stop, module_id, environment_id, &user_id)
                .await
        })
        .await
    }

    #[tracing::instrument(
        name = "Deploy artifact",
        skip(self, request),
        fields(
            module_id = request.module_id,
            environment_id = tracing::field::Empty,
            attempt_id = tracing::field::Empty,
        )
    )]
    async fn deploy_attempt(&self, request: DeploymentRequest) -> Result<String, DeployError> {
        request
            .validate()
            .map_err(|err| DeployError::InvalidArtifact(err.to_string()))?;

        let module = self.catalog.resolve_module_config(request.module_id).await?;
        let environment_id = effective_environment_id(&module, request.environment_id)?;
        let attempt_id = self
            .ledger
            .begin_attempt(
                module.id,
                environment_id,
                &request.requested_by,
                LogType::Deploy,
            )
            .await
            .map_err(DeployError::Ledger)?;
        let span = tracing::Span::current();
        span.record("environment_id", environment_id);
        span.record("attempt_id", attempt_id);

        let mut recorder = StepRecorder::new(self.ledger.as_ref(), attempt_id);
        let outcome = guarded(self.run_deploy(&mut recorder, &module, environment_id, &request)).await;
        if let Err(err) = &outcome {
            recorder.fail_running(err).await;
        }
        self.complete(&recorder, outcome.as_ref().map(|version| Some(version.as_str())))
            .await;
        outcome
    }

    async fn complete(&self, recorder: &StepRecorder<'_>, outcome: Result<Option<&str>, &DeployError>) {
        let (status, version, output_log) = match outcome {
            Ok(version) => {
                tracing::info!(attempt_id = recorder.attempt_id, ?version, "Attempt succeeded");
                (AttemptStatus::Success, version, recorder.output_log(None))
            }
            Err(err) => {
                tracing::error!(
                    attempt_id = recorder.attempt_id,
                    "Attempt failed: {}",
                    err
                );
                (AttemptStatus::Failed, None, recorder.output_log(Some(err)))
            }
        };
        if let Err(err) = self
            .ledger
            .complete_attempt(recorder.attempt_id, status, version, Some(&output_log))
            .await
        {
            tracing::error!(
                attempt_id = recorder.attempt_id,
                "Failed to complete attempt: {}",
                err
            );
        }
    }

    async fn run_deploy(
        &self,
        recorder: &mut StepRecorder<'_>,
        module: &ModuleConfig,
        environment_id: i32,
        request: &DeploymentRequest,
    ) -> Result<String, DeployError> {
        let override_cfg = self
            .catalog
            .resolve_environment_override(module.id, environment_id)
            .await?;
        let plan = planner::resolve(
            module,
            override_cfg.as_ref(),
            environment_id,
            &request.artifact_file_name,
        )?;
        let target = self.catalog.resolve_environment_target(environment_id).await?;
        recorder.register(&deploy_steps(plan.strategy)).await;

        let local_path = Path::new(&request.artifact_local_path);
        let upload_dir = self.settings.upload_dir.as_deref().map(Path::new);
        recorder
            .step(
                StepKey::LocalUploaded,
                check_local_artifact(local_path, upload_dir),
            )
            .await?;

        let mut session = Session::new(self.executors.executor_for(&target));
        let result = async {
            recorder
                .step(StepKey::Connect, async {
                    session.executor_mut()?.connect(&target).await?;
                    Ok::<_, DeployError>(((), format!("connected to {}", target.address())))
                })
                .await?;
            self.swap_artifact(
                recorder,
                session.executor()?,
                &plan,
                local_path,
                request.skip_restart,
            )
            .await
        }
        .await;
        session.release().await;

        result.map(|()| plan.version_suffix)
    }

    async fn swap_artifact(
        &self,
        recorder: &mut StepRecorder<'_>,
        executor: &dyn RemoteExecutor,
        plan: &ResolvedPlan,
        local_path: &Path,
        skip_restart: bool,
    ) -> Result<(), DeployError> {
        let os = recorder.step(StepKey::DetectOs, detect_os(executor)).await?;
        let strategy = SwapStrategy::select(plan.strategy, os);
        let dialect = strategy.dialect();

        recorder
            .step(StepKey::Prepare, prepare_dirs(executor, dialect, plan))
            .await?;
        recorder
            .step(StepKey::Transfer, async {
                executor.upload(local_path, &plan.staging_path).await?;
                Ok::<_, DeployError>((
                    (),
                    format!("uploaded {} to {}", plan.artifact_file_name, plan.staging_path),
                ))
            })
            .await?;

        if let SwapStrategy::Binary(_) = strategy {
            if strategy.requires_stop() {
                recorder
                    .step(StepKey::Stop, self.stop_for_swap(executor, strategy, plan))
                    .await?;
            } else {
                recorder
                    .note_pending(
                        StepKey::Stop,
                        "not required: the running binary is renamed in place",
                    )
                    .await;
            }
        }

        recorder
            .step(StepKey::Backup, back_up(executor, strategy, plan))
            .await?;
        recorder
            .step(StepKey::Swap, swap(executor, strategy, plan))
            .await?;

        match plan.settings.lifecycle_command() {
            _ if skip_restart => {
                recorder
                    .note_pending(StepKey::Restart, "skipped: restart not requested")
                    .await
            }
            None => {
                recorder
                    .note_pending(
                        StepKey::Restart,
                        "skipped: no restart or start command configured",
                    )
                    .await
            }
            Some(command) => {
                recorder
                    .step(StepKey::Restart, async {
                        let message =
                            run_operator_command(executor, dialect, plan.working_dir(), command)
                                .await?;
                        Ok::<_, DeployError>(((), message))
                    })
                    .await?
            }
        }

        recorder
            .step(StepKey::Cleanup, self.prune(executor, dialect, plan))
            .await
    }

    /// Windows holds a lock on running binaries: stop first, then give it time to let go.
    async fn stop_for_swap(
        &self,
        executor: &dyn RemoteExecutor,
        strategy: SwapStrategy,
        plan: &ResolvedPlan,
    ) -> PhaseResult<()> {
        let mut message = match plan.settings.stop_command.as_deref() {
            Some(command) => {
                run_operator_command(executor, strategy.dialect(), plan.working_dir(), command)
                    .await?
            }
            None => "no stop command configured".to_string(),
        };

        let settle = strategy.settle_delay(Duration::from_millis(self.settings.windows_settle_ms));
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
            message.push_str(&format!("; waited {}ms for file handles", settle.as_millis()));
        }
        Ok(((), message))
    }

    /// Deletes backups beyond the retention count. Never fails the attempt.
    async fn prune(
        &self,
        executor: &dyn RemoteExecutor,
        dialect: ShellDialect,
        plan: &ResolvedPlan,
    ) -> PhaseResult<()> {
        let list_command = dialect.list_newest_first(plan.backup_dir());
        let listing = match executor.run(&list_command).await {
            Ok(output) if output.success() => output.stdout,
            Ok(output) => {
                let warning = RemoteCommandWarning::from_output(&list_command, &output)
                    .map(|w| w.to_string())
                    .unwrap_or_else(|| "warning: could not list backups".to_string());
                tracing::warn!("{}", warning);
                return Ok(((), warning));
            }
            Err(err) => {
                tracing::warn!("Could not list backups: {}", err);
                return Ok(((), format!("warning: could not list backups: {}", err)));
            }
        };

        let names: Vec<&str> = listing.lines().map(str::trim).collect();
        let expired = match retention::expired_backups(
            &names,
            &plan.base_name,
            &plan.extension,
            &plan.artifact_file_name,
            self.settings.backup_retention,
        ) {
            Ok(expired) => expired,
            Err(err) => {
                tracing::warn!("Could not build backup pattern: {}", err);
                return Ok(((), format!("warning: could not match backups: {}", err)));
            }
        };

        let mut warnings = vec![];
        for name in &expired {
            let path = join(plan.backup_dir(), name);
            let command = dialect.remove_file(&path);
            match executor.run(&command).await {
                Ok(output) => {
                    if let Some(warning) = RemoteCommandWarning::from_output(&command, &output) {
                        warnings.push(warning.to_string());
                    }
                }
                Err(err) => warnings.push(format!("warning: could not remove {}: {}", path, err)),
            }
        }
        for warning in &warnings {
            tracing::warn!("{}", warning);
        }

        let mut message = format!(
            "kept {} newest backups, removed {}",
            self.settings.backup_retention,
            expired.len()
        );
        if !warnings.is_empty() {
            message.push_str("; ");
            message.push_str(&warnings.join("; "));
        }
        Ok(((), message))
    }

    #[tracing::instrument(
        name = "Run lifecycle action",
        skip(self),
        fields(attempt_id = tracing::field::Empty)
    )]
    async fn lifecycle(
        &self,
        action: LifecycleAction,
        module_id: i32,
        environment_id: Option<i32>,
        user_id: &str,
    ) -> Result<(), DeployError> {
        let module = self.catalog.resolve_module_config(module_id).await?;
        let environment_id = effective_environment_id(&module, environment_id)?;
        let attempt_id = self
            .ledger
            .begin_attempt(module.id, environment_id, user_id, action.log_type())
            .await
            .map_err(DeployError::Ledger)?;
        tracing::Span::current().record("attempt_id", attempt_id);

        let mut recorder = StepRecorder::new(self.ledger.as_ref(), attempt_id);
        let outcome = guarded(self.run_lifecycle(&mut recorder, action, &module, environment_id)).await;
        if let Err(err) = &outcome {
            recorder.fail_running(err).await;
        }
        self.complete(&recorder, outcome.as_ref().map(|_| None)).await;
        outcome
    }

    async fn run_lifecycle(
        &self,
        recorder: &mut StepRecorder<'_>,
        action: LifecycleAction,
        module: &ModuleConfig,
        environment_id: i32,
    ) -> Result<(), DeployError> {
        let override_cfg = self
            .catalog
            .resolve_environment_override(module.id, environment_id)
            .await?;
        let settings = planner::resolve_settings(module, override_cfg.as_ref())?;
        let target = self.catalog.resolve_environment_target(environment_id).await?;
        let action_key = action.step_key();
        recorder
            .register(&[StepKey::Connect, StepKey::DetectOs, action_key])
            .await;

        // fail before opening a session when there is nothing to run
        let command = match action.command(&settings) {
            Ok(command) => command,
            Err(err) => {
                return recorder
                    .step(action_key, async { Err::<((), String), _>(err) })
                    .await
            }
        };

        let mut session = Session::new(self.executors.executor_for(&target));
        let result = async {
            recorder
                .step(StepKey::Connect, async {
                    session.executor_mut()?.connect(&target).await?;
                    Ok::<_, DeployError>(((), format!("connected to {}", target.address())))
                })
                .await?;
            let executor = session.executor()?;
            let os = recorder
                .step(StepKey::DetectOs, detect_os(executor))
                .await?;
            recorder
                .step(action_key, async {
                    let message = run_operator_command(
                        executor,
                        ShellDialect::from(os),
                        &settings.remote_path,
                        command,
                    )
                    .await?;
                    Ok::<_, DeployError>(((), message))
                })
                .await
        }
        .await;
        session.release().await;
        result
    }
}

/// The artifact must be a regular file and, when an upload directory is
/// configured, resolve to a location inside it.
async fn check_local_artifact(path: &Path, upload_dir: Option<&Path>) -> PhaseResult<()> {
    if let Some(root) = upload_dir {
        let root = tokio::fs::canonicalize(root).await.map_err(|err| {
            DeployError::Transfer(format!("upload directory {}: {}", root.display(), err))
        })?;
        let resolved = tokio::fs::canonicalize(path).await.map_err(|err| {
            DeployError::Transfer(format!("local artifact {}: {}", path.display(), err))
        })?;
        if !resolved.starts_with(&root) {
            return Err(DeployError::InvalidArtifact(format!(
                "{} is outside the upload directory",
                path.display()
            )));
        }
    }
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => {
            Ok(((), format!("{} ({} bytes)", path.display(), meta.len())))
        }
        Ok(_) => Err(DeployError::Transfer(format!(
            "{} is not a regular file",
            path.display()
        ))),
        Err(err) => Err(DeployError::Transfer(format!(
            "local artifact {}: {}",
            path.display(),
            err
        ))),
    }
}

async fn detect_os(executor: &dyn RemoteExecutor) -> PhaseResult<OsFamily> {
    let os = os_probe::detect(executor).await;
    Ok((os, format!("{} family", os)))
}

async fn prepare_dirs(
    executor: &dyn RemoteExecutor,
    dialect: ShellDialect,
    plan: &ResolvedPlan,
) -> PhaseResult<()> {
    run_checked(executor, &dialect.mkdir_all(plan.remote_path())).await?;
    let mut message = format!("ensured {}", plan.remote_path());
    if plan.backup_dir() != plan.remote_path() {
        run_checked(executor, &dialect.mkdir_all(plan.backup_dir())).await?;
        message.push_str(&format!(" and {}", plan.backup_dir()));
    }
    Ok(((), message))
}

async fn back_up(
    executor: &dyn RemoteExecutor,
    strategy: SwapStrategy,
    plan: &ResolvedPlan,
) -> PhaseResult<()> {
    let dialect = strategy.dialect();
    match strategy {
        SwapStrategy::Archive(_) => {
            let expanded = plan.expanded_dir();
            if !answers_yes(executor, &dialect.dir_exists(&expanded)).await? {
                return Ok(((), format!("nothing to back up: {} does not exist", expanded)));
            }
            run_checked(
                executor,
                &dialect.zip_dir(plan.remote_path(), &plan.base_name, &plan.backup_path),
            )
            .await?;
            Ok(((), format!("archived {} to {}", expanded, plan.backup_path)))
        }
        SwapStrategy::Binary(_) => {
            if !answers_yes(executor, &dialect.file_exists(&plan.destination_path)).await? {
                return Ok((
                    (),
                    format!("nothing to back up: {} does not exist", plan.destination_path),
                ));
            }
            run_checked(
                executor,
                &dialect.move_file(&plan.destination_path, &plan.backup_path),
            )
            .await?;
            Ok((
                (),
                format!("moved {} to {}", plan.destination_path, plan.backup_path),
            ))
        }
    }
}

async fn swap(
    executor: &dyn RemoteExecutor,
    strategy: SwapStrategy,
    plan: &ResolvedPlan,
) -> PhaseResult<()> {
    let dialect = strategy.dialect();
    match strategy {
        SwapStrategy::Archive(_) => {
            run_checked(executor, &dialect.unzip(&plan.staging_path, plan.remote_path())).await?;
            Ok((
                (),
                format!("expanded {} into {}", plan.staging_path, plan.remote_path()),
            ))
        }
        SwapStrategy::Binary(_) => {
            run_checked(
                executor,
                &dialect.move_file(&plan.staging_path, &plan.destination_path),
            )
            .await?;
            Ok((
                (),
                format!("moved {} to {}", plan.staging_path, plan.destination_path),
            ))
        }
    }
}
